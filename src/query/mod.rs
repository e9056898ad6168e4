//! Scoped query analysis.
//!
//! A [`Query`] owns one EPL expression and lazily derives, once per
//! instance, its parsed statement, the targets and aliases it references,
//! its nested subquery scopes and the fields it uses per target. A subquery
//! scope is the same type built from a statement fragment shared with its
//! parent.

mod explore;
pub mod rewrite;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::{EplAdapter, Node, NodeKind, ParserOptions, QueryLanguageAdapter, Statement, StreamNode};
use crate::ast::compiler::compile;
use crate::error::{Error, Result};
use crate::field::FieldSet;

pub use explore::FieldMap;
pub use rewrite::{rewrite_query, Mapping, RewritePass, Rewriter};

/// Construction parameters of a root query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub name: Option<String>,
    pub group: Option<String>,
    pub expression: String,
}

impl QueryParams {
    pub fn expression(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            ..Self::default()
        }
    }
}

/// Serializable summary of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub name: Option<String>,
    pub group: Option<String>,
    pub expression: String,
    pub targets: Vec<String>,
}

#[derive(Debug, Clone)]
enum Scope {
    Root {
        name: Option<String>,
        group: Option<String>,
        expression: String,
    },
    /// Select, from and where only; identity fields report "".
    Subquery,
}

#[derive(Debug)]
pub struct Query {
    scope: Scope,
    /// Name assigned when the query is registered with an engine.
    pub statement_name: Option<String>,
    /// Known fields per target, filled in by the caller.
    pub fieldsets: BTreeMap<String, FieldSet>,
    options: ParserOptions,
    ast: OnceLock<Arc<Statement>>,
    targets: OnceLock<Vec<String>>,
    aliases: OnceLock<Vec<String>>,
    subqueries: OnceLock<Vec<Query>>,
    fields: OnceLock<FieldMap>,
}

impl Query {
    pub fn new(params: QueryParams) -> Self {
        Self::with_options(params, ParserOptions::default())
    }

    pub fn with_options(params: QueryParams, options: ParserOptions) -> Self {
        Self {
            scope: Scope::Root {
                name: params.name,
                group: params.group,
                expression: params.expression,
            },
            statement_name: None,
            fieldsets: BTreeMap::new(),
            options,
            ast: OnceLock::new(),
            targets: OnceLock::new(),
            aliases: OnceLock::new(),
            subqueries: OnceLock::new(),
            fields: OnceLock::new(),
        }
    }

    /// A subquery scope over an already parsed fragment.
    fn from_fragment(fragment: Arc<Statement>, options: ParserOptions) -> Self {
        Self {
            scope: Scope::Subquery,
            statement_name: None,
            fieldsets: BTreeMap::new(),
            options,
            ast: OnceLock::from(fragment),
            targets: OnceLock::new(),
            aliases: OnceLock::new(),
            subqueries: OnceLock::new(),
            fields: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        match &self.scope {
            Scope::Root { name, .. } => name.as_deref().unwrap_or(""),
            Scope::Subquery => "",
        }
    }

    pub fn group(&self) -> Option<&str> {
        match &self.scope {
            Scope::Root { group, .. } => group.as_deref(),
            Scope::Subquery => None,
        }
    }

    pub fn expression(&self) -> &str {
        match &self.scope {
            Scope::Root { expression, .. } => expression,
            Scope::Subquery => "",
        }
    }

    pub fn is_subquery(&self) -> bool {
        matches!(self.scope, Scope::Subquery)
    }

    /// The parsed statement. Parse failures are not cached.
    pub fn ast(&self) -> Result<&Statement> {
        if let Some(ast) = self.ast.get() {
            return Ok(ast.as_ref());
        }
        let statement = EplAdapter::new(self.options).parse(self.expression())?;
        debug!(name = self.name(), "parsed query expression");
        Ok(self.ast.get_or_init(|| Arc::new(statement)).as_ref())
    }

    fn stream_nodes(ast: &Statement) -> Vec<StreamNode> {
        ast.listup(NodeKind::Stream)
            .into_iter()
            .filter_map(|node| match node {
                Node::Stream(stream) => Some(stream),
                Node::Subquery(_) => None,
            })
            .collect()
    }

    /// Sorted unique stream names, including those of nested subqueries.
    pub fn targets(&self) -> Result<&[String]> {
        if let Some(targets) = self.targets.get() {
            return Ok(targets);
        }
        let mut targets: Vec<String> = Self::stream_nodes(self.ast()?)
            .into_iter()
            .map(|s| s.target)
            .collect();
        for subquery in self.subqueries()? {
            targets.extend(subquery.targets()?.iter().cloned());
        }
        targets.sort();
        targets.dedup();
        Ok(self.targets.get_or_init(|| targets).as_slice())
    }

    /// Sorted unique stream aliases, including those of nested subqueries.
    pub fn aliases(&self) -> Result<&[String]> {
        if let Some(aliases) = self.aliases.get() {
            return Ok(aliases);
        }
        let mut aliases: Vec<String> = Self::stream_nodes(self.ast()?)
            .into_iter()
            .filter_map(|s| s.alias)
            .collect();
        for subquery in self.subqueries()? {
            aliases.extend(subquery.aliases()?.iter().cloned());
        }
        aliases.sort();
        aliases.dedup();
        Ok(self.aliases.get_or_init(|| aliases).as_slice())
    }

    /// Direct subquery scopes, in the order they appear.
    pub fn subqueries(&self) -> Result<&[Query]> {
        if let Some(subqueries) = self.subqueries.get() {
            return Ok(subqueries);
        }
        let subqueries: Vec<Query> = self
            .ast()?
            .listup(NodeKind::Subquery)
            .into_iter()
            .filter_map(|node| match node {
                Node::Subquery(fragment) => Some(Query::from_fragment(fragment, self.options)),
                Node::Stream(_) => None,
            })
            .collect();
        Ok(self.subqueries.get_or_init(|| subqueries).as_slice())
    }

    /// Fields referenced for `target`: `Some("")` gives every field,
    /// `None` the fields whose target could not be determined.
    pub fn fields(&self, target: Option<&str>) -> Result<&[String]> {
        if let Some(fields) = self.fields.get() {
            return Ok(fields.get(target));
        }
        let explored = self.explore(&[], &BTreeMap::new())?;
        Ok(self.fields.get_or_init(|| explored).get(target))
    }

    pub fn to_descriptor(&self) -> Result<QueryDescriptor> {
        Ok(QueryDescriptor {
            name: match &self.scope {
                Scope::Root { name, .. } => name.clone(),
                Scope::Subquery => None,
            },
            group: self.group().map(String::from),
            expression: self.expression().to_string(),
            targets: self.targets()?.to_vec(),
        })
    }

    /// A copy of this query reading its first target from stream `actual`
    /// instead. Subquery scopes are returned as they are.
    pub fn with_stream_name(&self, actual: &str) -> Result<Query> {
        let Scope::Root { name, group, .. } = &self.scope else {
            return Ok(self.clone());
        };
        let first = self
            .targets()?
            .first()
            .cloned()
            .ok_or_else(|| Error::query("query has no target stream"))?;

        let mapping: Mapping = self
            .targets()?
            .iter()
            .map(|t| (t.clone(), t.clone()))
            .chain(std::iter::once((first, actual.to_string())))
            .collect();
        let mut statement = self.ast()?.clone();
        rewrite::EventTypeNameRewrite.rewrite(&mut statement, &mapping)?;

        let query = Query::with_options(
            QueryParams {
                name: name.clone(),
                group: group.clone(),
                expression: compile(&statement),
            },
            self.options,
        );
        if !query.targets()?.iter().any(|t| t == actual) {
            return Err(Error::query(format!(
                "failed to replace query target into stream name: {}",
                actual
            )));
        }
        Ok(query)
    }

    /// True when every field this query uses for `target`, and every field
    /// whose target is undetermined, is present in `fieldset`.
    pub fn is_satisfied_by(&self, target: &str, fieldset: &FieldSet) -> Result<bool> {
        let own = self.fields(Some(target))?;
        let unknown = self.fields(None)?;
        Ok(fieldset.covers(own.iter().chain(unknown).map(String::as_str)))
    }

    /// Targets that have no entry in `mapping`.
    pub fn missing_mappings(&self, mapping: &Mapping) -> Result<Vec<String>> {
        Ok(self
            .targets()?
            .iter()
            .filter(|t| !mapping.contains_key(*t))
            .cloned()
            .collect())
    }
}

impl Clone for Query {
    /// A root query clones into a fresh, unanalyzed instance over the same
    /// expression. A subquery clone shares its fragment and caches.
    fn clone(&self) -> Self {
        match &self.scope {
            Scope::Root {
                name,
                group,
                expression,
            } => Query::with_options(
                QueryParams {
                    name: name.clone(),
                    group: group.clone(),
                    expression: expression.clone(),
                },
                self.options,
            ),
            Scope::Subquery => Query {
                scope: Scope::Subquery,
                statement_name: None,
                fieldsets: BTreeMap::new(),
                options: self.options,
                ast: self.ast.clone(),
                targets: self.targets.clone(),
                aliases: self.aliases.clone(),
                subqueries: self.subqueries.clone(),
                fields: self.fields.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(expression: &str) -> Query {
        Query::new(QueryParams::expression(expression))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_stream_without_alias() {
        let q = query("select * from Target");
        assert_eq!(q.targets().unwrap(), names(&["Target"]).as_slice());
        assert!(q.aliases().unwrap().is_empty());
        assert!(q.subqueries().unwrap().is_empty());
    }

    #[test]
    fn test_container_field_example() {
        let q = query("select field.key1 from Target");
        assert_eq!(q.targets().unwrap(), names(&["Target"]).as_slice());
        assert_eq!(
            q.fields(Some("Target")).unwrap(),
            names(&["field.key1"]).as_slice()
        );
        assert!(q.fields(None).unwrap().is_empty());
    }

    #[test]
    fn test_join_example() {
        let q = query("select count(*) from Target1 as t1, Target2 as t2 where t1.v = t2.v");
        assert_eq!(q.targets().unwrap(), names(&["Target1", "Target2"]).as_slice());
        assert_eq!(q.aliases().unwrap(), names(&["t1", "t2"]).as_slice());
        assert_eq!(q.fields(Some("Target1")).unwrap(), names(&["v"]).as_slice());
        assert_eq!(q.fields(Some("Target2")).unwrap(), names(&["v"]).as_slice());
        assert_eq!(q.fields(Some("")).unwrap(), names(&["v"]).as_slice());
    }

    #[test]
    fn test_targets_and_aliases_disjoint() {
        let q = query("select * from Target1 as t, Target2 where t.x = Target2.y");
        let targets = q.targets().unwrap();
        assert!(q.aliases().unwrap().iter().all(|a| !targets.contains(a)));

        let q = query("select * from Target1, Target2 as Target1");
        assert!(q.fields(Some("")).unwrap_err().is_client());
    }

    #[test]
    fn test_unknown_qualifier_is_client_error() {
        // An inherited alias pointing at a target that is not visible here.
        let q = query("select x.v from A");
        let overridden: BTreeMap<String, String> =
            [("x".to_string(), "Ghost".to_string())].into_iter().collect();
        let err = q.explore(&[], &overridden).unwrap_err();
        assert_eq!(err, Error::client("unknown target alias name for: x.v"));

        let q = query("select * from A as a, B as b where a.v = b.v");
        assert!(q.fields(Some("")).is_ok());
    }

    #[test]
    fn test_fresh_instances_agree() {
        let text = "select a.x, y from A as a, B where a.x = y and exists (select * from C where z > 0)";
        let first = query(text);
        let second = query(text);
        assert_eq!(first.targets().unwrap(), second.targets().unwrap());
        assert_eq!(first.aliases().unwrap(), second.aliases().unwrap());
        for target in [Some(""), None, Some("A"), Some("B"), Some("C")] {
            assert_eq!(first.fields(target).unwrap(), second.fields(target).unwrap());
        }
    }

    #[test]
    fn test_all_fields_is_union_of_buckets() {
        let q = query(
            "select a.x, y, b.z from A as a, B as b where a.w in (select v from C)",
        );
        let mut union: Vec<String> = Vec::new();
        for target in q.targets().unwrap() {
            union.extend(q.fields(Some(target)).unwrap().iter().cloned());
        }
        union.extend(q.fields(None).unwrap().iter().cloned());
        union.sort();
        union.dedup();
        assert_eq!(q.fields(Some("")).unwrap(), union.as_slice());
        assert_eq!(q.fields(None).unwrap(), names(&["y"]).as_slice());
    }

    #[test]
    fn test_subqueries_and_nested_targets() {
        let q = query(
            "select (select max(v) from B as b) as mx from A \
             where x in (select x from C where y = (select min(y) from D))",
        );
        let subqueries = q.subqueries().unwrap();
        assert_eq!(subqueries.len(), 2);
        assert!(subqueries.iter().all(Query::is_subquery));
        assert_eq!(subqueries[0].name(), "");
        assert_eq!(subqueries[0].expression(), "");
        assert_eq!(subqueries[1].subqueries().unwrap().len(), 1);

        assert_eq!(q.targets().unwrap(), names(&["A", "B", "C", "D"]).as_slice());
        assert_eq!(q.aliases().unwrap(), names(&["b"]).as_slice());
    }

    #[test]
    fn test_subquery_default_and_outer_qualification() {
        // Two possible owners in the outer scope; the subquery's own single
        // stream owns `w`, and `A.k` qualifies against the outer scope.
        let q = query(
            "select * from A, B where exists (select * from C where w = A.k)",
        );
        assert_eq!(q.fields(Some("C")).unwrap(), names(&["w"]).as_slice());
        assert_eq!(q.fields(Some("A")).unwrap(), names(&["k"]).as_slice());
        assert!(q.fields(None).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_is_query_error() {
        let q = query("select from where");
        let err = q.targets().unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        // Failures are not cached.
        assert!(q.targets().is_err());
    }

    #[test]
    fn test_clone_semantics() {
        let q = Query::new(QueryParams {
            name: Some("q1".into()),
            group: Some("g".into()),
            expression: "select * from A where x in (select x from B)".into(),
        });
        q.targets().unwrap();
        let copy = q.clone();
        assert_eq!(copy.name(), "q1");
        assert_eq!(copy.group(), Some("g"));
        assert_eq!(copy.expression(), q.expression());
        assert!(copy.targets.get().is_none());

        let sub = &q.subqueries().unwrap()[0];
        sub.targets().unwrap();
        let sub_copy = sub.clone();
        assert!(sub_copy.targets.get().is_some());
        assert!(Arc::ptr_eq(
            sub.ast.get().unwrap(),
            sub_copy.ast.get().unwrap()
        ));
    }

    #[test]
    fn test_to_descriptor() {
        let q = Query::new(QueryParams {
            name: Some("count_events".into()),
            group: None,
            expression: "select count(*) from B, A".into(),
        });
        let descriptor = q.to_descriptor().unwrap();
        assert_eq!(descriptor.name.as_deref(), Some("count_events"));
        assert_eq!(descriptor.group, None);
        assert_eq!(descriptor.targets, names(&["A", "B"]));

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["expression"], "select count(*) from B, A");
        assert_eq!(json["targets"][1], "B");
    }

    #[test]
    fn test_with_stream_name() {
        let q = Query::new(QueryParams {
            name: Some("q".into()),
            group: None,
            expression: "select count(*) from Target.win:time(5 sec) where x > 1".into(),
        });
        let actual = q.with_stream_name("Target_0001").unwrap();
        assert_eq!(actual.name(), "q");
        assert_eq!(actual.targets().unwrap(), names(&["Target_0001"]).as_slice());
        assert_eq!(
            actual.expression(),
            "SELECT count(*) FROM Target_0001.win:time(5 sec) WHERE x > 1"
        );
    }

    #[test]
    fn test_is_satisfied_by() {
        let q = query("select a.x, y from A as a, B where a.x > 0");
        let full: FieldSet = [("x", "long"), ("y", "string")].into_iter().collect();
        let partial: FieldSet = [("x", "long")].into_iter().collect();
        assert!(q.is_satisfied_by("A", &full).unwrap());
        assert!(!q.is_satisfied_by("A", &partial).unwrap());
    }

    #[test]
    fn test_missing_mappings() {
        let q = query("select * from A, B where exists (select * from C)");
        let mapping: Mapping = [("A".to_string(), "A_1".to_string())].into_iter().collect();
        assert_eq!(q.missing_mappings(&mapping).unwrap(), names(&["B", "C"]));
    }

    #[test]
    fn test_query_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Query>();
    }
}
