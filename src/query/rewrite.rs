/// Rewriting of stream and field names into engine-registered identifiers.
///
/// Provides a pass-based pipeline over a mutable statement. The default
/// pipeline renames event types first, then fully-qualified field accesses,
/// both recursing into nested subquery statements.
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{Query, QueryParams};
use crate::ast::compiler::compile;
use crate::ast::{traverse, Expression, ParserOptions, Statement, Visitor};
use crate::error::{Error, Result};
use crate::field::escape_name;

/// Logical target or alias name -> registered name.
pub type Mapping = BTreeMap<String, String>;

/// A single rewrite pass over a statement.
///
/// # Example
///
/// ```ignore
/// struct Lowercase;
///
/// impl RewritePass for Lowercase {
///     fn name(&self) -> &str { "lowercase" }
///     fn rewrite(&self, statement: &mut Statement, mapping: &Mapping) -> Result<()> {
///         // edit the statement in place
///     }
/// }
/// ```
pub trait RewritePass: Send + Sync {
    /// Unique name identifying this pass.
    fn name(&self) -> &str;

    /// Optional description of what this pass does.
    fn description(&self) -> &str {
        ""
    }

    /// Rewrite `statement` in place.
    fn rewrite(&self, statement: &mut Statement, mapping: &Mapping) -> Result<()>;
}

/// Manages and executes a pipeline of rewrite passes.
#[derive(Default)]
pub struct Rewriter {
    passes: Vec<Box<dyn RewritePass>>,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event type names, then field names.
    pub fn with_defaults() -> Self {
        Self::with_options(ParserOptions::default())
    }

    /// The default pipeline, re-parsing statements with `options`.
    pub fn with_options(options: ParserOptions) -> Self {
        let mut rewriter = Self::new();
        rewriter.add_pass(Box::new(EventTypeNameRewrite));
        rewriter.add_pass(Box::new(FieldNameRewrite { options }));
        rewriter
    }

    pub fn add_pass(&mut self, pass: Box<dyn RewritePass>) {
        self.passes.push(pass);
    }

    /// Run all passes on a statement in order.
    pub fn rewrite(&self, statement: &mut Statement, mapping: &Mapping) -> Result<()> {
        for pass in &self.passes {
            debug!(pass = pass.name(), "running rewrite pass");
            pass.rewrite(statement, mapping)?;
        }
        Ok(())
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

/// Rename event types and then fully-qualified field accesses of
/// `statement` according to `mapping`.
///
/// # Panics
///
/// If a stream's event type name is not a key of `mapping`. Callers can
/// check with [`Query::missing_mappings`] first.
pub fn rewrite_query(statement: &mut Statement, mapping: &Mapping) -> Result<()> {
    Rewriter::with_defaults().rewrite(statement, mapping)
}

/// Replaces every event type name with its mapped name.
pub struct EventTypeNameRewrite;

impl RewritePass for EventTypeNameRewrite {
    fn name(&self) -> &str {
        "event_type_name"
    }

    fn description(&self) -> &str {
        "Binds each stream to its registered event type"
    }

    fn rewrite(&self, statement: &mut Statement, mapping: &Mapping) -> Result<()> {
        rewrite_event_type_names(statement, mapping)
    }
}

fn rewrite_event_type_names(statement: &mut Statement, mapping: &Mapping) -> Result<()> {
    for stream in statement.from.streams.iter_mut() {
        for type_name in stream.event_type_names_mut() {
            match mapping.get(type_name.as_str()) {
                Some(mapped) => *type_name = mapped.clone(),
                None => panic!("target missing in mapping: {}", type_name),
            }
        }
    }
    traverse(statement, &mut SubqueryTypeNames { mapping })
}

struct SubqueryTypeNames<'a> {
    mapping: &'a Mapping,
}

impl Visitor for SubqueryTypeNames<'_> {
    fn on_node(&mut self, _node: &mut Expression) -> Result<()> {
        Ok(())
    }

    fn on_subquery(&mut self, statement: &mut Statement) -> Result<()> {
        rewrite_event_type_names(statement, self.mapping)
    }
}

/// Rewrites dotted field names into `qualifier.escaped_body` form.
pub struct FieldNameRewrite {
    pub options: ParserOptions,
}

impl RewritePass for FieldNameRewrite {
    fn name(&self) -> &str {
        "field_name"
    }

    fn description(&self) -> &str {
        "Qualifies and escapes container field accesses"
    }

    fn rewrite(&self, statement: &mut Statement, mapping: &Mapping) -> Result<()> {
        warn_unvisited_clauses(statement);
        rewrite_field_names(statement, mapping, &BTreeSet::new(), self.options)
    }
}

/// `inherited` holds the qualifiers of enclosing scopes, which stay legal
/// inside a subquery.
// Unlike a per-scope prefix set, `a.z.k` inside a single-stream subquery
// under an outer alias `a` becomes `a.z$k`, not `a$z$k`; `explore` resolves
// the same reference to the outer target.
fn rewrite_field_names(
    statement: &mut Statement,
    mapping: &Mapping,
    inherited: &BTreeSet<String>,
    options: ParserOptions,
) -> Result<()> {
    let query = Query::with_options(QueryParams::expression(compile(statement)), options);
    let targets = query.targets()?;

    let mut prefixes = inherited.clone();
    prefixes.extend(targets.iter().cloned());
    prefixes.extend(query.aliases()?.iter().cloned());
    prefixes.extend(statement.opaque_aliases().into_iter().map(String::from));

    let mut names = FieldNames {
        mapping,
        has_default_target: targets.len() == 1,
        prefixes,
        options,
    };
    traverse(statement, &mut names)
}

struct FieldNames<'a> {
    mapping: &'a Mapping,
    prefixes: BTreeSet<String>,
    has_default_target: bool,
    options: ParserOptions,
}

impl FieldNames<'_> {
    fn rewrite_name(&self, name: &mut String) -> Result<()> {
        let Some((first, rest)) = name.split_once('.') else {
            return Ok(());
        };

        let encoded = if self.prefixes.contains(first) || self.mapping.contains_key(first) {
            let prefix = self.mapping.get(first).map(String::as_str).unwrap_or(first);
            format!("{}.{}", prefix, escape_name(rest))
        } else if self.has_default_target {
            escape_name(name.as_str())
        } else {
            return Err(Error::query(format!(
                "target cannot be determined for field '{}'",
                name
            )));
        };

        *name = encoded;
        Ok(())
    }
}

impl Visitor for FieldNames<'_> {
    fn on_node(&mut self, node: &mut Expression) -> Result<()> {
        if let Some(name) = node.property_name_mut() {
            self.rewrite_name(name)?;
        } else if let Some(chain) = node.chain_mut() {
            for item in chain.iter_mut() {
                self.rewrite_name(&mut item.name)?;
            }
        }
        Ok(())
    }

    fn on_subquery(&mut self, statement: &mut Statement) -> Result<()> {
        rewrite_field_names(statement, self.mapping, &self.prefixes, self.options)
    }
}

fn warn_unvisited_clauses(statement: &Statement) {
    let clauses = [
        ("GROUP BY", statement.group_by.iter().any(has_dotted_name)),
        ("HAVING", statement.having.iter().any(has_dotted_name)),
        ("ORDER BY", statement.order_by.iter().any(|o| has_dotted_name(&o.expr))),
    ];
    for (clause, found) in clauses {
        if found {
            warn!(clause, "field names in this clause are not rewritten");
        }
    }
}

fn has_dotted_name(expr: &Expression) -> bool {
    let own = expr.property_name().is_some_and(|n| n.contains('.'))
        || expr
            .chain()
            .is_some_and(|chain| chain.iter().any(|item| item.name.contains('.')));
    own || expr
        .children()
        .into_iter()
        .chain(expr.parameters())
        .chain(expr.chain().unwrap_or(&[]).iter().flat_map(|item| &item.parameters))
        .any(has_dotted_name)
}
