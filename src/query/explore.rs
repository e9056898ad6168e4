//! Field resolution across nested query scopes.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::Query;
use crate::error::{Error, Result};

/// Fields referenced by a query, bucketed by owning target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldMap {
    /// Target name -> sorted unique field names.
    pub targets: BTreeMap<String, Vec<String>>,
    /// Every field referenced, with the target qualifier stripped. Fields
    /// behind a pattern-stream or method-stream alias belong to no event
    /// type and are left out, so this is exactly the union of `targets` and
    /// `unknown`.
    pub all: Vec<String>,
    /// Fields whose owning target could not be decided.
    pub unknown: Vec<String>,
}

impl FieldMap {
    /// `Some("")` is the all-fields bucket, `None` the unresolved one. A
    /// target the query never references has no fields.
    pub fn get(&self, target: Option<&str>) -> &[String] {
        match target {
            Some("") => &self.all,
            Some(name) => self.targets.get(name).map(Vec::as_slice).unwrap_or(&[]),
            None => &self.unknown,
        }
    }
}

impl Query {
    /// Resolve the fields of this scope and all scopes nested in it.
    ///
    /// `outer_targets` are the targets visible from enclosing scopes and
    /// `alias_overridden` their alias table; both are empty for a root query.
    pub fn explore(
        &self,
        outer_targets: &[String],
        alias_overridden: &BTreeMap<String, String>,
    ) -> Result<FieldMap> {
        let ast = self.ast()?;

        let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut alias_map = alias_overridden.clone();
        for node in Self::stream_nodes(ast) {
            if let Some(alias) = node.alias {
                alias_map.insert(alias, node.target.clone());
            }
            fields.insert(node.target, Vec::new());
        }

        let dup_aliases: Vec<&str> = alias_map
            .keys()
            .filter(|alias| fields.contains_key(*alias))
            .map(String::as_str)
            .collect();
        if !dup_aliases.is_empty() {
            return Err(Error::client(format!(
                "Invalid alias '{}', same with target name",
                dup_aliases.join(",")
            )));
        }

        let default_target = if fields.len() == 1 {
            fields.keys().next().cloned()
        } else {
            None
        };

        for target in outer_targets {
            fields.entry(target.clone()).or_default();
        }

        let visible: Vec<String> = fields.keys().cloned().collect();
        let mut field_bag = Vec::new();
        for subquery in self.subqueries()? {
            field_bag.push(subquery.explore(&visible, &alias_map)?);
        }

        let mut known = visible;
        known.extend(alias_map.keys().cloned());

        let mut all = Vec::new();
        let mut unknowns = Vec::new();
        for field_ref in ast.fields(default_target.as_deref(), &known) {
            all.push(field_ref.field.clone());
            match field_ref.target {
                Some(qualifier) => {
                    let target = alias_map.get(&qualifier).unwrap_or(&qualifier);
                    match fields.get_mut(target) {
                        Some(bucket) => bucket.push(field_ref.field),
                        None => {
                            return Err(Error::client(format!(
                                "unknown target alias name for: {}.{}",
                                qualifier, field_ref.field
                            )))
                        }
                    }
                }
                None => unknowns.push(field_ref.field),
            }
        }

        for bag in field_bag {
            all.extend(bag.all);
            unknowns.extend(bag.unknown);
            for (target, names) in bag.targets {
                fields.entry(target).or_default().extend(names);
            }
        }

        for names in fields.values_mut() {
            sort_unique(names);
        }
        sort_unique(&mut all);
        sort_unique(&mut unknowns);

        debug!(
            targets = fields.len(),
            fields = all.len(),
            unknown = unknowns.len(),
            "explored query scope"
        );

        Ok(FieldMap {
            targets: fields,
            all,
            unknown: unknowns,
        })
    }
}

fn sort_unique(names: &mut Vec<String>) {
    names.sort();
    names.dedup();
}
