/// Node lookup and field-reference extraction over one statement scope.
///
/// A scope is one select statement without the interiors of its nested
/// subqueries. Streams and field references inside a subquery belong to the
/// subquery's own scope and are reached through `listup(NodeKind::Subquery)`.
use std::sync::Arc;

use super::types::*;

/// Node kinds that `Statement::listup` can search for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Stream,
    Subquery,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Stream(StreamNode),
    Subquery(Arc<Statement>),
}

/// An event stream bound at a scope: a filter stream, or a filter atom of
/// a pattern (whose tag acts as the alias).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNode {
    pub target: String,
    pub alias: Option<String>,
}

/// A field referenced at a scope. `target` is the qualifier as written
/// (a target or an alias), or the default target for an unqualified field,
/// or `None` when the owner cannot be decided here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub field: String,
    pub target: Option<String>,
}

/// A root expression of a scope, with the default owner that applies to
/// it when the scope-wide default is overridden (stream filters and views).
struct Root<'a> {
    expr: &'a Expression,
    owner: Option<&'a str>,
}

impl Statement {
    /// Nodes of `kind` at this scope. Subqueries already found are not
    /// searched for further subqueries.
    pub fn listup(&self, kind: NodeKind) -> Vec<Node> {
        match kind {
            NodeKind::Stream => self
                .from
                .streams
                .iter()
                .flat_map(|s| s.filters())
                .map(|(filter, alias)| {
                    Node::Stream(StreamNode {
                        target: filter.event_type_name.clone(),
                        alias: alias.map(String::from),
                    })
                })
                .collect(),
            NodeKind::Subquery => {
                let mut out = Vec::new();
                for root in self.roots() {
                    collect_subqueries(root.expr, &mut out);
                }
                out.into_iter().map(Node::Subquery).collect()
            }
        }
    }

    /// Aliases of streams that do not bind a single event type (pattern
    /// streams and method invocation streams). Fields qualified by one of
    /// these are not attributed to any target.
    pub fn opaque_aliases(&self) -> Vec<&str> {
        self.from
            .streams
            .iter()
            .filter(|s| !matches!(s, Stream::Filter(_)))
            .filter_map(|s| s.alias())
            .collect()
    }

    /// Field references at this scope.
    ///
    /// A dotted name whose first segment is in `known` is qualified by that
    /// segment; any other name belongs to the default owner of its position
    /// (the stream's own type inside a stream filter or view, otherwise
    /// `default_target`).
    pub fn fields(&self, default_target: Option<&str>, known: &[String]) -> Vec<FieldRef> {
        let opaque = self.opaque_aliases();
        let mut out = Vec::new();
        for root in self.roots() {
            let owner = root.owner.or(default_target);
            collect_fields(root.expr, owner, known, &opaque, &mut out);
        }
        out
    }

    fn roots(&self) -> Vec<Root<'_>> {
        let mut roots = Vec::new();

        for stream in &self.from.streams {
            let view_owner = match stream {
                Stream::Filter(s) => {
                    let owner = Some(s.filter.event_type_name.as_str());
                    if let Some(expr) = &s.filter.expression {
                        roots.push(Root { expr, owner });
                    }
                    owner
                }
                Stream::Pattern(s) => {
                    pattern_roots(&s.expression, &mut roots);
                    None
                }
                Stream::Method(s) => {
                    roots.extend(s.parameters.iter().map(|expr| Root { expr, owner: None }));
                    None
                }
            };
            for view in stream.views() {
                roots.extend(view.parameters.iter().map(|expr| Root {
                    expr,
                    owner: view_owner,
                }));
            }
        }

        let scoped = self
            .select
            .items
            .iter()
            .filter_map(SelectItem::expression)
            .chain(self.filter.iter())
            .chain(self.group_by.iter())
            .chain(self.having.iter())
            .chain(self.order_by.iter().map(|o| &o.expr));
        roots.extend(scoped.map(|expr| Root { expr, owner: None }));

        roots
    }
}

fn pattern_roots<'a>(pattern: &'a PatternExpr, roots: &mut Vec<Root<'a>>) {
    match pattern {
        PatternExpr::Filter { filter, .. } => {
            if let Some(expr) = &filter.expression {
                roots.push(Root {
                    expr,
                    owner: Some(filter.event_type_name.as_str()),
                });
            }
        }
        PatternExpr::Observer { parameters, .. } => {
            roots.extend(parameters.iter().map(|expr| Root { expr, owner: None }));
        }
        PatternExpr::Every(inner) | PatternExpr::Not(inner) | PatternExpr::Nested(inner) => {
            pattern_roots(inner, roots)
        }
        PatternExpr::And(items) | PatternExpr::Or(items) | PatternExpr::FollowedBy(items) => {
            for item in items {
                pattern_roots(item, roots);
            }
        }
    }
}

/// Operands, function arguments and chain arguments of `expr`.
fn nested(expr: &Expression) -> impl Iterator<Item = &Expression> {
    let chain_params = expr
        .chain()
        .unwrap_or(&[])
        .iter()
        .flat_map(|item| item.parameters.iter());
    expr.children()
        .into_iter()
        .chain(expr.parameters().iter())
        .chain(chain_params)
}

fn collect_subqueries(expr: &Expression, out: &mut Vec<Arc<Statement>>) {
    if let Some(statement) = expr.subquery() {
        out.push(Arc::clone(statement));
    }
    for child in nested(expr) {
        collect_subqueries(child, out);
    }
}

fn collect_fields(
    expr: &Expression,
    owner: Option<&str>,
    known: &[String],
    opaque: &[&str],
    out: &mut Vec<FieldRef>,
) {
    let name = match expr {
        Expression::Property(name) => Some(name.as_str()),
        Expression::Dot {
            target: None,
            chain,
        } => chain
            .first()
            .filter(|item| item.is_property)
            .map(|item| item.name.as_str()),
        _ => None,
    };
    if let Some(field) = name.and_then(|n| classify(n, owner, known, opaque)) {
        out.push(field);
    }

    for child in nested(expr) {
        collect_fields(child, owner, known, opaque, out);
    }
}

/// `None` for a field behind an opaque alias, which no event type owns.
fn classify(name: &str, owner: Option<&str>, known: &[String], opaque: &[&str]) -> Option<FieldRef> {
    if let Some((head, rest)) = name.split_once('.') {
        if opaque.contains(&head) {
            return None;
        }
        if known.iter().any(|k| k == head) {
            return Some(FieldRef {
                field: rest.to_string(),
                target: Some(head.to_string()),
            });
        }
    }
    Some(FieldRef {
        field: name.to_string(),
        target: owner.map(String::from),
    })
}
