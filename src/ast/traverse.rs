/// Clause traversal shared by the rewrite passes.
///
/// `traverse` walks the stream, select and where positions of a statement
/// and hands every expression node to a `Visitor`. Nested subquery
/// statements are not entered automatically; the visitor decides what to
/// do with them in `on_subquery`.
use super::types::*;
use crate::error::Result;

pub trait Visitor {
    /// Called for every visited expression node, parents before children.
    fn on_node(&mut self, node: &mut Expression) -> Result<()>;

    /// Called with the statement of a subquery node, right after `on_node`
    /// for that node.
    fn on_subquery(&mut self, statement: &mut Statement) -> Result<()>;
}

/// Visit, in order: each stream's pattern filters and observer parameters,
/// filter expression, method parameters and view parameters; then the
/// select list; then the where clause.
///
/// Group by, having, order by and output clauses are not visited.
pub fn traverse<V: Visitor + ?Sized>(statement: &mut Statement, visitor: &mut V) -> Result<()> {
    for stream in statement.from.streams.iter_mut() {
        match stream {
            Stream::Pattern(s) => {
                for expr in s.expression.expressions_mut() {
                    dig(expr, visitor)?;
                }
            }
            Stream::Filter(s) => {
                if let Some(expr) = s.filter.expression.as_mut() {
                    dig(expr, visitor)?;
                }
            }
            Stream::Method(s) => {
                for expr in s.parameters.iter_mut() {
                    dig(expr, visitor)?;
                }
            }
        }
        if let Some(views) = stream.views_mut() {
            for view in views.iter_mut() {
                for param in view.parameters.iter_mut() {
                    dig(param, visitor)?;
                }
            }
        }
    }

    for item in statement.select.items.iter_mut() {
        if let Some(expr) = item.expression_mut() {
            dig(expr, visitor)?;
        }
    }

    if let Some(filter) = statement.filter.as_mut() {
        dig(filter, visitor)?;
    }

    Ok(())
}

fn dig<V: Visitor + ?Sized>(node: &mut Expression, visitor: &mut V) -> Result<()> {
    visitor.on_node(node)?;

    if let Some(statement) = node.subquery_mut() {
        visitor.on_subquery(statement)?;
    }
    for child in node.children_mut() {
        dig(child, visitor)?;
    }
    if let Some(params) = node.parameters_mut() {
        for param in params.iter_mut() {
            dig(param, visitor)?;
        }
    }
    if let Some(chain) = node.chain_mut() {
        for item in chain.iter_mut() {
            for param in item.parameters.iter_mut() {
                dig(param, visitor)?;
            }
        }
    }

    Ok(())
}
