/// Statement model → EPL compiler.
///
/// Converts a (possibly rewritten) statement back into EPL text. Together
/// with the parser this gives round-trip parsing: EPL → model → EPL, which is
/// how rewritten queries are handed to the engine.
use std::borrow::Cow;

use super::parser::is_reserved;
use super::types::*;

/// Compile a statement into an EPL string.
pub fn compile(statement: &Statement) -> String {
    let mut parts = Vec::new();

    // SELECT [ISTREAM|RSTREAM|IRSTREAM] [DISTINCT]
    let mut select_clause = String::from("SELECT ");
    match statement.select.stream_selector {
        Some(StreamSelector::IStream) => select_clause.push_str("ISTREAM "),
        Some(StreamSelector::RStream) => select_clause.push_str("RSTREAM "),
        Some(StreamSelector::IRStream) => select_clause.push_str("IRSTREAM "),
        None => {}
    }
    if statement.select.distinct {
        select_clause.push_str("DISTINCT ");
    }

    if statement.select.items.is_empty() {
        select_clause.push('*');
    } else {
        let items: Vec<String> = statement
            .select
            .items
            .iter()
            .map(compile_select_item)
            .collect();
        select_clause.push_str(&items.join(", "));
    }
    parts.push(select_clause);

    // FROM
    let streams: Vec<String> = statement.from.streams.iter().map(compile_stream).collect();
    parts.push(format!("FROM {}", streams.join(", ")));

    // WHERE
    if let Some(ref filter) = statement.filter {
        parts.push(format!("WHERE {}", compile_expr(filter)));
    }

    // GROUP BY
    if !statement.group_by.is_empty() {
        let groups: Vec<String> = statement.group_by.iter().map(compile_expr).collect();
        parts.push(format!("GROUP BY {}", groups.join(", ")));
    }

    // HAVING
    if let Some(ref having) = statement.having {
        parts.push(format!("HAVING {}", compile_expr(having)));
    }

    // OUTPUT
    if let Some(ref output) = statement.output {
        parts.push(compile_output(output));
    }

    // ORDER BY
    if !statement.order_by.is_empty() {
        let orders: Vec<String> = statement.order_by.iter().map(compile_order_by).collect();
        parts.push(format!("ORDER BY {}", orders.join(", ")));
    }

    // LIMIT
    if let Some(ref limit) = statement.limit {
        match limit.offset {
            Some(offset) => parts.push(format!("LIMIT {} OFFSET {}", limit.count, offset)),
            None => parts.push(format!("LIMIT {}", limit.count)),
        }
    }

    parts.join(" ")
}

fn compile_select_item(item: &SelectItem) -> String {
    match item {
        SelectItem::Wildcard => "*".to_string(),
        SelectItem::QualifiedWildcard(stream) => format!("{}.*", quote_ident(stream)),
        SelectItem::Expression { expr, alias } => {
            let expr_str = compile_expr(expr);
            match alias {
                Some(a) => format!("{} AS {}", expr_str, quote_ident(a)),
                None => expr_str,
            }
        }
    }
}

fn compile_stream(stream: &Stream) -> String {
    let mut s = match stream {
        Stream::Filter(f) => {
            let mut s = compile_filter(&f.filter);
            s.push_str(&compile_views(&f.views));
            s
        }
        Stream::Pattern(p) => {
            let mut s = format!("PATTERN [{}]", compile_pattern(&p.expression));
            s.push_str(&compile_views(&p.views));
            s
        }
        Stream::Method(m) => {
            let class: Vec<Cow<str>> = m.class_name.split('.').map(quote_ident).collect();
            format!(
                "method:{}.{}({})",
                class.join("."),
                quote_ident(&m.method_name),
                compile_list(&m.parameters)
            )
        }
    };
    if let Some(a) = stream.alias() {
        s.push_str(&format!(" AS {}", quote_ident(a)));
    }
    s
}

fn compile_filter(filter: &Filter) -> String {
    match &filter.expression {
        Some(expr) => format!(
            "{}({})",
            quote_ident(&filter.event_type_name),
            compile_expr(expr)
        ),
        None => quote_ident(&filter.event_type_name).into_owned(),
    }
}

fn compile_views(views: &[View]) -> String {
    views
        .iter()
        .map(|v| {
            format!(
                ".{}:{}({})",
                quote_ident(&v.namespace),
                quote_ident(&v.name),
                compile_list(&v.parameters)
            )
        })
        .collect()
}

fn compile_pattern(pattern: &PatternExpr) -> String {
    let join = |items: &[PatternExpr], sep: &str| {
        items
            .iter()
            .map(compile_pattern)
            .collect::<Vec<_>>()
            .join(sep)
    };

    match pattern {
        PatternExpr::Filter { tag, filter } => match tag {
            Some(t) => format!("{}={}", quote_ident(t), compile_filter(filter)),
            None => compile_filter(filter),
        },
        PatternExpr::Observer {
            namespace,
            name,
            parameters,
        } => format!(
            "{}:{}({})",
            quote_ident(namespace),
            quote_ident(name),
            compile_list(parameters)
        ),
        PatternExpr::Every(inner) => format!("EVERY {}", compile_pattern(inner)),
        PatternExpr::Not(inner) => format!("NOT {}", compile_pattern(inner)),
        PatternExpr::And(items) => join(items, " AND "),
        PatternExpr::Or(items) => join(items, " OR "),
        PatternExpr::FollowedBy(items) => join(items, " -> "),
        PatternExpr::Nested(inner) => format!("({})", compile_pattern(inner)),
    }
}

fn compile_list(exprs: &[Expression]) -> String {
    exprs.iter().map(compile_expr).collect::<Vec<_>>().join(", ")
}

fn compile_time_period(parts: &[TimePeriodPart]) -> String {
    parts
        .iter()
        .map(|p| format!("{} {}", p.amount, p.unit.keyword()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn compile_expr(expr: &Expression) -> String {
    match expr {
        Expression::Property(name) => quote_path(name, true),
        Expression::Literal(lit) => compile_literal(lit),
        Expression::TimePeriod(parts) => compile_time_period(parts),
        Expression::Wildcard => "*".to_string(),
        Expression::Binary { left, op, right } => {
            let op_str = match op {
                BinaryOperator::Eq => "=",
                BinaryOperator::NotEq => "!=",
                BinaryOperator::Lt => "<",
                BinaryOperator::LtEq => "<=",
                BinaryOperator::Gt => ">",
                BinaryOperator::GtEq => ">=",
                BinaryOperator::And => "AND",
                BinaryOperator::Or => "OR",
                BinaryOperator::Plus => "+",
                BinaryOperator::Minus => "-",
                BinaryOperator::Multiply => "*",
                BinaryOperator::Divide => "/",
                BinaryOperator::Modulo => "%",
                BinaryOperator::Like => "LIKE",
                BinaryOperator::NotLike => "NOT LIKE",
                BinaryOperator::Regexp => "REGEXP",
                BinaryOperator::NotRegexp => "NOT REGEXP",
                BinaryOperator::Concat => "||",
            };
            format!("{} {} {}", compile_expr(left), op_str, compile_expr(right))
        }
        Expression::Unary { op, expr } => {
            let op_str = match op {
                UnaryOperator::Not => "NOT",
                UnaryOperator::Minus => "-",
                UnaryOperator::Plus => "+",
            };
            format!("{} {}", op_str, compile_expr(expr))
        }
        Expression::Function {
            name,
            distinct,
            args,
        } => {
            let distinct_str = if *distinct { "DISTINCT " } else { "" };
            format!("{}({}{})", quote_ident(name), distinct_str, compile_list(args))
        }
        Expression::Dot { target, chain } => {
            let items: Vec<String> = chain
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    if item.is_property {
                        quote_path(&item.name, i == 0 && target.is_none())
                    } else {
                        format!(
                            "{}({})",
                            quote_segment(&item.name),
                            compile_list(&item.parameters)
                        )
                    }
                })
                .collect();
            match target {
                Some(t) => format!("{}.{}", compile_expr(t), items.join(".")),
                None => items.join("."),
            }
        }
        Expression::Case {
            operand,
            when_clauses,
            else_clause,
        } => {
            let mut s = String::from("CASE");
            if let Some(op) = operand {
                s.push_str(&format!(" {}", compile_expr(op)));
            }
            for (when, then) in when_clauses {
                s.push_str(&format!(
                    " WHEN {} THEN {}",
                    compile_expr(when),
                    compile_expr(then)
                ));
            }
            if let Some(else_expr) = else_clause {
                s.push_str(&format!(" ELSE {}", compile_expr(else_expr)));
            }
            s.push_str(" END");
            s
        }
        Expression::InList {
            expr,
            list,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!("{} {}IN ({})", compile_expr(expr), not_str, compile_list(list))
        }
        Expression::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}BETWEEN {} AND {}",
                compile_expr(expr),
                not_str,
                compile_expr(low),
                compile_expr(high)
            )
        }
        Expression::IsNull { expr, negated } => {
            if *negated {
                format!("{} IS NOT NULL", compile_expr(expr))
            } else {
                format!("{} IS NULL", compile_expr(expr))
            }
        }
        Expression::Subquery(s) => format!("({})", compile(s)),
        Expression::Exists(s) => format!("EXISTS ({})", compile(s)),
        Expression::InSubquery {
            expr,
            subquery,
            negated,
        } => {
            let not_str = if *negated { "NOT " } else { "" };
            format!(
                "{} {}IN ({})",
                compile_expr(expr),
                not_str,
                compile(subquery)
            )
        }
        Expression::Nested(expr) => format!("({})", compile_expr(expr)),
    }
}

fn compile_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Boolean(b) => {
            if *b {
                "TRUE".to_string()
            } else {
                "FALSE".to_string()
            }
        }
        Literal::Integer(i) => i.to_string(),
        // Debug keeps the decimal point so the value re-parses as a float.
        Literal::Float(f) => format!("{:?}", f),
        Literal::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

fn compile_output(output: &OutputLimit) -> String {
    let selector = match output.selector {
        Some(OutputSelector::All) => "ALL ",
        Some(OutputSelector::First) => "FIRST ",
        Some(OutputSelector::Last) => "LAST ",
        Some(OutputSelector::Snapshot) => "SNAPSHOT ",
        None => "",
    };
    let rate = match &output.rate {
        OutputRate::Events(n) => format!("{} EVENTS", n),
        OutputRate::Time(parts) => compile_time_period(parts),
    };
    format!("OUTPUT {}EVERY {}", selector, rate)
}

/// Backtick-quote a name that would not read back as the same identifier.
fn quote_ident(name: &str) -> Cow<'_, str> {
    if is_plain_word(name) && !is_reserved(name) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("`{}`", name))
    }
}

/// Segments after a period may be reserved words, indexes or `$N`.
fn quote_segment(segment: &str) -> Cow<'_, str> {
    let index = !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit());
    let placeholder = segment
        .strip_prefix('$')
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    if index || placeholder || is_plain_word(segment) {
        Cow::Borrowed(segment)
    } else {
        Cow::Owned(format!("`{}`", segment))
    }
}

/// `leading` marks a path that starts an expression, whose head is read as
/// an identifier.
fn quote_path(path: &str, leading: bool) -> String {
    path.split('.')
        .enumerate()
        .map(|(i, segment)| {
            let placeholder = segment.starts_with('$');
            if i == 0 && leading && !placeholder {
                quote_ident(segment)
            } else {
                quote_segment(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn is_plain_word(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn compile_order_by(order: &OrderByExpr) -> String {
    let mut s = compile_expr(&order.expr);
    match order.asc {
        Some(true) => s.push_str(" ASC"),
        Some(false) => s.push_str(" DESC"),
        None => {}
    }
    s
}
