//! EPL statement model.
//!
//! This is the mutable, engine-native representation that the parser
//! produces, the rewrite passes edit in place, and the compiler turns back
//! into EPL text. Node kinds form closed enums; the capabilities the
//! traversal and rewrite passes need (property names, chain segments,
//! children, parameters, nested statements) are methods on those enums.
use std::sync::Arc;

/// A single EPL statement: `SELECT ... FROM ... [WHERE ...] ...`.
///
/// Subqueries are statements too, restricted to the select, from and where
/// clauses with exactly one stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub select: SelectClause,
    pub from: FromClause,
    /// The WHERE clause.
    pub filter: Option<Expression>,
    pub group_by: Vec<Expression>,
    pub having: Option<Expression>,
    pub output: Option<OutputLimit>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<RowLimit>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectClause {
    pub stream_selector: Option<StreamSelector>,
    pub distinct: bool,
    pub items: Vec<SelectItem>,
}

/// `ISTREAM` / `RSTREAM` / `IRSTREAM` selector on the select clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelector {
    IStream,
    RStream,
    IRStream,
}

/// A single item in the select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `alias.*`
    QualifiedWildcard(String),
    /// An expression, optionally aliased: `expr AS alias`.
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
}

impl SelectItem {
    pub fn expression(&self) -> Option<&Expression> {
        match self {
            SelectItem::Expression { expr, .. } => Some(expr),
            _ => None,
        }
    }

    pub fn expression_mut(&mut self) -> Option<&mut Expression> {
        match self {
            SelectItem::Expression { expr, .. } => Some(expr),
            _ => None,
        }
    }
}

/// Comma-separated streams of the from clause (an implicit join when more
/// than one is present).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FromClause {
    pub streams: Vec<Stream>,
}

/// A stream in the from clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Stream {
    /// `Type(filter).ns:view(params) AS alias`
    Filter(FilterStream),
    /// `PATTERN [every a=A -> b=B] AS alias`
    Pattern(PatternStream),
    /// `method:com.example.Lookup.fetch(params) AS alias`
    Method(MethodStream),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterStream {
    pub filter: Filter,
    pub views: Vec<View>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternStream {
    pub expression: PatternExpr,
    pub views: Vec<View>,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodStream {
    pub class_name: String,
    pub method_name: String,
    pub parameters: Vec<Expression>,
    pub alias: Option<String>,
}

/// An event type name with an optional filter expression: `Type(expr)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub event_type_name: String,
    pub expression: Option<Expression>,
}

impl Filter {
    pub fn new(event_type_name: impl Into<String>) -> Self {
        Self {
            event_type_name: event_type_name.into(),
            expression: None,
        }
    }
}

/// A data window or view attached to a stream: `win:time(10 sec)`.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub namespace: String,
    pub name: String,
    pub parameters: Vec<Expression>,
}

impl Stream {
    pub fn alias(&self) -> Option<&str> {
        match self {
            Stream::Filter(s) => s.alias.as_deref(),
            Stream::Pattern(s) => s.alias.as_deref(),
            Stream::Method(s) => s.alias.as_deref(),
        }
    }

    pub fn views(&self) -> &[View] {
        match self {
            Stream::Filter(s) => s.views.as_slice(),
            Stream::Pattern(s) => s.views.as_slice(),
            Stream::Method(_) => &[],
        }
    }

    pub fn views_mut(&mut self) -> Option<&mut Vec<View>> {
        match self {
            Stream::Filter(s) => Some(&mut s.views),
            Stream::Pattern(s) => Some(&mut s.views),
            Stream::Method(_) => None,
        }
    }

    /// Event filters bound by this stream, with the name each one is known
    /// by locally (stream alias or pattern tag).
    pub fn filters(&self) -> Vec<(&Filter, Option<&str>)> {
        match self {
            Stream::Filter(s) => vec![(&s.filter, s.alias.as_deref())],
            Stream::Pattern(s) => {
                let mut out = Vec::new();
                s.expression.collect_filters(&mut out);
                out
            }
            Stream::Method(_) => Vec::new(),
        }
    }

    /// The settable event type names of this stream. Method invocation
    /// streams carry none.
    pub fn event_type_names_mut(&mut self) -> Vec<&mut String> {
        match self {
            Stream::Filter(s) => vec![&mut s.filter.event_type_name],
            Stream::Pattern(s) => {
                let mut out = Vec::new();
                s.expression.collect_filters_mut(&mut out);
                out.into_iter().map(|f| &mut f.event_type_name).collect()
            }
            Stream::Method(_) => Vec::new(),
        }
    }
}

/// Pattern expressions inside `PATTERN [...]`.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternExpr {
    /// `tag=Type(expr)`
    Filter { tag: Option<String>, filter: Filter },
    /// `timer:interval(10 sec)`
    Observer {
        namespace: String,
        name: String,
        parameters: Vec<Expression>,
    },
    Every(Box<PatternExpr>),
    Not(Box<PatternExpr>),
    And(Vec<PatternExpr>),
    Or(Vec<PatternExpr>),
    /// `a -> b -> c`
    FollowedBy(Vec<PatternExpr>),
    Nested(Box<PatternExpr>),
}

impl PatternExpr {
    fn collect_filters<'a>(&'a self, out: &mut Vec<(&'a Filter, Option<&'a str>)>) {
        match self {
            PatternExpr::Filter { tag, filter } => out.push((filter, tag.as_deref())),
            PatternExpr::Observer { .. } => {}
            PatternExpr::Every(inner) | PatternExpr::Not(inner) | PatternExpr::Nested(inner) => {
                inner.collect_filters(out)
            }
            PatternExpr::And(items) | PatternExpr::Or(items) | PatternExpr::FollowedBy(items) => {
                for item in items {
                    item.collect_filters(out);
                }
            }
        }
    }

    fn collect_filters_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Filter>) {
        match self {
            PatternExpr::Filter { filter, .. } => out.push(filter),
            PatternExpr::Observer { .. } => {}
            PatternExpr::Every(inner) | PatternExpr::Not(inner) | PatternExpr::Nested(inner) => {
                inner.collect_filters_mut(out)
            }
            PatternExpr::And(items) | PatternExpr::Or(items) | PatternExpr::FollowedBy(items) => {
                for item in items {
                    item.collect_filters_mut(out);
                }
            }
        }
    }

    /// Every expression directly held by this pattern: filter expressions
    /// of its atoms and observer parameters.
    pub fn expressions_mut(&mut self) -> Vec<&mut Expression> {
        let mut out = Vec::new();
        self.collect_expressions_mut(&mut out);
        out
    }

    fn collect_expressions_mut<'a>(&'a mut self, out: &mut Vec<&'a mut Expression>) {
        match self {
            PatternExpr::Filter { filter, .. } => {
                if let Some(expr) = filter.expression.as_mut() {
                    out.push(expr);
                }
            }
            PatternExpr::Observer { parameters, .. } => out.extend(parameters.iter_mut()),
            PatternExpr::Every(inner) | PatternExpr::Not(inner) | PatternExpr::Nested(inner) => {
                inner.collect_expressions_mut(out)
            }
            PatternExpr::And(items) | PatternExpr::Or(items) | PatternExpr::FollowedBy(items) => {
                for item in items {
                    item.collect_expressions_mut(out);
                }
            }
        }
    }
}

/// Core expression type. Recursive to support arbitrary nesting.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Event property, possibly qualified and/or a container path:
    /// `price`, `a.price`, `field.key1.$0`.
    Property(String),
    Literal(Literal),
    /// `10 sec`, `1 min 30 sec`
    TimePeriod(Vec<TimePeriodPart>),
    /// `*` inside `count(*)`.
    Wildcard,
    Binary {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    Unary {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
    /// Function call: `name([DISTINCT] args)`.
    Function {
        name: String,
        distinct: bool,
        args: Vec<Expression>,
    },
    /// Method-call chain: `opts.num.$0.length()` or `f(x).trim()`.
    ///
    /// Without a target, the first chain item is the property the chain
    /// starts from.
    Dot {
        target: Option<Box<Expression>>,
        chain: Vec<ChainItem>,
    },
    Case {
        operand: Option<Box<Expression>>,
        when_clauses: Vec<(Expression, Expression)>,
        else_clause: Option<Box<Expression>>,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// Scalar subquery: `(SELECT ...)`.
    Subquery(Arc<Statement>),
    /// `EXISTS (SELECT ...)`
    Exists(Arc<Statement>),
    /// `expr [NOT] IN (SELECT ...)`
    InSubquery {
        expr: Box<Expression>,
        subquery: Arc<Statement>,
        negated: bool,
    },
    /// Parenthesized expression.
    Nested(Box<Expression>),
}

/// One segment of a method-call chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainItem {
    pub name: String,
    pub parameters: Vec<Expression>,
    /// True for the leading property segment, which has no call parens.
    pub is_property: bool,
}

impl ChainItem {
    pub fn property(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            is_property: true,
        }
    }

    pub fn method(name: impl Into<String>, parameters: Vec<Expression>) -> Self {
        Self {
            name: name.into(),
            parameters,
            is_property: false,
        }
    }
}

impl Expression {
    pub fn property(name: impl Into<String>) -> Self {
        Expression::Property(name.into())
    }

    pub fn property_name(&self) -> Option<&str> {
        match self {
            Expression::Property(name) => Some(name),
            _ => None,
        }
    }

    pub fn property_name_mut(&mut self) -> Option<&mut String> {
        match self {
            Expression::Property(name) => Some(name),
            _ => None,
        }
    }

    pub fn chain(&self) -> Option<&[ChainItem]> {
        match self {
            Expression::Dot { chain, .. } => Some(chain.as_slice()),
            _ => None,
        }
    }

    pub fn chain_mut(&mut self) -> Option<&mut Vec<ChainItem>> {
        match self {
            Expression::Dot { chain, .. } => Some(chain),
            _ => None,
        }
    }

    pub fn parameters(&self) -> &[Expression] {
        match self {
            Expression::Function { args, .. } => args.as_slice(),
            _ => &[],
        }
    }

    pub fn parameters_mut(&mut self) -> Option<&mut Vec<Expression>> {
        match self {
            Expression::Function { args, .. } => Some(args),
            _ => None,
        }
    }

    /// The statement of a subquery node (scalar, `EXISTS` or `IN`).
    pub fn subquery(&self) -> Option<&Arc<Statement>> {
        match self {
            Expression::Subquery(s) | Expression::Exists(s) => Some(s),
            Expression::InSubquery { subquery, .. } => Some(subquery),
            _ => None,
        }
    }

    /// Mutable access to a subquery node's statement. A statement still
    /// shared with an analysis cache is cloned first.
    pub fn subquery_mut(&mut self) -> Option<&mut Statement> {
        match self {
            Expression::Subquery(s) | Expression::Exists(s) => Some(Arc::make_mut(s)),
            Expression::InSubquery { subquery, .. } => Some(Arc::make_mut(subquery)),
            _ => None,
        }
    }

    /// Operand sub-expressions. Function parameters, chain parameters and
    /// subquery interiors are reached through their own accessors.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Expression::Unary { expr, .. }
            | Expression::IsNull { expr, .. }
            | Expression::InSubquery { expr, .. }
            | Expression::Nested(expr) => vec![expr.as_ref()],
            Expression::Dot { target, .. } => target.iter().map(|t| t.as_ref()).collect(),
            Expression::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let mut out: Vec<&Expression> = Vec::new();
                if let Some(op) = operand {
                    out.push(op);
                }
                for (when, then) in when_clauses {
                    out.push(when);
                    out.push(then);
                }
                if let Some(e) = else_clause {
                    out.push(e);
                }
                out
            }
            Expression::InList { expr, list, .. } => {
                let mut out: Vec<&Expression> = vec![expr.as_ref()];
                out.extend(list.iter());
                out
            }
            Expression::Between {
                expr, low, high, ..
            } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
            Expression::Property(_)
            | Expression::Literal(_)
            | Expression::TimePeriod(_)
            | Expression::Wildcard
            | Expression::Function { .. }
            | Expression::Subquery(_)
            | Expression::Exists(_) => Vec::new(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expression> {
        match self {
            Expression::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            Expression::Unary { expr, .. }
            | Expression::IsNull { expr, .. }
            | Expression::InSubquery { expr, .. }
            | Expression::Nested(expr) => vec![expr.as_mut()],
            Expression::Dot { target, .. } => target.iter_mut().map(|t| t.as_mut()).collect(),
            Expression::Case {
                operand,
                when_clauses,
                else_clause,
            } => {
                let mut out: Vec<&mut Expression> = Vec::new();
                if let Some(op) = operand {
                    out.push(op);
                }
                for (when, then) in when_clauses.iter_mut() {
                    out.push(when);
                    out.push(then);
                }
                if let Some(e) = else_clause {
                    out.push(e);
                }
                out
            }
            Expression::InList { expr, list, .. } => {
                let mut out: Vec<&mut Expression> = vec![expr.as_mut()];
                out.extend(list.iter_mut());
                out
            }
            Expression::Between {
                expr, low, high, ..
            } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
            Expression::Property(_)
            | Expression::Literal(_)
            | Expression::TimePeriod(_)
            | Expression::Wildcard
            | Expression::Function { .. }
            | Expression::Subquery(_)
            | Expression::Exists(_) => Vec::new(),
        }
    }
}

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimePeriodPart {
    /// Numeric amount as written: `10`, `0.5`.
    pub amount: String,
    pub unit: TimeUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Recognize a time unit keyword, singular or plural.
    pub fn from_keyword(word: &str) -> Option<Self> {
        let unit = match word.to_ascii_lowercase().as_str() {
            "msec" | "millisecond" | "milliseconds" => TimeUnit::Millisecond,
            "sec" | "second" | "seconds" => TimeUnit::Second,
            "min" | "minute" | "minutes" => TimeUnit::Minute,
            "hour" | "hours" => TimeUnit::Hour,
            "day" | "days" => TimeUnit::Day,
            "week" | "weeks" => TimeUnit::Week,
            "month" | "months" => TimeUnit::Month,
            "year" | "years" => TimeUnit::Year,
            _ => return None,
        };
        Some(unit)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            TimeUnit::Millisecond => "msec",
            TimeUnit::Second => "sec",
            TimeUnit::Minute => "min",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    // Logical
    And,
    Or,
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    // String
    Like,
    NotLike,
    Regexp,
    NotRegexp,
    Concat,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expression,
    pub asc: Option<bool>,
}

/// Output rate limiting: `OUTPUT [ALL|FIRST|LAST|SNAPSHOT] EVERY ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLimit {
    pub selector: Option<OutputSelector>,
    pub rate: OutputRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSelector {
    All,
    First,
    Last,
    Snapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputRate {
    /// `EVERY 10 EVENTS`
    Events(u64),
    /// `EVERY 5 sec`
    Time(Vec<TimePeriodPart>),
}

/// `LIMIT count [OFFSET offset]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLimit {
    pub count: u64,
    pub offset: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_stream(name: &str, alias: Option<&str>) -> Stream {
        Stream::Filter(FilterStream {
            filter: Filter::new(name),
            views: vec![],
            alias: alias.map(String::from),
        })
    }

    #[test]
    fn test_default_statement() {
        let s = Statement::default();
        assert!(!s.select.distinct);
        assert!(s.select.items.is_empty());
        assert!(s.from.streams.is_empty());
        assert!(s.filter.is_none());
        assert!(s.limit.is_none());
    }

    #[test]
    fn test_stream_filters_and_type_names() {
        let mut stream = filter_stream("Target", Some("t"));
        let filters = stream.filters();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].0.event_type_name, "Target");
        assert_eq!(filters[0].1, Some("t"));

        for name in stream.event_type_names_mut() {
            *name = "Target_1".into();
        }
        assert_eq!(stream.filters()[0].0.event_type_name, "Target_1");
    }

    #[test]
    fn test_pattern_stream_filters() {
        let mut stream = Stream::Pattern(PatternStream {
            expression: PatternExpr::FollowedBy(vec![
                PatternExpr::Every(Box::new(PatternExpr::Filter {
                    tag: Some("a".into()),
                    filter: Filter::new("A"),
                })),
                PatternExpr::Filter {
                    tag: Some("b".into()),
                    filter: Filter {
                        event_type_name: "B".into(),
                        expression: Some(Expression::property("a.x")),
                    },
                },
            ]),
            views: vec![],
            alias: None,
        });

        let names: Vec<&str> = stream
            .filters()
            .iter()
            .map(|(f, _)| f.event_type_name.as_str())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(stream.event_type_names_mut().len(), 2);
        assert!(stream.views().is_empty());
    }

    #[test]
    fn test_method_stream_has_no_event_type() {
        let mut stream = Stream::Method(MethodStream {
            class_name: "com.example.Lookup".into(),
            method_name: "fetch".into(),
            parameters: vec![Expression::property("id")],
            alias: Some("m".into()),
        });
        assert!(stream.event_type_names_mut().is_empty());
        assert!(stream.filters().is_empty());
        assert_eq!(stream.alias(), Some("m"));
    }

    #[test]
    fn test_expression_capabilities() {
        let mut expr = Expression::Binary {
            left: Box::new(Expression::property("a.x")),
            op: BinaryOperator::Eq,
            right: Box::new(Expression::Function {
                name: "max".into(),
                distinct: false,
                args: vec![Expression::property("y")],
            }),
        };
        assert_eq!(expr.children().len(), 2);
        assert!(expr.property_name().is_none());

        let children = expr.children_mut();
        assert_eq!(children[0].property_name(), Some("a.x"));
        assert_eq!(children[1].parameters().len(), 1);
        assert!(children[1].chain().is_none());
    }

    #[test]
    fn test_subquery_mut_copies_shared_statement() {
        let shared = Arc::new(Statement::default());
        let mut expr = Expression::Exists(Arc::clone(&shared));
        if let Some(stmt) = expr.subquery_mut() {
            stmt.select.distinct = true;
        }
        assert!(!shared.select.distinct);
        assert!(expr.subquery().map(|s| s.select.distinct).unwrap_or(false));
    }

    #[test]
    fn test_time_unit_keywords() {
        assert_eq!(TimeUnit::from_keyword("seconds"), Some(TimeUnit::Second));
        assert_eq!(TimeUnit::from_keyword("MIN"), Some(TimeUnit::Minute));
        assert_eq!(TimeUnit::from_keyword("fortnight"), None);
        assert_eq!(TimeUnit::Millisecond.keyword(), "msec");
    }
}
