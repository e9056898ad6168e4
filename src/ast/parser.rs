/// EPL text → statement model parser.
///
/// Lexing is delegated to the `sqlparser` tokenizer (generic dialect); the
/// EPL-specific grammar (views, pattern streams, method invocation streams,
/// time periods, output rate limiting) is parsed here by recursive descent.
///
/// ```text
/// statement ::= SELECT [ISTREAM|RSTREAM|IRSTREAM] [DISTINCT] items
///               FROM stream (',' stream)*
///               [WHERE expr] [GROUP BY exprs] [HAVING expr]
///               [OUTPUT [ALL|FIRST|LAST|SNAPSHOT] EVERY rate]
///               [ORDER BY order_items] [LIMIT n [OFFSET m]]
/// stream    ::= Type ['(' expr ')'] view* [[AS] alias]
///             | PATTERN '[' pattern ']' view* [[AS] alias]
///             | METHOD ':' class '.' method '(' args ')' [[AS] alias]
/// view      ::= '.' namespace ':' name '(' args ')'
/// ```
///
/// Subqueries use the restricted grammar: select, from (one stream) and
/// where only.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::types::*;
use crate::error::{Error, Result};

/// Default cap on nested expression, pattern and subquery levels.
pub const DEFAULT_MAX_DEPTH: usize = 64;

const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "between", "by", "case", "desc", "distinct", "else", "end",
    "every", "exists", "false", "from", "group", "having", "in", "irstream", "is", "istream",
    "like", "limit", "not", "null", "offset", "or", "order", "output", "pattern", "regexp",
    "rstream", "select", "then", "true", "when", "where",
];

pub(crate) fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Maximum nesting of expressions, patterns and subqueries.
    pub max_depth: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Which grammar a select statement is parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Full,
    /// Select, from (single stream) and where only.
    Subquery,
}

/// Parse an EPL statement with default options.
pub fn parse_epl(input: &str) -> Result<Statement> {
    parse_with_options(input, &ParserOptions::default())
}

/// Parse an EPL statement. A trailing `;` is accepted.
pub fn parse_with_options(input: &str, options: &ParserOptions) -> Result<Statement> {
    let dialect = GenericDialect {};
    let mut tokens: Vec<Token> = Tokenizer::new(&dialect, input)
        .tokenize()
        .map_err(|e| Error::query(format!("EPL tokenize error: {}", e)))?
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();
    tokens.push(Token::EOF);

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth: options.max_depth,
    };
    let statement = parser.parse_select(Grammar::Full)?;
    parser.consume(&Token::SemiColon);
    if parser.peek() != &Token::EOF {
        return Err(parser.unexpected("end of statement"));
    }
    Ok(statement)
}

struct Parser {
    /// Always terminated by `Token::EOF`.
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    // ------------------------------------------------------------------
    // Token helpers
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn consume(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.consume(token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", token)))
        }
    }

    fn is_keyword_at(&self, n: usize, keyword: &str) -> bool {
        matches!(
            self.peek_nth(n),
            Token::Word(w) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword)
        )
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.is_keyword_at(0, keyword)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&keyword.to_uppercase()))
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let found = match self.peek() {
            Token::EOF => "end of input".to_string(),
            other => format!("'{}'", other),
        };
        Error::query(format!("expected {}, found {}", expected, found))
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::query(format!(
                "query nesting exceeds the maximum depth of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn leave_n(&mut self, levels: usize) {
        self.depth = self.depth.saturating_sub(levels);
    }

    /// True when the next token can start an identifier.
    fn at_identifier(&self) -> bool {
        match self.peek() {
            Token::Word(w) => match w.quote_style {
                None => !is_reserved(&w.value),
                Some(q) => q == '`',
            },
            _ => false,
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        if !self.at_identifier() {
            return Err(self.unexpected("identifier"));
        }
        let name = match self.peek() {
            Token::Word(w) => w.value.clone(),
            _ => return Err(self.unexpected("identifier")),
        };
        self.advance();
        Ok(name)
    }

    fn parse_optional_alias(&mut self) -> Result<Option<String>> {
        if self.consume_keyword("as") {
            return Ok(Some(self.parse_identifier()?));
        }
        if self.at_identifier() {
            return Ok(Some(self.parse_identifier()?));
        }
        Ok(None)
    }

    fn parse_comma_separated<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut items = vec![f(self)?];
        while self.consume(&Token::Comma) {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Arguments after an already consumed `(`, through the closing `)`.
    fn parse_call_arguments(&mut self) -> Result<Vec<Expression>> {
        if self.consume(&Token::RParen) {
            return Ok(Vec::new());
        }
        let args = self.parse_comma_separated(Self::parse_expr)?;
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_unsigned(&mut self) -> Result<u64> {
        let value = match self.peek() {
            Token::Number(n, _) => n
                .parse::<u64>()
                .map_err(|_| Error::query(format!("expected an unsigned integer, found '{}'", n)))?,
            _ => return Err(self.unexpected("unsigned integer")),
        };
        self.advance();
        Ok(value)
    }

    fn peek_time_unit_at(&self, n: usize) -> Option<TimeUnit> {
        match self.peek_nth(n) {
            Token::Word(w) if w.quote_style.is_none() => TimeUnit::from_keyword(&w.value),
            _ => None,
        }
    }

    /// Continues a time period whose first amount was already consumed.
    fn parse_time_period(&mut self, first_amount: String) -> Result<Vec<TimePeriodPart>> {
        let unit = self
            .peek_time_unit_at(0)
            .ok_or_else(|| self.unexpected("time unit"))?;
        self.advance();
        let mut parts = vec![TimePeriodPart {
            amount: first_amount,
            unit,
        }];

        loop {
            let part = match (self.peek(), self.peek_time_unit_at(1)) {
                (Token::Number(n, _), Some(unit)) => TimePeriodPart {
                    amount: n.clone(),
                    unit,
                },
                _ => break,
            };
            parts.push(part);
            self.advance();
            self.advance();
        }
        Ok(parts)
    }

    // ------------------------------------------------------------------
    // Statements and clauses
    // ------------------------------------------------------------------

    fn parse_select(&mut self, grammar: Grammar) -> Result<Statement> {
        self.enter()?;
        self.expect_keyword("select")?;

        let mut statement = Statement::default();
        statement.select.stream_selector = if self.consume_keyword("istream") {
            Some(StreamSelector::IStream)
        } else if self.consume_keyword("rstream") {
            Some(StreamSelector::RStream)
        } else if self.consume_keyword("irstream") {
            Some(StreamSelector::IRStream)
        } else {
            None
        };
        statement.select.distinct = self.consume_keyword("distinct");
        statement.select.items = self.parse_comma_separated(Self::parse_select_item)?;

        self.expect_keyword("from")?;
        statement.from.streams = self.parse_comma_separated(Self::parse_stream)?;

        if self.consume_keyword("where") {
            statement.filter = Some(self.parse_expr()?);
        }

        if grammar == Grammar::Subquery {
            if statement.from.streams.len() > 1 {
                return Err(Error::query("joins are not permitted in a subquery"));
            }
            for clause in ["group", "having", "output", "order", "limit"] {
                if self.peek_keyword(clause) {
                    return Err(Error::query(format!(
                        "{} clause is not permitted in a subquery",
                        clause.to_uppercase()
                    )));
                }
            }
            self.leave();
            return Ok(statement);
        }

        if self.consume_keyword("group") {
            self.expect_keyword("by")?;
            statement.group_by = self.parse_comma_separated(Self::parse_expr)?;
        }
        if self.consume_keyword("having") {
            statement.having = Some(self.parse_expr()?);
        }
        if self.consume_keyword("output") {
            statement.output = Some(self.parse_output_limit()?);
        }
        if self.consume_keyword("order") {
            self.expect_keyword("by")?;
            statement.order_by = self.parse_comma_separated(Self::parse_order_by)?;
        }
        if self.consume_keyword("limit") {
            let count = self.parse_unsigned()?;
            let offset = if self.consume_keyword("offset") {
                Some(self.parse_unsigned()?)
            } else {
                None
            };
            statement.limit = Some(RowLimit { count, offset });
        }

        self.leave();
        Ok(statement)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.consume(&Token::Mul) {
            return Ok(SelectItem::Wildcard);
        }
        if self.at_identifier()
            && self.peek_nth(1) == &Token::Period
            && self.peek_nth(2) == &Token::Mul
        {
            let name = self.parse_identifier()?;
            self.advance();
            self.advance();
            return Ok(SelectItem::QualifiedWildcard(name));
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_optional_alias()?;
        Ok(SelectItem::Expression { expr, alias })
    }

    fn parse_stream(&mut self) -> Result<Stream> {
        if self.consume_keyword("pattern") {
            self.expect(&Token::LBracket)?;
            let expression = self.parse_pattern()?;
            self.expect(&Token::RBracket)?;
            let views = self.parse_views()?;
            let alias = self.parse_optional_alias()?;
            return Ok(Stream::Pattern(PatternStream {
                expression,
                views,
                alias,
            }));
        }

        if self.is_keyword_at(0, "method") && self.peek_nth(1) == &Token::Colon {
            self.advance();
            self.advance();
            let mut path = vec![self.parse_identifier()?];
            while self.consume(&Token::Period) {
                path.push(self.parse_identifier()?);
            }
            let (method_name, class_path) = match path.split_last() {
                Some((method, class)) if !class.is_empty() => (method.clone(), class.join(".")),
                _ => {
                    return Err(Error::query(
                        "method invocation stream requires a class and a method name",
                    ))
                }
            };
            self.expect(&Token::LParen)?;
            let parameters = self.parse_call_arguments()?;
            let alias = self.parse_optional_alias()?;
            return Ok(Stream::Method(MethodStream {
                class_name: class_path,
                method_name,
                parameters,
                alias,
            }));
        }

        let filter = self.parse_filter()?;
        let views = self.parse_views()?;
        let alias = self.parse_optional_alias()?;
        Ok(Stream::Filter(FilterStream {
            filter,
            views,
            alias,
        }))
    }

    fn parse_filter(&mut self) -> Result<Filter> {
        let event_type_name = self.parse_identifier()?;
        let expression = if self.consume(&Token::LParen) {
            if self.consume(&Token::RParen) {
                None
            } else {
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Some(expr)
            }
        } else {
            None
        };
        Ok(Filter {
            event_type_name,
            expression,
        })
    }

    fn parse_views(&mut self) -> Result<Vec<View>> {
        let mut views = Vec::new();
        while self.peek() == &Token::Period && self.peek_nth(2) == &Token::Colon {
            self.advance();
            let namespace = self.parse_identifier()?;
            self.expect(&Token::Colon)?;
            let name = self.parse_identifier()?;
            self.expect(&Token::LParen)?;
            let parameters = self.parse_call_arguments()?;
            views.push(View {
                namespace,
                name,
                parameters,
            });
        }
        Ok(views)
    }

    fn parse_output_limit(&mut self) -> Result<OutputLimit> {
        let selector = if self.consume_keyword("all") {
            Some(OutputSelector::All)
        } else if self.consume_keyword("first") {
            Some(OutputSelector::First)
        } else if self.consume_keyword("last") {
            Some(OutputSelector::Last)
        } else if self.consume_keyword("snapshot") {
            Some(OutputSelector::Snapshot)
        } else {
            None
        };
        self.expect_keyword("every")?;

        let amount = match self.peek() {
            Token::Number(n, _) => n.clone(),
            _ => return Err(self.unexpected("output rate")),
        };
        self.advance();

        if self.consume_keyword("events") || self.consume_keyword("event") {
            let count = amount
                .parse::<u64>()
                .map_err(|_| Error::query(format!("invalid event count '{}'", amount)))?;
            return Ok(OutputLimit {
                selector,
                rate: OutputRate::Events(count),
            });
        }

        Ok(OutputLimit {
            selector,
            rate: OutputRate::Time(self.parse_time_period(amount)?),
        })
    }

    fn parse_order_by(&mut self) -> Result<OrderByExpr> {
        let expr = self.parse_expr()?;
        let asc = if self.consume_keyword("asc") {
            Some(true)
        } else if self.consume_keyword("desc") {
            Some(false)
        } else {
            None
        };
        Ok(OrderByExpr { expr, asc })
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    fn parse_pattern(&mut self) -> Result<PatternExpr> {
        self.enter()?;
        let mut items = vec![self.parse_pattern_and()?];
        while self.consume_keyword("or") {
            items.push(self.parse_pattern_and()?);
        }
        self.leave();
        Ok(fold_pattern(items, PatternExpr::Or))
    }

    fn parse_pattern_and(&mut self) -> Result<PatternExpr> {
        let mut items = vec![self.parse_pattern_followed_by()?];
        while self.consume_keyword("and") {
            items.push(self.parse_pattern_followed_by()?);
        }
        Ok(fold_pattern(items, PatternExpr::And))
    }

    fn parse_pattern_followed_by(&mut self) -> Result<PatternExpr> {
        let mut items = vec![self.parse_pattern_unary()?];
        while self.consume(&Token::Arrow) {
            items.push(self.parse_pattern_unary()?);
        }
        Ok(fold_pattern(items, PatternExpr::FollowedBy))
    }

    fn parse_pattern_unary(&mut self) -> Result<PatternExpr> {
        if self.consume_keyword("every") {
            self.enter()?;
            let inner = self.parse_pattern_unary()?;
            self.leave();
            return Ok(PatternExpr::Every(Box::new(inner)));
        }
        if self.consume_keyword("not") {
            self.enter()?;
            let inner = self.parse_pattern_unary()?;
            self.leave();
            return Ok(PatternExpr::Not(Box::new(inner)));
        }
        if self.consume(&Token::LParen) {
            let inner = self.parse_pattern()?;
            self.expect(&Token::RParen)?;
            return Ok(PatternExpr::Nested(Box::new(inner)));
        }
        self.parse_pattern_atom()
    }

    fn parse_pattern_atom(&mut self) -> Result<PatternExpr> {
        if self.at_identifier() && self.peek_nth(1) == &Token::Colon {
            let namespace = self.parse_identifier()?;
            self.advance();
            let name = self.parse_identifier()?;
            self.expect(&Token::LParen)?;
            let parameters = self.parse_call_arguments()?;
            return Ok(PatternExpr::Observer {
                namespace,
                name,
                parameters,
            });
        }

        let tag = if self.at_identifier() && self.peek_nth(1) == &Token::Eq {
            let tag = self.parse_identifier()?;
            self.advance();
            Some(tag)
        } else {
            None
        };
        let filter = self.parse_filter()?;
        Ok(PatternExpr::Filter { tag, filter })
    }

    // ------------------------------------------------------------------
    // Expressions, lowest precedence first
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expression> {
        self.enter()?;
        let expr = self.parse_or()?;
        self.leave();
        Ok(expr)
    }

    // Operator chains fold left-deep, so every folded operator is one more
    // level of nesting and counts against the depth budget.

    fn parse_or(&mut self) -> Result<Expression> {
        let mut left = self.parse_and()?;
        let mut folds = 0;
        while self.consume_keyword("or") {
            self.enter()?;
            folds += 1;
            let right = self.parse_and()?;
            left = binary(left, BinaryOperator::Or, right);
        }
        self.leave_n(folds);
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut left = self.parse_not()?;
        let mut folds = 0;
        while self.consume_keyword("and") {
            self.enter()?;
            folds += 1;
            let right = self.parse_not()?;
            left = binary(left, BinaryOperator::And, right);
        }
        self.leave_n(folds);
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.consume_keyword("not") {
            self.enter()?;
            let expr = self.parse_not()?;
            self.leave();
            return Ok(Expression::Unary {
                op: UnaryOperator::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let left = self.parse_additive()?;

        if self.consume_keyword("is") {
            let negated = self.consume_keyword("not");
            self.expect_keyword("null")?;
            return Ok(Expression::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.peek_keyword("not")
            && ["in", "between", "like", "regexp"]
                .iter()
                .any(|kw| self.is_keyword_at(1, kw));
        if negated {
            self.advance();
        }

        if self.consume_keyword("in") {
            self.expect(&Token::LParen)?;
            if self.peek_keyword("select") {
                let subquery = self.parse_select(Grammar::Subquery)?;
                self.expect(&Token::RParen)?;
                return Ok(Expression::InSubquery {
                    expr: Box::new(left),
                    subquery: Arc::new(subquery),
                    negated,
                });
            }
            let list = self.parse_comma_separated(Self::parse_expr)?;
            self.expect(&Token::RParen)?;
            return Ok(Expression::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }
        if self.consume_keyword("between") {
            let low = self.parse_additive()?;
            self.expect_keyword("and")?;
            let high = self.parse_additive()?;
            return Ok(Expression::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }
        if self.consume_keyword("like") {
            let op = if negated {
                BinaryOperator::NotLike
            } else {
                BinaryOperator::Like
            };
            return Ok(binary(left, op, self.parse_additive()?));
        }
        if self.consume_keyword("regexp") {
            let op = if negated {
                BinaryOperator::NotRegexp
            } else {
                BinaryOperator::Regexp
            };
            return Ok(binary(left, op, self.parse_additive()?));
        }

        let op = match self.peek() {
            Token::Eq | Token::DoubleEq => BinaryOperator::Eq,
            Token::Neq => BinaryOperator::NotEq,
            Token::Lt => BinaryOperator::Lt,
            Token::LtEq => BinaryOperator::LtEq,
            Token::Gt => BinaryOperator::Gt,
            Token::GtEq => BinaryOperator::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(binary(left, op, right))
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut left = self.parse_multiplicative()?;
        let mut folds = 0;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOperator::Plus,
                Token::Minus => BinaryOperator::Minus,
                Token::StringConcat => BinaryOperator::Concat,
                _ => break,
            };
            self.advance();
            self.enter()?;
            folds += 1;
            let right = self.parse_multiplicative()?;
            left = binary(left, op, right);
        }
        self.leave_n(folds);
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.parse_unary()?;
        let mut folds = 0;
        loop {
            let op = match self.peek() {
                Token::Mul => BinaryOperator::Multiply,
                Token::Div => BinaryOperator::Divide,
                Token::Mod => BinaryOperator::Modulo,
                _ => break,
            };
            self.advance();
            self.enter()?;
            folds += 1;
            let right = self.parse_unary()?;
            left = binary(left, op, right);
        }
        self.leave_n(folds);
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        let op = match self.peek() {
            Token::Minus => UnaryOperator::Minus,
            Token::Plus => UnaryOperator::Plus,
            _ => return self.parse_postfix(),
        };
        self.advance();
        self.enter()?;
        let expr = self.parse_unary()?;
        self.leave();
        Ok(Expression::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    /// Method calls chained onto a primary: `f(x).trim().length()`.
    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut expr = self.parse_primary()?;
        while self.peek() == &Token::Period
            && matches!(self.peek_nth(1), Token::Word(_))
            && self.peek_nth(2) == &Token::LParen
        {
            self.advance();
            let name = match self.peek() {
                Token::Word(w) => w.value.clone(),
                _ => return Err(self.unexpected("method name")),
            };
            self.advance();
            self.advance();
            let item = ChainItem::method(name, self.parse_call_arguments()?);
            expr = match expr {
                Expression::Dot {
                    target,
                    mut chain,
                } => {
                    chain.push(item);
                    Expression::Dot { target, chain }
                }
                other => Expression::Dot {
                    target: Some(Box::new(other)),
                    chain: vec![item],
                },
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        let token = self.peek().clone();
        match token {
            Token::Number(n, _) => {
                self.advance();
                if self.peek_time_unit_at(0).is_some() {
                    return Ok(Expression::TimePeriod(self.parse_time_period(n)?));
                }
                Ok(Expression::Literal(parse_number(&n)?))
            }
            Token::SingleQuotedString(s) => {
                self.advance();
                Ok(Expression::Literal(Literal::String(s)))
            }
            Token::Word(w) if w.quote_style == Some('"') => {
                self.advance();
                Ok(Expression::Literal(Literal::String(w.value)))
            }
            Token::Mul => {
                self.advance();
                Ok(Expression::Wildcard)
            }
            Token::LParen => {
                self.advance();
                if self.peek_keyword("select") {
                    let subquery = self.parse_select(Grammar::Subquery)?;
                    self.expect(&Token::RParen)?;
                    return Ok(Expression::Subquery(Arc::new(subquery)));
                }
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(Expression::Nested(Box::new(inner)))
            }
            Token::Word(w) if w.quote_style.is_none() && is_reserved(&w.value) => {
                match w.value.to_ascii_lowercase().as_str() {
                    "null" => {
                        self.advance();
                        Ok(Expression::Literal(Literal::Null))
                    }
                    "true" | "false" => {
                        self.advance();
                        Ok(Expression::Literal(Literal::Boolean(
                            w.value.eq_ignore_ascii_case("true"),
                        )))
                    }
                    "case" => self.parse_case(),
                    "exists" => {
                        self.advance();
                        self.expect(&Token::LParen)?;
                        let subquery = self.parse_select(Grammar::Subquery)?;
                        self.expect(&Token::RParen)?;
                        Ok(Expression::Exists(Arc::new(subquery)))
                    }
                    _ => Err(self.unexpected("expression")),
                }
            }
            Token::Word(_) | Token::Placeholder(_) => self.parse_path_or_call(),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// A property path (`a.b.$0`), a function call (`max(x)`), or a chain
    /// starting at a property (`a.b.len()`).
    fn parse_path_or_call(&mut self) -> Result<Expression> {
        let first = match self.peek() {
            Token::Placeholder(p) => p.clone(),
            _ => return self.parse_path_after_identifier(),
        };
        self.advance();
        self.parse_path_rest(vec![first])
    }

    fn parse_path_after_identifier(&mut self) -> Result<Expression> {
        let first = self.parse_identifier()?;
        self.parse_path_rest(vec![first])
    }

    fn parse_path_rest(&mut self, mut segments: Vec<String>) -> Result<Expression> {
        loop {
            match self.peek() {
                Token::Period => {
                    let segment = match self.peek_nth(1) {
                        Token::Word(w) => w.value.clone(),
                        Token::Placeholder(p) => p.clone(),
                        Token::Number(n, _) if n.chars().all(|c| c.is_ascii_digit()) => n.clone(),
                        _ => break,
                    };
                    self.advance();
                    self.advance();
                    segments.push(segment);
                }
                // The tokenizer reads `a.0` as `a` followed by the number `.0`.
                Token::Number(n, _) if n.starts_with('.') => {
                    let parts: Vec<String> = n[1..].split('.').map(String::from).collect();
                    self.advance();
                    segments.extend(parts);
                }
                _ => break,
            }
        }

        if !self.consume(&Token::LParen) {
            return Ok(Expression::Property(segments.join(".")));
        }

        if segments.len() == 1 {
            let distinct = self.consume_keyword("distinct");
            let args = self.parse_call_arguments()?;
            return Ok(Expression::Function {
                name: segments.remove(0),
                distinct,
                args,
            });
        }

        let method = segments.pop().unwrap_or_default();
        let parameters = self.parse_call_arguments()?;
        Ok(Expression::Dot {
            target: None,
            chain: vec![
                ChainItem::property(segments.join(".")),
                ChainItem::method(method, parameters),
            ],
        })
    }

    fn parse_case(&mut self) -> Result<Expression> {
        self.expect_keyword("case")?;
        let operand = if self.peek_keyword("when") {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        let mut when_clauses = Vec::new();
        while self.consume_keyword("when") {
            let when = self.parse_expr()?;
            self.expect_keyword("then")?;
            let then = self.parse_expr()?;
            when_clauses.push((when, then));
        }
        if when_clauses.is_empty() {
            return Err(self.unexpected("WHEN"));
        }

        let else_clause = if self.consume_keyword("else") {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.expect_keyword("end")?;

        Ok(Expression::Case {
            operand,
            when_clauses,
            else_clause,
        })
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn fold_pattern(mut items: Vec<PatternExpr>, build: fn(Vec<PatternExpr>) -> PatternExpr) -> PatternExpr {
    if items.len() == 1 {
        items.remove(0)
    } else {
        build(items)
    }
}

fn parse_number(text: &str) -> Result<Literal> {
    let invalid = || Error::query(format!("invalid number '{}'", text));
    if text.contains(['.', 'e', 'E']) {
        return text.parse::<f64>().map(Literal::Float).map_err(|_| invalid());
    }
    match text.parse::<i64>() {
        Ok(i) => Ok(Literal::Integer(i)),
        Err(_) => text.parse::<f64>().map(Literal::Float).map_err(|_| invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_stream(statement: &Statement, index: usize) -> &FilterStream {
        match &statement.from.streams[index] {
            Stream::Filter(f) => f,
            other => panic!("Expected filter stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let s = parse_epl("select * from Target").unwrap();
        assert_eq!(s.select.items, vec![SelectItem::Wildcard]);
        let stream = filter_stream(&s, 0);
        assert_eq!(stream.filter.event_type_name, "Target");
        assert!(stream.alias.is_none());
        assert!(s.filter.is_none());
    }

    #[test]
    fn test_parse_container_field() {
        let s = parse_epl("select field.key1 from Target").unwrap();
        match &s.select.items[0] {
            SelectItem::Expression { expr, alias } => {
                assert_eq!(expr.property_name(), Some("field.key1"));
                assert!(alias.is_none());
            }
            _ => panic!("Expected expression"),
        }
    }

    #[test]
    fn test_parse_numeric_and_placeholder_segments() {
        let s = parse_epl("select field.0, field.key1.$0 from Target").unwrap();
        let names: Vec<&str> = s
            .select
            .items
            .iter()
            .filter_map(|i| i.expression().and_then(|e| e.property_name()))
            .collect();
        assert_eq!(names, vec!["field.0", "field.key1.$0"]);
    }

    #[test]
    fn test_parse_join_with_aliases() {
        let s = parse_epl(
            "select count(*) from Target1 as t1, Target2 t2 where t1.v = t2.v",
        )
        .unwrap();
        assert_eq!(s.from.streams.len(), 2);
        assert_eq!(filter_stream(&s, 0).alias.as_deref(), Some("t1"));
        assert_eq!(filter_stream(&s, 1).alias.as_deref(), Some("t2"));
        match &s.select.items[0] {
            SelectItem::Expression { expr, .. } => match expr {
                Expression::Function { name, args, .. } => {
                    assert_eq!(name, "count");
                    assert_eq!(args, &vec![Expression::Wildcard]);
                }
                _ => panic!("Expected function"),
            },
            _ => panic!("Expected expression"),
        }
        assert!(matches!(
            s.filter,
            Some(Expression::Binary {
                op: BinaryOperator::Eq,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_views_and_stream_filter() {
        let s = parse_epl("select avg(price) from Trade(symbol = 'ACME').win:time(10 sec).std:unique(id) as t")
            .unwrap();
        let stream = filter_stream(&s, 0);
        assert!(stream.filter.expression.is_some());
        assert_eq!(stream.views.len(), 2);
        assert_eq!(stream.views[0].namespace, "win");
        assert_eq!(stream.views[0].name, "time");
        assert_eq!(
            stream.views[0].parameters,
            vec![Expression::TimePeriod(vec![TimePeriodPart {
                amount: "10".into(),
                unit: TimeUnit::Second,
            }])]
        );
        assert_eq!(stream.views[1].parameters, vec![Expression::property("id")]);
        assert_eq!(stream.alias.as_deref(), Some("t"));
    }

    #[test]
    fn test_parse_method_chain() {
        let s = parse_epl("select * from Target where opts.num.$0.length() > 2").unwrap();
        match s.filter {
            Some(Expression::Binary { left, .. }) => match *left {
                Expression::Dot { target, chain } => {
                    assert!(target.is_none());
                    assert_eq!(chain.len(), 2);
                    assert_eq!(chain[0].name, "opts.num.$0");
                    assert!(chain[0].is_property);
                    assert_eq!(chain[1].name, "length");
                    assert!(!chain[1].is_property);
                }
                other => panic!("Expected chain, got {:?}", other),
            },
            _ => panic!("Expected comparison"),
        }
    }

    #[test]
    fn test_parse_chain_on_function_result() {
        let s = parse_epl("select trim(name).toLowerCase() from Target").unwrap();
        match s.select.items[0].expression() {
            Some(Expression::Dot { target, chain }) => {
                assert!(matches!(target.as_deref(), Some(Expression::Function { .. })));
                assert_eq!(chain[0].name, "toLowerCase");
            }
            other => panic!("Expected chain, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subqueries() {
        let s = parse_epl(
            "select (select max(x) from B.std:lastevent()) as mx from A \
             where exists (select * from C where C.id = A.id) and y in (select y from D)",
        )
        .unwrap();
        assert!(matches!(
            s.select.items[0].expression(),
            Some(Expression::Subquery(_))
        ));
        match s.filter {
            Some(Expression::Binary { left, right, .. }) => {
                assert!(matches!(*left, Expression::Exists(_)));
                assert!(matches!(*right, Expression::InSubquery { negated: false, .. }));
            }
            _ => panic!("Expected AND"),
        }
    }

    #[test]
    fn test_parse_subquery_rejects_join() {
        let err = parse_epl("select * from A where x in (select y from B, C)").unwrap_err();
        assert!(err.to_string().contains("joins are not permitted"));
    }

    #[test]
    fn test_parse_subquery_rejects_group_by() {
        let err =
            parse_epl("select * from A where x = (select max(y) from B group by z)").unwrap_err();
        assert!(err.to_string().contains("GROUP clause is not permitted"));
    }

    #[test]
    fn test_parse_pattern_stream() {
        let s = parse_epl(
            "select a.x, b.y from pattern [every a=A -> (b=B(b.x = a.x) or timer:interval(5 sec))]",
        )
        .unwrap();
        match &s.from.streams[0] {
            Stream::Pattern(p) => match &p.expression {
                PatternExpr::FollowedBy(items) => {
                    assert_eq!(items.len(), 2);
                    assert!(matches!(items[0], PatternExpr::Every(_)));
                    assert!(matches!(items[1], PatternExpr::Nested(_)));
                }
                other => panic!("Expected followed-by, got {:?}", other),
            },
            _ => panic!("Expected pattern stream"),
        }
        let filters = s.from.streams[0].filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].1, Some("a"));
        assert_eq!(filters[1].0.event_type_name, "B");
    }

    #[test]
    fn test_parse_method_stream() {
        let s = parse_epl(
            "select * from A as a, method:com.example.Lookup.fetch(a.id) as m",
        )
        .unwrap();
        match &s.from.streams[1] {
            Stream::Method(m) => {
                assert_eq!(m.class_name, "com.example.Lookup");
                assert_eq!(m.method_name, "fetch");
                assert_eq!(m.parameters, vec![Expression::property("a.id")]);
                assert_eq!(m.alias.as_deref(), Some("m"));
            }
            _ => panic!("Expected method stream"),
        }
    }

    #[test]
    fn test_parse_full_clauses() {
        let s = parse_epl(
            "select irstream distinct k, sum(v) as total from T.win:length_batch(100) \
             where v > 0 group by k having sum(v) > 10 output last every 5 seconds \
             order by k desc limit 10 offset 2",
        )
        .unwrap();
        assert_eq!(s.select.stream_selector, Some(StreamSelector::IRStream));
        assert!(s.select.distinct);
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert_eq!(
            s.output,
            Some(OutputLimit {
                selector: Some(OutputSelector::Last),
                rate: OutputRate::Time(vec![TimePeriodPart {
                    amount: "5".into(),
                    unit: TimeUnit::Second,
                }]),
            })
        );
        assert_eq!(s.order_by[0].asc, Some(false));
        assert_eq!(
            s.limit,
            Some(RowLimit {
                count: 10,
                offset: Some(2)
            })
        );
    }

    #[test]
    fn test_parse_output_events() {
        let s = parse_epl("select count(*) from T output snapshot every 3 events").unwrap();
        assert_eq!(
            s.output.map(|o| o.rate),
            Some(OutputRate::Events(3))
        );
    }

    #[test]
    fn test_parse_predicates() {
        let s = parse_epl(
            "select * from T where a not in (1, 2) and b between 1 and 5 \
             and c is not null and d not like 'x%' and not e",
        )
        .unwrap();
        assert!(s.filter.is_some());
    }

    #[test]
    fn test_parse_case_expression() {
        let s = parse_epl("select case when x > 1 then 'big' else 'small' end as size from T")
            .unwrap();
        assert!(matches!(
            s.select.items[0].expression(),
            Some(Expression::Case { .. })
        ));
    }

    #[test]
    fn test_parse_trailing_semicolon() {
        assert!(parse_epl("select * from T;").is_ok());
    }

    #[test]
    fn test_parse_invalid_epl() {
        assert!(parse_epl("selct * form T").is_err());
        assert!(parse_epl("select * from").is_err());
        assert!(parse_epl("select x from T where").is_err());
        assert!(parse_epl("select x from T extra tokens here").is_err());
    }

    #[test]
    fn test_parse_depth_limit() {
        let options = ParserOptions { max_depth: 8 };
        let deep = format!("select * from T where {}x{}", "(".repeat(20), ")".repeat(20));
        let err = parse_with_options(&deep, &options).unwrap_err();
        assert!(err.to_string().contains("maximum depth"));

        let shallow = format!("select * from T where {}x{}", "(".repeat(3), ")".repeat(3));
        assert!(parse_with_options(&shallow, &options).is_ok());
    }

    #[test]
    fn test_parse_depth_limit_counts_operator_chains() {
        let terms: Vec<String> = (0..3000).map(|i| format!("x = {}", i)).collect();
        let long_or = format!("select * from T where {}", terms.join(" or "));
        let err = parse_epl(&long_or).unwrap_err();
        assert!(matches!(err, Error::Query(ref m) if m.contains("maximum depth")));

        let long_and = format!("select * from T where {}", terms.join(" and "));
        assert!(parse_epl(&long_and).is_err());

        let sum = vec!["x"; 3000].join(" + ");
        assert!(parse_epl(&format!("select {} from T", sum)).is_err());

        let product = vec!["x"; 3000].join(" * ");
        assert!(parse_epl(&format!("select {} from T", product)).is_err());

        // Short chains still fit the budget, and the budget is released
        // after each chain.
        let short = (0..20).map(|i| format!("x = {}", i)).collect::<Vec<_>>();
        let epl = format!(
            "select a + b + c + d from T where ({}) and ({})",
            short.join(" or "),
            short.join(" or ")
        );
        assert!(parse_epl(&epl).is_ok());
    }
}

