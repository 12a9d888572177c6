//! Query expressions.
//!
//! This module provides the expression tree used by every clause of a query model:
//! join sources and restrictions, where predicates, orderings and selectors.
//! Expressions refer to query sources by [`QuerySourceId`]; item names are only
//! resolved when the model is serialized.

use crate::clause::Ordering;
use crate::source::{CloneContext, QuerySourceId};
use quarry_core::{Dialect, Error, Result, Value};
use std::collections::HashMap;
use std::fmt;

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Reference to the items produced by a query source
    Source(QuerySourceId),

    /// Member access on a query source item (`o.total`, `c.orders`)
    Member {
        /// The referenced query source
        source: QuerySourceId,
        /// Member (property or collection) name
        name: String,
    },

    /// Literal value, bound as a parameter
    Literal(Value),

    /// Binary operation (e.g., a = b, a > b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Unary operation (e.g., NOT a, -a)
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Function call (e.g., COUNT(x), UPPER(name))
    Function { name: String, args: Vec<Expr> },

    /// CASE WHEN ... THEN ... ELSE ... END
    Case {
        /// List of (condition, result) pairs
        when_clauses: Vec<(Expr, Expr)>,
        /// Optional ELSE clause
        else_clause: Option<Box<Expr>>,
    },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// BETWEEN expression
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// IS DISTINCT FROM / IS NOT DISTINCT FROM (NULL-safe comparison)
    IsDistinctFrom {
        left: Box<Expr>,
        right: Box<Expr>,
        negated: bool,
    },

    /// CAST(expr AS type)
    Cast { expr: Box<Expr>, type_name: String },

    /// LIKE / NOT LIKE pattern
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_insensitive: bool,
    },

    /// Subquery (stores the query text)
    Subquery(String),

    /// Raw query fragment (escape hatch)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Special aggregate: COUNT(*)
    CountStar,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Logical AND
    And,
    /// Logical OR
    Or,
    /// Addition (+)
    Add,
    /// Subtraction (-)
    Sub,
    /// Multiplication (*)
    Mul,
    /// Division (/)
    Div,
    /// String concatenation (||)
    Concat,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "||",
        }
    }

    /// Comparison operators yield UNKNOWN when either operand is NULL.
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Neg => "-",
        }
    }
}

/// State threaded through expression serialization.
///
/// Collects bound parameters in emission order and knows the item name of every
/// query source declared so far.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    dialect: Dialect,
    params: Vec<Value>,
    aliases: HashMap<QuerySourceId, String>,
}

impl BuildContext {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Make `source` resolvable under `item_name` for the rest of the serialization.
    pub fn declare_source(&mut self, source: QuerySourceId, item_name: impl Into<String>) {
        self.aliases.insert(source, item_name.into());
    }

    pub fn is_declared(&self, source: QuerySourceId) -> bool {
        self.aliases.contains_key(&source)
    }

    fn alias(&self, source: QuerySourceId) -> Result<&str> {
        self.aliases.get(&source).map(String::as_str).ok_or_else(|| {
            Error::unsupported(
                format!("reference to query source {source}"),
                "the source is not declared before its use",
            )
        })
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

impl Expr {
    // ==================== Constructors ====================

    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Reference the items of a query source.
    pub fn source(source: QuerySourceId) -> Self {
        Expr::Source(source)
    }

    /// Access a member of a query source's items.
    pub fn member(source: QuerySourceId, name: impl Into<String>) -> Self {
        Expr::Member {
            source,
            name: name.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a NULL literal.
    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    /// Create a raw expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// Create a subquery expression.
    pub fn subquery(sql: impl Into<String>) -> Self {
        Expr::Subquery(sql.into())
    }

    /// Create a function call.
    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    /// COALESCE(args...)
    pub fn coalesce(args: Vec<impl Into<Expr>>) -> Self {
        Expr::function("COALESCE", args.into_iter().map(Into::into).collect())
    }

    /// COUNT(*)
    pub fn count_star() -> Self {
        Expr::CountStar
    }

    fn binary(self, op: BinaryOp, other: impl Into<Expr>) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other.into()),
        }
    }

    // ==================== Comparison Operators ====================

    /// Equal to (=)
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// Not equal to (<>)
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ne, other)
    }

    /// Less than (<)
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// Less than or equal to (<=)
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other)
    }

    /// Greater than (>)
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// Greater than or equal to (>=)
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other)
    }

    // ==================== Logical Operators ====================

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    // ==================== Null Checks ====================

    /// IS NULL
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// IS NOT NULL
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// IS DISTINCT FROM
    pub fn is_distinct_from(self, other: impl Into<Expr>) -> Self {
        Expr::IsDistinctFrom {
            left: Box::new(self),
            right: Box::new(other.into()),
            negated: false,
        }
    }

    /// IS NOT DISTINCT FROM
    pub fn is_not_distinct_from(self, other: impl Into<Expr>) -> Self {
        Expr::IsDistinctFrom {
            left: Box::new(self),
            right: Box::new(other.into()),
            negated: true,
        }
    }

    // ==================== Other Predicates ====================

    /// CAST(self AS type_name)
    pub fn cast(self, type_name: impl Into<String>) -> Self {
        Expr::Cast {
            expr: Box::new(self),
            type_name: type_name.into(),
        }
    }

    /// LIKE pattern
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: false,
        }
    }

    /// NOT LIKE pattern
    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: true,
            case_insensitive: false,
        }
    }

    /// Case-insensitive LIKE (ILIKE where supported).
    pub fn ilike(self, pattern: impl Into<String>) -> Self {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_insensitive: true,
        }
    }

    /// IN (values...)
    pub fn in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// NOT IN (values...)
    pub fn not_in_list(self, values: Vec<impl Into<Expr>>) -> Self {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// BETWEEN low AND high
    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Self {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low.into()),
            high: Box::new(high.into()),
            negated: false,
        }
    }

    // ==================== Arithmetic ====================

    /// Addition (+)
    pub fn add(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Add, other)
    }

    /// Subtraction (-)
    pub fn sub(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Sub, other)
    }

    /// Multiplication (*)
    pub fn mul(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Mul, other)
    }

    /// Division (/)
    pub fn div(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Div, other)
    }

    /// String concatenation (||)
    pub fn concat(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Concat, other)
    }

    /// Wrap in parentheses.
    pub fn paren(self) -> Self {
        Expr::Paren(Box::new(self))
    }

    // ==================== Ordering ====================

    /// Ascending ordering on this expression.
    pub fn asc(self) -> Ordering {
        Ordering::asc(self)
    }

    /// Descending ordering on this expression.
    pub fn desc(self) -> Ordering {
        Ordering::desc(self)
    }

    // ==================== Inspection ====================

    /// An empty raw fragment cannot describe anything and is rejected wherever an
    /// expression is required.
    pub fn is_blank(&self) -> bool {
        matches!(self, Expr::Raw(sql) if sql.trim().is_empty())
    }

    /// Direct child expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Source(_)
            | Expr::Member { .. }
            | Expr::Literal(_)
            | Expr::Subquery(_)
            | Expr::Raw(_)
            | Expr::CountStar => Vec::new(),
            Expr::Binary { left, right, .. } | Expr::IsDistinctFrom { left, right, .. } => {
                vec![left, right]
            }
            Expr::Unary { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::Paren(expr) => vec![expr],
            Expr::Function { args, .. } => args.iter().collect(),
            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                let mut out: Vec<&Expr> = when_clauses
                    .iter()
                    .flat_map(|(cond, result)| [cond, result])
                    .collect();
                if let Some(e) = else_clause {
                    out.push(e);
                }
                out
            }
            Expr::In { expr, values, .. } => {
                let mut out = vec![expr.as_ref()];
                out.extend(values.iter());
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr, low, high],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Column { .. }
            | Expr::Source(_)
            | Expr::Member { .. }
            | Expr::Literal(_)
            | Expr::Subquery(_)
            | Expr::Raw(_)
            | Expr::CountStar => Vec::new(),
            Expr::Binary { left, right, .. } | Expr::IsDistinctFrom { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            Expr::Unary { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::Paren(expr) => vec![expr.as_mut()],
            Expr::Function { args, .. } => args.iter_mut().collect(),
            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                let mut out: Vec<&mut Expr> = Vec::new();
                for (cond, result) in when_clauses.iter_mut() {
                    out.push(cond);
                    out.push(result);
                }
                if let Some(e) = else_clause {
                    out.push(e.as_mut());
                }
                out
            }
            Expr::In { expr, values, .. } => {
                let mut out = vec![expr.as_mut()];
                out.extend(values.iter_mut());
                out
            }
            Expr::Between {
                expr, low, high, ..
            } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
        }
    }

    /// The query source this node refers to directly, if any.
    pub fn referenced_source(&self) -> Option<QuerySourceId> {
        match self {
            Expr::Source(id) | Expr::Member { source: id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Whether this expression refers to `source` anywhere in its tree.
    pub fn references(&self, source: QuerySourceId) -> bool {
        self.referenced_source() == Some(source)
            || self.children().into_iter().any(|c| c.references(source))
    }

    /// Point every source reference at its clone, as recorded in `ctx`.
    pub fn remap_sources(&mut self, ctx: &CloneContext) {
        match self {
            Expr::Source(id) | Expr::Member { source: id, .. } => *id = ctx.resolve(*id),
            _ => {}
        }
        for child in self.children_mut() {
            child.remap_sources(ctx);
        }
    }

    // ==================== Serialization ====================

    /// Serialize without any declared query sources (plain column expressions).
    pub fn to_sql(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut ctx = BuildContext::new(dialect);
        let sql = self.build(&mut ctx)?;
        Ok((sql, ctx.into_params()))
    }

    /// Serialize this expression, binding literals into `ctx`.
    ///
    /// Fails with `UnsupportedQueryConstruct` when a referenced query source was not
    /// declared in `ctx`.
    pub fn build(&self, ctx: &mut BuildContext) -> Result<String> {
        let dialect = ctx.dialect();
        let sql = match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Source(id) => dialect.quote_identifier(ctx.alias(*id)?),

            Expr::Member { source, name } => {
                let alias = ctx.alias(*source)?;
                format!(
                    "{}.{}",
                    dialect.quote_identifier(alias),
                    dialect.quote_identifier(name)
                )
            }

            Expr::Literal(value) => ctx.bind(value.clone()),

            Expr::Binary { left, op, right } => {
                let left_sql = left.build(ctx)?;
                let right_sql = right.build(ctx)?;
                let op_sql = if op.is_logical() {
                    dialect.keyword(&op.as_str().to_ascii_lowercase())
                } else {
                    op.as_str().to_string()
                };
                if *op == BinaryOp::Concat && dialect == Dialect::Mysql {
                    format!("CONCAT({left_sql}, {right_sql})")
                } else {
                    format!("{left_sql} {op_sql} {right_sql}")
                }
            }

            Expr::Unary { op, expr } => {
                let expr_sql = expr.build(ctx)?;
                match op {
                    UnaryOp::Not => format!("{} {expr_sql}", dialect.keyword("not")),
                    UnaryOp::Neg => format!("-{expr_sql}"),
                }
            }

            Expr::Function { name, args } => {
                let mut arg_sqls = Vec::with_capacity(args.len());
                for a in args {
                    arg_sqls.push(a.build(ctx)?);
                }
                format!("{name}({})", arg_sqls.join(", "))
            }

            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                let mut sql = dialect.keyword("case");
                for (condition, result) in when_clauses {
                    let cond_sql = condition.build(ctx)?;
                    let result_sql = result.build(ctx)?;
                    sql.push_str(&format!(
                        " {} {cond_sql} {} {result_sql}",
                        dialect.keyword("when"),
                        dialect.keyword("then")
                    ));
                }
                if let Some(else_expr) = else_clause {
                    let else_sql = else_expr.build(ctx)?;
                    sql.push_str(&format!(" {} {else_sql}", dialect.keyword("else")));
                }
                sql.push(' ');
                sql.push_str(&dialect.keyword("end"));
                sql
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build(ctx)?;
                let mut value_sqls = Vec::with_capacity(values.len());
                for v in values {
                    value_sqls.push(v.build(ctx)?);
                }
                let keyword = if *negated { "not in" } else { "in" };
                format!(
                    "{expr_sql} {} ({})",
                    dialect.keyword(keyword),
                    value_sqls.join(", ")
                )
            }

            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let expr_sql = expr.build(ctx)?;
                let low_sql = low.build(ctx)?;
                let high_sql = high.build(ctx)?;
                let keyword = if *negated { "not between" } else { "between" };
                format!(
                    "{expr_sql} {} {low_sql} {} {high_sql}",
                    dialect.keyword(keyword),
                    dialect.keyword("and")
                )
            }

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(ctx)?;
                let keyword = if *negated { "is not null" } else { "is null" };
                format!("{expr_sql} {}", dialect.keyword(keyword))
            }

            Expr::IsDistinctFrom {
                left,
                right,
                negated,
            } => {
                let left_sql = left.build(ctx)?;
                let right_sql = right.build(ctx)?;
                let keyword = if *negated {
                    "is not distinct from"
                } else {
                    "is distinct from"
                };
                format!("{left_sql} {} {right_sql}", dialect.keyword(keyword))
            }

            Expr::Cast { expr, type_name } => {
                let expr_sql = expr.build(ctx)?;
                format!("cast({expr_sql} as {type_name})")
            }

            Expr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let expr_sql = expr.build(ctx)?;
                let param = ctx.bind(Value::Text(pattern.clone()));
                let not_str = if *negated {
                    format!("{} ", dialect.keyword("not"))
                } else {
                    String::new()
                };
                if *case_insensitive && dialect.supports_ilike() {
                    format!("{expr_sql} {not_str}ILIKE {param}")
                } else if *case_insensitive {
                    // Fallback for dialects without ILIKE
                    format!(
                        "lower({expr_sql}) {not_str}{} lower({param})",
                        dialect.keyword("like")
                    )
                } else {
                    format!("{expr_sql} {not_str}{} {param}", dialect.keyword("like"))
                }
            }

            Expr::Subquery(sql) => format!("({sql})"),

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => format!("({})", expr.build(ctx)?),

            Expr::CountStar => "count(*)".to_string(),
        };
        Ok(sql)
    }
}

fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::BigInt(i) => write!(f, "{i}"),
        Value::Double(d) => write!(f, "{d}"),
        Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        Value::Json(j) => write!(f, "{j}"),
    }
}

fn fmt_list(items: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Debug-oriented rendering: literals inline, sources as `[#id]`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { table: Some(t), name } => write!(f, "{t}.{name}"),
            Expr::Column { table: None, name } => f.write_str(name),
            Expr::Source(id) => write!(f, "[{id}]"),
            Expr::Member { source, name } => write!(f, "[{source}].{name}"),
            Expr::Literal(v) => fmt_value(v, f),
            Expr::Binary { left, op, right } => write!(f, "{left} {} {right}", op.as_str()),
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => write!(f, "NOT {expr}"),
            Expr::Unary {
                op: UnaryOp::Neg,
                expr,
            } => write!(f, "-{expr}"),
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                fmt_list(args, f)?;
                f.write_str(")")
            }
            Expr::Case {
                when_clauses,
                else_clause,
            } => {
                f.write_str("CASE")?;
                for (cond, result) in when_clauses {
                    write!(f, " WHEN {cond} THEN {result}")?;
                }
                if let Some(e) = else_clause {
                    write!(f, " ELSE {e}")?;
                }
                f.write_str(" END")
            }
            Expr::In {
                expr,
                values,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                fmt_list(values, f)?;
                f.write_str(")")
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Expr::IsDistinctFrom {
                left,
                right,
                negated,
            } => write!(
                f,
                "{left} IS {}DISTINCT FROM {right}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Cast { expr, type_name } => write!(f, "CAST({expr} AS {type_name})"),
            Expr::Like {
                expr,
                pattern,
                negated,
                ..
            } => write!(
                f,
                "{expr} {}LIKE '{pattern}'",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Subquery(sql) => write!(f, "({sql})"),
            Expr::Raw(sql) => f.write_str(sql),
            Expr::Paren(expr) => write!(f, "({expr})"),
            Expr::CountStar => f.write_str("COUNT(*)"),
        }
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

impl From<&str> for Expr {
    fn from(s: &str) -> Self {
        Expr::Literal(Value::Text(s.to_string()))
    }
}

impl From<String> for Expr {
    fn from(s: String) -> Self {
        Expr::Literal(Value::Text(s))
    }
}

impl From<i32> for Expr {
    fn from(n: i32) -> Self {
        Expr::Literal(Value::Int(n))
    }
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::Literal(Value::BigInt(n))
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }
}

impl From<f64> for Expr {
    fn from(n: f64) -> Self {
        Expr::Literal(Value::Double(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pg(expr: &Expr) -> (String, Vec<Value>) {
        expr.to_sql(Dialect::Postgres).unwrap()
    }

    #[test]
    fn test_column_simple() {
        let (sql, params) = build_pg(&Expr::col("name"));
        assert_eq!(sql, "\"name\"");
        assert!(params.is_empty());
    }

    #[test]
    fn test_column_qualified() {
        let (sql, _) = build_pg(&Expr::qualified("users", "name"));
        assert_eq!(sql, "\"users\".\"name\"");
    }

    #[test]
    fn test_literal_binds_parameter() {
        let (sql, params) = build_pg(&Expr::col("age").eq(18));
        assert_eq!(sql, "\"age\" = $1");
        assert_eq!(params, vec![Value::Int(18)]);
    }

    #[test]
    fn test_and_or_keywords_follow_dialect() {
        let expr = Expr::col("a").eq(1).and(Expr::col("b").eq(2));
        assert_eq!(build_pg(&expr).0, "\"a\" = $1 AND \"b\" = $2");

        let (hql, _) = expr.to_sql(Dialect::Hql).unwrap();
        assert_eq!(hql, "a = :p1 and b = :p2");
    }

    #[test]
    fn test_null_checks() {
        assert_eq!(build_pg(&Expr::col("x").is_null()).0, "\"x\" IS NULL");
        assert_eq!(build_pg(&Expr::col("x").is_not_null()).0, "\"x\" IS NOT NULL");
    }

    #[test]
    fn test_in_and_between() {
        let (sql, params) = build_pg(&Expr::col("id").in_list(vec![1, 2, 3]));
        assert_eq!(sql, "\"id\" IN ($1, $2, $3)");
        assert_eq!(params.len(), 3);

        let (sql, _) = build_pg(&Expr::col("age").between(18, 65));
        assert_eq!(sql, "\"age\" BETWEEN $1 AND $2");
    }

    #[test]
    fn test_ilike_fallback_sqlite() {
        let (sql, _) = Expr::col("name")
            .ilike("%a%")
            .to_sql(Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql, "lower(\"name\") LIKE lower(?1)");
    }

    #[test]
    fn test_member_requires_declared_source() {
        let source = QuerySourceId::fresh();
        let expr = Expr::member(source, "total").gt(10);

        let err = expr.to_sql(Dialect::Hql).unwrap_err();
        assert!(err.is_unsupported());

        let mut ctx = BuildContext::new(Dialect::Hql);
        ctx.declare_source(source, "o");
        assert_eq!(expr.build(&mut ctx).unwrap(), "o.total > :p1");
        assert_eq!(ctx.params(), &[Value::Int(10)]);
    }

    #[test]
    fn test_references_walks_tree() {
        let a = QuerySourceId::fresh();
        let b = QuerySourceId::fresh();
        let expr = Expr::col("x")
            .eq(1)
            .and(Expr::function("UPPER", vec![Expr::member(a, "name")]).eq("X"));
        assert!(expr.references(a));
        assert!(!expr.references(b));
    }

    #[test]
    fn test_remap_sources() {
        let original = QuerySourceId::fresh();
        let clone = QuerySourceId::fresh();
        let mut ctx = CloneContext::new();
        ctx.add_mapping(original, clone);

        let mut expr = Expr::member(original, "total").gt(Expr::source(original));
        expr.remap_sources(&ctx);
        assert!(expr.references(clone));
        assert!(!expr.references(original));
    }

    #[test]
    fn test_blank_raw() {
        assert!(Expr::raw("  ").is_blank());
        assert!(!Expr::raw("orders").is_blank());
        assert!(!Expr::col("").is_blank());
    }

    #[test]
    fn test_display() {
        let id = QuerySourceId::fresh();
        let expr = Expr::member(id, "name").eq("O'Brien");
        assert_eq!(expr.to_string(), format!("[{id}].name = 'O''Brien'"));
    }
}
