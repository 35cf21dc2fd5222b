/// Compiled statement AST
///
/// The executable form of a query descriptor: one SELECT with aliased joins,
/// a predicate tree, grouping, ordering and paging. Statements render either
/// as parametrized SQL for drivers ([`SelectStatement::to_sql`]) or, through
/// `Display`, as inline-literal SQL for logs.
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A complete SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub select: SelectClause,
    pub from: FromClause,
    pub where_clause: Option<WhereClause>,
    pub group_by: Option<GroupByClause>,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<LimitClause>,
}

impl SelectStatement {
    /// `SELECT <nothing> FROM table`; columns are pushed by the caller
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            select: SelectClause {
                columns: Vec::new(),
            },
            from: FromClause {
                table: table.into(),
                alias: None,
                joins: Vec::new(),
            },
            where_clause: None,
            group_by: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.from.alias = Some(alias.into());
        self
    }

    /// Qualifier under which base-table columns are referenced
    pub fn base_qualifier(&self) -> &str {
        self.from.qualifier()
    }

    pub fn push_column(&mut self, column: ColumnRef, alias: Option<String>) {
        self.select
            .columns
            .push(SelectColumn::Column { column, alias });
    }

    /// AND `condition` into the WHERE clause
    pub fn and_where(&mut self, condition: Expression) {
        self.where_clause = Some(WhereClause {
            condition: match self.where_clause.take() {
                Some(existing) => existing.condition.and(condition),
                None => condition,
            },
        });
    }

    /// Render with placeholders; returns the SQL text and its parameters in
    /// placeholder order.
    pub fn to_sql(&self, style: PlaceholderStyle) -> (String, Vec<Value>) {
        let mut writer = SqlWriter::new(Some(style));
        writer.statement(self);
        (writer.sql, writer.params)
    }
}

/// SELECT clause specifying columns to retrieve
#[derive(Debug, Clone, PartialEq)]
pub struct SelectClause {
    pub columns: Vec<SelectColumn>,
}

/// A column in the SELECT clause
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// `q.column` or `q.column AS alias`
    Column {
        column: ColumnRef,
        alias: Option<String>,
    },
    /// `COUNT(*) AS alias`
    Aggregate {
        function: AggregateFunction,
        alias: Option<String>,
    },
}

impl SelectColumn {
    /// Key of this column in result rows
    pub fn output_name(&self) -> String {
        match self {
            SelectColumn::Column { column, alias } => {
                alias.clone().unwrap_or_else(|| column.name.clone())
            }
            SelectColumn::Aggregate { function, alias } => {
                alias.clone().unwrap_or_else(|| format!("{}(*)", function))
            }
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateFunction {
    Count,
}

/// A column qualified by table name or join alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub qualifier: String,
    pub name: String,
}

impl ColumnRef {
    pub fn new(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            qualifier: qualifier.into(),
            name: name.into(),
        }
    }
}

/// FROM clause with its joins
#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub table: String,
    pub alias: Option<String>,
    pub joins: Vec<Join>,
}

impl FromClause {
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// JOIN clause; the joined table is always referenced through `alias`
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub table: String,
    pub alias: String,
    pub condition: Expression,
}

/// Types of joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    #[default]
    Left,
    Right,
    Full,
}

/// WHERE clause for filtering
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub condition: Expression,
}

/// GROUP BY clause (used as row deduplication for `distinct`)
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByClause {
    pub columns: Vec<ColumnRef>,
}

/// Boolean/scalar expression for WHERE and JOIN conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Column(ColumnRef),
    Literal(Value),
    /// Comparison: column = value, column > value, ...
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    LogicalOp {
        left: Box<Expression>,
        op: LogicalOperator,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    /// LIKE with `%`/`_` wildcards
    Like {
        expr: Box<Expression>,
        pattern: String,
        case_insensitive: bool,
    },
    In {
        expr: Box<Expression>,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// Correlated subquery; its predicate may reference outer qualifiers
    Exists(Box<SelectStatement>),
}

impl Expression {
    pub fn column(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Expression::Column(ColumnRef::new(qualifier, name))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Self {
        Expression::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(self, other: Expression) -> Self {
        Expression::LogicalOp {
            left: Box::new(self),
            op: LogicalOperator::And,
            right: Box::new(other),
        }
    }

    pub fn or(self, other: Expression) -> Self {
        Expression::LogicalOp {
            left: Box::new(self),
            op: LogicalOperator::Or,
            right: Box::new(other),
        }
    }

    pub fn negate(self) -> Self {
        Expression::Not(Box::new(self))
    }

    /// Fold with AND; `None` for an empty input
    pub fn conjunction(exprs: impl IntoIterator<Item = Expression>) -> Option<Expression> {
        exprs.into_iter().reduce(Expression::and)
    }

    /// Fold with OR; `None` for an empty input
    pub fn disjunction(exprs: impl IntoIterator<Item = Expression>) -> Option<Expression> {
        exprs.into_iter().reduce(Expression::or)
    }
}

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq, // =
    Ne, // <>
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

/// Logical operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

/// ORDER BY clause for sorting
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub columns: Vec<OrderByColumn>,
}

/// A sort key
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByColumn {
    pub column: ColumnRef,
    pub direction: OrderDirection,
    pub nulls: Option<NullsOrder>,
}

impl OrderByColumn {
    /// Same key, opposite direction and null placement
    pub fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            direction: match self.direction {
                OrderDirection::Asc => OrderDirection::Desc,
                OrderDirection::Desc => OrderDirection::Asc,
            },
            nulls: self.nulls.map(|n| match n {
                NullsOrder::First => NullsOrder::Last,
                NullsOrder::Last => NullsOrder::First,
            }),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// Placement of NULLs in a sort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NullsOrder {
    First,
    Last,
}

/// LIMIT/OFFSET; either part may be absent
#[derive(Debug, Clone, PartialEq)]
pub struct LimitClause {
    pub count: Option<usize>,
    pub offset: Option<usize>,
}

/// Parameter placeholder flavour for [`SelectStatement::to_sql`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (SQLite, MySQL)
    Question,
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
}

/// Shared renderer. Without a placeholder style literals are written inline
/// and identifiers are left unquoted.
struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    style: Option<PlaceholderStyle>,
}

impl SqlWriter {
    fn new(style: Option<PlaceholderStyle>) -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
            style,
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn ident(&mut self, name: &str) {
        if self.style.is_some() {
            self.sql.push('"');
            self.sql.push_str(&name.replace('"', "\"\""));
            self.sql.push('"');
        } else {
            self.sql.push_str(name);
        }
    }

    fn column_ref(&mut self, column: &ColumnRef) {
        self.ident(&column.qualifier);
        self.push(".");
        self.ident(&column.name);
    }

    fn value(&mut self, value: &Value) {
        match (self.style, value) {
            (_, Value::Null) => self.push("NULL"),
            (None, v) => self.sql.push_str(&v.to_string()),
            (Some(PlaceholderStyle::Question), v) => {
                self.params.push(v.clone());
                self.push("?");
            }
            (Some(PlaceholderStyle::Dollar), v) => {
                self.params.push(v.clone());
                let placeholder = format!("${}", self.params.len());
                self.push(&placeholder);
            }
        }
    }

    fn statement(&mut self, stmt: &SelectStatement) {
        self.push("SELECT ");
        if stmt.select.columns.is_empty() {
            self.push("*");
        }
        for (i, col) in stmt.select.columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            match col {
                SelectColumn::Column { column, alias } => {
                    self.column_ref(column);
                    if let Some(alias) = alias {
                        self.push(" AS ");
                        self.ident(alias);
                    }
                }
                SelectColumn::Aggregate { function, alias } => {
                    self.push(&format!("{}(*)", function));
                    if let Some(alias) = alias {
                        self.push(" AS ");
                        self.ident(alias);
                    }
                }
            }
        }

        self.push(" FROM ");
        self.ident(&stmt.from.table);
        if let Some(alias) = &stmt.from.alias {
            self.push(" AS ");
            self.ident(alias);
        }
        for join in &stmt.from.joins {
            self.push(&format!(" {} JOIN ", join.join_type));
            self.ident(&join.table);
            self.push(" AS ");
            self.ident(&join.alias);
            self.push(" ON ");
            self.expression(&join.condition);
        }

        if let Some(where_clause) = &stmt.where_clause {
            self.push(" WHERE ");
            self.expression(&where_clause.condition);
        }

        if let Some(group_by) = &stmt.group_by {
            self.push(" GROUP BY ");
            for (i, col) in group_by.columns.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.column_ref(col);
            }
        }

        if let Some(order_by) = &stmt.order_by {
            self.push(" ORDER BY ");
            for (i, col) in order_by.columns.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.column_ref(&col.column);
                self.push(&format!(" {}", col.direction));
                if let Some(nulls) = col.nulls {
                    self.push(&format!(" NULLS {}", nulls));
                }
            }
        }

        if let Some(limit) = &stmt.limit {
            if let Some(count) = limit.count {
                self.push(&format!(" LIMIT {}", count));
            }
            if let Some(offset) = limit.offset {
                self.push(&format!(" OFFSET {}", offset));
            }
        }
    }

    fn expression(&mut self, expr: &Expression) {
        match expr {
            Expression::Column(column) => self.column_ref(column),
            Expression::Literal(value) => self.value(value),
            Expression::BinaryOp { left, op, right } => {
                self.push("(");
                self.expression(left);
                self.push(&format!(" {} ", op));
                self.expression(right);
                self.push(")");
            }
            Expression::LogicalOp { left, op, right } => {
                self.push("(");
                self.expression(left);
                self.push(&format!(" {} ", op));
                self.expression(right);
                self.push(")");
            }
            Expression::Not(inner) => {
                self.push("NOT (");
                self.expression(inner);
                self.push(")");
            }
            Expression::Like {
                expr,
                pattern,
                case_insensitive,
            } => {
                let pattern = Value::String(pattern.clone());
                if *case_insensitive {
                    self.push("LOWER(");
                    self.expression(expr);
                    self.push(") LIKE LOWER(");
                    self.value(&pattern);
                    self.push(")");
                } else {
                    self.expression(expr);
                    self.push(" LIKE ");
                    self.value(&pattern);
                }
            }
            Expression::In {
                expr,
                values,
                negated,
            } => {
                self.expression(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                for (i, val) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.value(val);
                }
                self.push(")");
            }
            Expression::IsNull { expr, negated } => {
                self.expression(expr);
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expression::Exists(subquery) => {
                self.push("EXISTS (");
                self.statement(subquery);
                self.push(")");
            }
        }
    }
}

// Display implementations for logs and error messages

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut writer = SqlWriter::new(None);
        writer.statement(self);
        f.write_str(&writer.sql)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut writer = SqlWriter::new(None);
        writer.expression(self);
        f.write_str(&writer.sql)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.qualifier, self.name)
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT"),
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
            JoinType::Full => write!(f, "FULL"),
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::Eq => write!(f, "="),
            BinaryOperator::Ne => write!(f, "<>"),
            BinaryOperator::Lt => write!(f, "<"),
            BinaryOperator::Le => write!(f, "<="),
            BinaryOperator::Gt => write!(f, ">"),
            BinaryOperator::Ge => write!(f, ">="),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalOperator::And => write!(f, "AND"),
            LogicalOperator::Or => write!(f, "OR"),
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl fmt::Display for NullsOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NullsOrder::First => write!(f, "FIRST"),
            NullsOrder::Last => write!(f, "LAST"),
        }
    }
}
