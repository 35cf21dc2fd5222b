/// Statement execution
///
/// [`SqlExecutor`] is the collaborator the engine runs compiled statements
/// against. [`MemoryExecutor`] evaluates statements over in-memory tables; it
/// backs embedding without a database and the test suites.
use super::ast::*;
use crate::error::{Error, Result};
use crate::value::{composite_key, Row, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tracing::trace;

/// Runs SELECT statements and returns rows keyed by output column name.
///
/// One executor is shared by every query of an engine, possibly across
/// threads; implementations may still be written as `async fn`.
pub trait SqlExecutor: Sync {
    fn query(
        &self,
        statement: &SelectStatement,
    ) -> impl Future<Output = Result<Vec<Row>>> + Send;
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for &T {
    fn query(
        &self,
        statement: &SelectStatement,
    ) -> impl Future<Output = Result<Vec<Row>>> + Send {
        (**self).query(statement)
    }
}

impl<T: SqlExecutor + Send + ?Sized> SqlExecutor for Arc<T> {
    fn query(
        &self,
        statement: &SelectStatement,
    ) -> impl Future<Output = Result<Vec<Row>>> + Send {
        (**self).query(statement)
    }
}

/// In-memory tables with a statement log.
///
/// Tables come into existence on first insert; reading a table that was
/// never written yields no rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryExecutor {
    tables: Arc<RwLock<HashMap<String, Vec<Row>>>>,
    log: Arc<Mutex<Vec<SelectStatement>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Row) -> Result<()> {
        self.insert_rows(table, [row])
    }

    pub fn insert_rows<I>(&self, table: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.entry(table.to_string()).or_default().extend(rows);
        Ok(())
    }

    /// Rows of `table` in insertion order
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }

    /// Statements executed so far, oldest first
    pub fn statements(&self) -> Vec<SelectStatement> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn clear_statements(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    /// Evaluate `statement` synchronously
    pub fn execute(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        trace!(sql = %statement, "memory executor");
        if let Ok(mut log) = self.log.lock() {
            log.push(statement.clone());
        }
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let eval = Evaluator { tables: &tables };
        eval.run(statement, &[])
    }
}

impl SqlExecutor for MemoryExecutor {
    async fn query(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        self.execute(statement)
    }
}

fn poisoned() -> Error {
    Error::Executor("memory executor lock poisoned".to_string())
}

static NO_ROWS: Vec<Row> = Vec::new();

/// One combined row: the row bound to each source qualifier, `None` for the
/// null-extended side of an outer join
#[derive(Debug, Clone, Default)]
struct Tuple<'a> {
    entries: Vec<(&'a str, Option<&'a Row>)>,
}

impl<'a> Tuple<'a> {
    fn lookup(&self, column: &ColumnRef) -> Option<Value> {
        self.entries
            .iter()
            .find(|(qualifier, _)| *qualifier == column.qualifier)
            .map(|(_, row)| {
                row.and_then(|r| r.get(&column.name))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
    }

    fn joined(&self, qualifier: &'a str, row: Option<&'a Row>) -> Tuple<'a> {
        let mut entries = self.entries.clone();
        entries.push((qualifier, row));
        Tuple { entries }
    }
}

struct Evaluator<'a> {
    tables: &'a HashMap<String, Vec<Row>>,
}

impl<'a> Evaluator<'a> {
    fn table(&self, name: &str) -> &'a [Row] {
        self.tables.get(name).unwrap_or(&NO_ROWS)
    }

    fn run(&self, stmt: &'a SelectStatement, outer: &[&Tuple<'a>]) -> Result<Vec<Row>> {
        let tuples = self.select_tuples(stmt, outer)?;

        if let Some(SelectColumn::Aggregate { function, alias }) = stmt
            .select
            .columns
            .iter()
            .find(|c| matches!(c, SelectColumn::Aggregate { .. }))
        {
            let name = alias.clone().unwrap_or_else(|| format!("{}(*)", function));
            let value = match function {
                AggregateFunction::Count => Value::Integer(tuples.len() as i64),
            };
            return Ok(vec![Row::from([(name, value)])]);
        }

        let tuples = self.limit(stmt, tuples);
        tuples
            .iter()
            .map(|tuple| self.project(stmt, tuple, outer))
            .collect()
    }

    /// FROM, JOIN, WHERE, GROUP BY and ORDER BY
    fn select_tuples(
        &self,
        stmt: &'a SelectStatement,
        outer: &[&Tuple<'a>],
    ) -> Result<Vec<Tuple<'a>>> {
        let base_qualifier = stmt.from.qualifier();
        let mut tuples: Vec<Tuple<'a>> = self
            .table(&stmt.from.table)
            .iter()
            .map(|row| Tuple {
                entries: vec![(base_qualifier, Some(row))],
            })
            .collect();
        let mut qualifiers = vec![base_qualifier];

        for join in &stmt.from.joins {
            tuples = self.join(&tuples, &qualifiers, join, outer)?;
            qualifiers.push(join.alias.as_str());
        }

        if let Some(where_clause) = &stmt.where_clause {
            let mut kept = Vec::with_capacity(tuples.len());
            for tuple in tuples {
                if self.predicate(&where_clause.condition, &tuple, outer)? == Some(true) {
                    kept.push(tuple);
                }
            }
            tuples = kept;
        }

        if let Some(group_by) = &stmt.group_by {
            // Grouping without aggregates: the first row of each group stands
            // for the group
            let mut seen = HashSet::new();
            let mut kept = Vec::new();
            for tuple in tuples {
                let values = group_by
                    .columns
                    .iter()
                    .map(|c| self.column(c, &tuple, outer))
                    .collect::<Result<Vec<_>>>()?;
                if seen.insert(composite_key(&values)) {
                    kept.push(tuple);
                }
            }
            tuples = kept;
        }

        if let Some(order_by) = &stmt.order_by {
            let mut keyed = tuples
                .into_iter()
                .map(|tuple| {
                    let keys = order_by
                        .columns
                        .iter()
                        .map(|c| self.column(&c.column, &tuple, outer))
                        .collect::<Result<Vec<_>>>()?;
                    Ok::<_, Error>((keys, tuple))
                })
                .collect::<Result<Vec<_>>>()?;
            keyed.sort_by(|(a, _), (b, _)| compare_keys(&order_by.columns, a, b));
            tuples = keyed.into_iter().map(|(_, tuple)| tuple).collect();
        }

        Ok(tuples)
    }

    fn join(
        &self,
        left: &[Tuple<'a>],
        left_qualifiers: &[&'a str],
        join: &'a Join,
        outer: &[&Tuple<'a>],
    ) -> Result<Vec<Tuple<'a>>> {
        let right = self.table(&join.table);
        let alias = join.alias.as_str();
        let mut result = Vec::new();
        let mut right_matched = vec![false; right.len()];

        for l_tuple in left {
            let mut matched = false;
            for (r_idx, r_row) in right.iter().enumerate() {
                let candidate = l_tuple.joined(alias, Some(r_row));
                if self.predicate(&join.condition, &candidate, outer)? == Some(true) {
                    result.push(candidate);
                    matched = true;
                    right_matched[r_idx] = true;
                }
            }
            if !matched && matches!(join.join_type, JoinType::Left | JoinType::Full) {
                result.push(l_tuple.joined(alias, None));
            }
        }

        match join.join_type {
            JoinType::Inner | JoinType::Left => {}
            JoinType::Right | JoinType::Full => {
                self.push_unmatched_right(&mut result, right, &right_matched, left_qualifiers, alias);
            }
        }

        Ok(result)
    }

    fn push_unmatched_right(
        &self,
        result: &mut Vec<Tuple<'a>>,
        right: &'a [Row],
        right_matched: &[bool],
        left_qualifiers: &[&'a str],
        alias: &'a str,
    ) {
        for (r_row, _) in right
            .iter()
            .zip(right_matched)
            .filter(|(_, matched)| !**matched)
        {
            let mut entries: Vec<(&'a str, Option<&'a Row>)> =
                left_qualifiers.iter().map(|q| (*q, None)).collect();
            entries.push((alias, Some(r_row)));
            result.push(Tuple { entries });
        }
    }

    fn limit(&self, stmt: &SelectStatement, tuples: Vec<Tuple<'a>>) -> Vec<Tuple<'a>> {
        match &stmt.limit {
            Some(limit) => tuples
                .into_iter()
                .skip(limit.offset.unwrap_or(0))
                .take(limit.count.unwrap_or(usize::MAX))
                .collect(),
            None => tuples,
        }
    }

    fn project(
        &self,
        stmt: &SelectStatement,
        tuple: &Tuple<'a>,
        outer: &[&Tuple<'a>],
    ) -> Result<Row> {
        let mut row = Row::new();
        if stmt.select.columns.is_empty() {
            for (_, source) in &tuple.entries {
                if let Some(source) = source {
                    row.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            return Ok(row);
        }
        for column in &stmt.select.columns {
            if let SelectColumn::Column { column: col, .. } = column {
                row.insert(column.output_name(), self.column(col, tuple, outer)?);
            }
        }
        Ok(row)
    }

    fn column(&self, column: &ColumnRef, tuple: &Tuple<'a>, outer: &[&Tuple<'a>]) -> Result<Value> {
        std::iter::once(tuple)
            .chain(outer.iter().copied())
            .find_map(|t| t.lookup(column))
            .ok_or_else(|| Error::Executor(format!("unknown table or alias: {}", column.qualifier)))
    }

    fn value(&self, expr: &'a Expression, tuple: &Tuple<'a>, outer: &[&Tuple<'a>]) -> Result<Value> {
        match expr {
            Expression::Column(column) => self.column(column, tuple, outer),
            Expression::Literal(value) => Ok(value.clone()),
            other => Ok(match self.predicate(other, tuple, outer)? {
                Some(b) => Value::Boolean(b),
                None => Value::Null,
            }),
        }
    }

    /// Three-valued predicate evaluation; `None` is SQL UNKNOWN
    fn predicate(
        &self,
        expr: &'a Expression,
        tuple: &Tuple<'a>,
        outer: &[&Tuple<'a>],
    ) -> Result<Option<bool>> {
        Ok(match expr {
            Expression::Column(_) | Expression::Literal(_) => {
                match self.value(expr, tuple, outer)? {
                    Value::Boolean(b) => Some(b),
                    Value::Null => None,
                    _ => Some(true),
                }
            }
            Expression::BinaryOp { left, op, right } => {
                let l = self.value(left, tuple, outer)?;
                let r = self.value(right, tuple, outer)?;
                l.compare(&r).map(|ord| match op {
                    BinaryOperator::Eq => ord == Ordering::Equal,
                    BinaryOperator::Ne => ord != Ordering::Equal,
                    BinaryOperator::Lt => ord == Ordering::Less,
                    BinaryOperator::Le => ord != Ordering::Greater,
                    BinaryOperator::Gt => ord == Ordering::Greater,
                    BinaryOperator::Ge => ord != Ordering::Less,
                })
            }
            Expression::LogicalOp { left, op, right } => {
                let l = self.predicate(left, tuple, outer)?;
                match (op, l) {
                    (LogicalOperator::And, Some(false)) => Some(false),
                    (LogicalOperator::Or, Some(true)) => Some(true),
                    _ => {
                        let r = self.predicate(right, tuple, outer)?;
                        match op {
                            LogicalOperator::And => match (l, r) {
                                (_, Some(false)) => Some(false),
                                (Some(true), Some(true)) => Some(true),
                                _ => None,
                            },
                            LogicalOperator::Or => match (l, r) {
                                (_, Some(true)) => Some(true),
                                (Some(false), Some(false)) => Some(false),
                                _ => None,
                            },
                        }
                    }
                }
            }
            Expression::Not(inner) => self.predicate(inner, tuple, outer)?.map(|b| !b),
            Expression::Like {
                expr,
                pattern,
                case_insensitive,
            } => match self.value(expr, tuple, outer)? {
                Value::Null => None,
                Value::String(s) if *case_insensitive => {
                    Some(like_match(&s.to_lowercase(), &pattern.to_lowercase()))
                }
                Value::String(s) => Some(like_match(&s, pattern)),
                other => Some(like_match(&other.to_string(), pattern)),
            },
            Expression::In {
                expr,
                values,
                negated,
            } => {
                let value = self.value(expr, tuple, outer)?;
                if value.is_null() {
                    None
                } else {
                    let found = values.iter().any(|v| value.sql_eq(v));
                    Some(found != *negated)
                }
            }
            Expression::IsNull { expr, negated } => {
                let is_null = self.value(expr, tuple, outer)?.is_null();
                Some(is_null != *negated)
            }
            Expression::Exists(subquery) => {
                let mut scope = Vec::with_capacity(outer.len() + 1);
                scope.push(tuple);
                scope.extend(outer.iter().copied());
                Some(!self.select_tuples(subquery, &scope)?.is_empty())
            }
        })
    }
}

/// ORDER BY comparison. Without an explicit placement NULLs sort as the
/// largest value: last ascending, first descending.
fn compare_keys(columns: &[OrderByColumn], a: &[Value], b: &[Value]) -> Ordering {
    for (col, (a, b)) in columns.iter().zip(a.iter().zip(b)) {
        let nulls_first = match col.nulls {
            Some(NullsOrder::First) => true,
            Some(NullsOrder::Last) => false,
            None => col.direction == OrderDirection::Desc,
        };
        let ordering = match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) if nulls_first => Ordering::Less,
            (true, false) => Ordering::Greater,
            (false, true) if nulls_first => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => match col.direction {
                OrderDirection::Asc => a.sort_cmp(b),
                OrderDirection::Desc => a.sort_cmp(b).reverse(),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// LIKE matching with `%`, `_` and `\` escapes
fn like_match(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        tokens.push(match ch {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            c => Token::Char(c),
        });
    }

    let text: Vec<char> = text.chars().collect();
    // matches[j]: pattern prefix of length i matches text prefix of length j
    let mut matches = vec![false; text.len() + 1];
    matches[0] = true;
    for token in &tokens {
        let mut next = vec![false; text.len() + 1];
        match token {
            Token::Any => {
                let mut reachable = false;
                for j in 0..=text.len() {
                    reachable |= matches[j];
                    next[j] = reachable;
                }
            }
            Token::One => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1];
                }
            }
            Token::Char(c) => {
                for j in 1..=text.len() {
                    next[j] = matches[j - 1] && text[j - 1] == *c;
                }
            }
        }
        matches = next;
    }
    matches[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        serde_json::from_value(value).unwrap()
    }

    fn executor() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        executor
            .insert_rows(
                "users",
                [
                    row(json!({"id": 1, "name": "Alice", "team": "a"})),
                    row(json!({"id": 2, "name": "Bob", "team": null})),
                    row(json!({"id": 3, "name": "carol", "team": "b"})),
                ],
            )
            .unwrap();
        executor
            .insert_rows(
                "orders",
                [
                    row(json!({"id": 10, "userId": 1, "total": 5})),
                    row(json!({"id": 11, "userId": 1, "total": 7})),
                    row(json!({"id": 12, "userId": 3, "total": 1})),
                    row(json!({"id": 13, "userId": 9, "total": 2})),
                ],
            )
            .unwrap();
        executor
    }

    fn select(table: &str, columns: &[(&str, &str)]) -> SelectStatement {
        let mut stmt = SelectStatement::from_table(table);
        for (q, c) in columns {
            stmt.push_column(ColumnRef::new(*q, *c), Some(format!("{}_{}", q, c)));
        }
        stmt
    }

    fn join(join_type: JoinType) -> Join {
        Join {
            join_type,
            table: "orders".to_string(),
            alias: "o".to_string(),
            condition: Expression::binary(
                Expression::column("users", "id"),
                BinaryOperator::Eq,
                Expression::column("o", "userId"),
            ),
        }
    }

    #[test]
    fn test_table_scan() {
        let executor = executor();
        let rows = executor
            .execute(&select("users", &[("users", "name")]))
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["users_name"], Value::from("Alice"));
        assert_eq!(executor.statements().len(), 1);
    }

    #[test]
    fn test_join_types() {
        let executor = executor();
        let count = |join_type| {
            let mut stmt = select("users", &[("users", "id"), ("o", "id")]);
            stmt.from.joins.push(join(join_type));
            executor.execute(&stmt).unwrap().len()
        };
        assert_eq!(count(JoinType::Inner), 3);
        assert_eq!(count(JoinType::Left), 4);
        assert_eq!(count(JoinType::Right), 4);
        assert_eq!(count(JoinType::Full), 5);
    }

    #[test]
    fn test_left_join_null_extends() {
        let executor = executor();
        let mut stmt = select("users", &[("users", "id"), ("o", "id")]);
        stmt.from.joins.push(join(JoinType::Left));
        stmt.and_where(Expression::binary(
            Expression::column("users", "id"),
            BinaryOperator::Eq,
            Expression::literal(2),
        ));
        let rows = executor.execute(&stmt).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["o_id"], Value::Null);
    }

    #[test]
    fn test_null_comparisons_are_unknown() {
        let executor = executor();
        let mut stmt = select("users", &[("users", "id")]);
        stmt.and_where(
            Expression::binary(
                Expression::column("users", "team"),
                BinaryOperator::Eq,
                Expression::literal("a"),
            )
            .negate(),
        );
        let rows = executor.execute(&stmt).unwrap();
        // Bob's NULL team is neither equal nor unequal
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["users_id"], Value::Integer(3));
    }

    #[test]
    fn test_order_by_with_nulls_and_limit() {
        let executor = executor();
        let mut stmt = select("users", &[("users", "id")]);
        stmt.order_by = Some(OrderByClause {
            columns: vec![OrderByColumn {
                column: ColumnRef::new("users", "team"),
                direction: OrderDirection::Asc,
                nulls: Some(NullsOrder::First),
            }],
        });
        stmt.limit = Some(LimitClause {
            count: Some(2),
            offset: None,
        });
        let ids: Vec<Value> = executor
            .execute(&stmt)
            .unwrap()
            .into_iter()
            .map(|r| r["users_id"].clone())
            .collect();
        assert_eq!(ids, vec![Value::Integer(2), Value::Integer(1)]);
    }

    #[test]
    fn test_like_and_in() {
        let executor = executor();
        let mut stmt = select("users", &[("users", "id")]);
        stmt.and_where(Expression::Like {
            expr: Box::new(Expression::column("users", "name")),
            pattern: "C%".to_string(),
            case_insensitive: true,
        });
        assert_eq!(executor.execute(&stmt).unwrap().len(), 1);

        let mut stmt = select("orders", &[("orders", "id")]);
        stmt.and_where(Expression::In {
            expr: Box::new(Expression::column("orders", "userId")),
            values: vec![Value::Integer(1), Value::Integer(3)],
            negated: false,
        });
        assert_eq!(executor.execute(&stmt).unwrap().len(), 3);
    }

    #[test]
    fn test_correlated_exists() {
        let executor = executor();
        let mut sub = SelectStatement::from_table("orders").with_alias("x");
        sub.and_where(Expression::binary(
            Expression::column("x", "userId"),
            BinaryOperator::Eq,
            Expression::column("users", "id"),
        ));
        sub.and_where(Expression::binary(
            Expression::column("x", "total"),
            BinaryOperator::Gt,
            Expression::literal(6),
        ));
        let mut stmt = select("users", &[("users", "id")]);
        stmt.and_where(Expression::Exists(Box::new(sub)));
        let rows = executor.execute(&stmt).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["users_id"], Value::Integer(1));
    }

    #[test]
    fn test_group_by_keeps_first_row() {
        let executor = executor();
        let mut stmt = select("orders", &[("orders", "id")]);
        stmt.group_by = Some(GroupByClause {
            columns: vec![ColumnRef::new("orders", "userId")],
        });
        let rows = executor.execute(&stmt).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["orders_id"], Value::Integer(10));
    }

    #[test]
    fn test_count() {
        let executor = executor();
        let mut stmt = SelectStatement::from_table("orders");
        stmt.select.columns.push(SelectColumn::Aggregate {
            function: AggregateFunction::Count,
            alias: Some("_count".to_string()),
        });
        stmt.and_where(Expression::binary(
            Expression::column("orders", "userId"),
            BinaryOperator::Eq,
            Expression::literal(1),
        ));
        let rows = executor.execute(&stmt).unwrap();
        assert_eq!(rows, vec![row(json!({"_count": 2}))]);
    }

    #[test]
    fn test_unknown_qualifier_is_an_error() {
        let executor = executor();
        let stmt = select("users", &[("nope", "id")]);
        assert!(matches!(executor.execute(&stmt), Err(Error::Executor(_))));
    }

    #[tokio::test]
    async fn test_query_through_shared_handles() {
        let executor = Arc::new(executor());
        let stmt = select("orders", &[("orders", "id")]);
        let by_arc = executor.query(&stmt).await.unwrap();
        let by_ref = (&*executor).query(&stmt).await.unwrap();
        assert_eq!(by_arc, by_ref);
        assert_eq!(executor.statements().len(), 2);
    }

    #[test]
    fn test_like_escapes() {
        assert!(like_match("50%", "50\\%"));
        assert!(!like_match("500", "50\\%"));
        assert!(like_match("abc", "a_c"));
        assert!(like_match("", "%"));
        assert!(!like_match("ab", "a"));
    }
}
