//! Query execution.
//!
//! One [`QueryExecution`] serves one facade call: it compiles the descriptor
//! into statements, runs them through the executor and shapes the rows into
//! records. Both load strategies share the base statement built here.

mod join_path;
mod records;
mod separate;

use crate::config::{EngineConfig, RelationLoadStrategy};
use join_path::Level;
use records::{distinct_by, slice};
use relq_core::query::{
    AggregateFunction, BinaryOperator, ColumnRef, Expression, FindManyArgs, GroupByClause,
    JoinPlanner, JoinedTables, LimitClause, OrderByClause, OrderByColumn, OrderByCompiler,
    OrderDirection, SelectColumn, SelectStatement, SelectionResolver, SqlExecutor, WhereCompiler,
    WhereInput,
};
use relq_core::value::{Record, Row, Value};
use relq_core::{Error, Result, SchemaRegistry, TableMetadata};
use tracing::{debug, trace};

/// Output name of the count aggregate
const COUNT_ALIAS: &str = "_count";

/// Page window of one find call
#[derive(Debug, Clone, Copy)]
struct Paging {
    size: Option<usize>,
    skip: Option<usize>,
    /// Negative `take`: walk the order backwards, reverse before returning
    backwards: bool,
}

pub(crate) struct QueryExecution<'a, E> {
    registry: &'a SchemaRegistry,
    executor: &'a E,
    config: &'a EngineConfig,
}

impl<'a, E: SqlExecutor> QueryExecution<'a, E> {
    pub(crate) fn new(
        registry: &'a SchemaRegistry,
        executor: &'a E,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            config,
        }
    }

    fn table(&self, table: &str) -> Result<&'a TableMetadata> {
        self.registry
            .get_table(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    async fn run(&self, statement: &SelectStatement) -> Result<Vec<Row>> {
        trace!(sql = %statement, "executing statement");
        self.executor.query(statement).await
    }

    pub(crate) async fn find_many(&self, table: &str, args: &FindManyArgs) -> Result<Vec<Record>> {
        let meta = self.table(table)?;
        let selection = SelectionResolver::new(self.registry).resolve(
            table,
            args.select.as_ref(),
            args.include.as_ref(),
            args.omit.as_ref(),
        );
        let paging = Paging {
            size: self.config.page_size(args.take),
            skip: args.skip,
            backwards: args.take.is_some_and(|t| t < 0),
        };
        let strategy = args
            .relation_load_strategy
            .unwrap_or(self.config.default_strategy);

        if strategy == RelationLoadStrategy::Join && !selection.relations.is_empty() {
            let mut planner = JoinPlanner::new(self.registry);
            let distinct = distinct_columns(meta, args.distinct.as_deref());
            let layout = Level::plan(self.registry, &mut planner, table, &selection, &distinct);
            if !planner.get_joins().is_empty() {
                debug!(table, joins = planner.get_joins().len(), "loading relations with joins");
                return self
                    .join_path(meta, args, paging, &planner, &layout, &distinct)
                    .await;
            }
            debug!(table, "no relation can be joined, using follow-up queries");
        }

        debug!(
            table,
            relations = selection.relations.len(),
            "loading relations with follow-up queries"
        );
        let mut statement = self.base_statement(meta, args, paging, &JoinedTables::new(), true);
        let mut records = self.separate_path(meta, &mut statement, &selection).await?;
        if paging.backwards {
            records.reverse();
        }
        Ok(records)
    }

    async fn join_path(
        &self,
        meta: &TableMetadata,
        args: &FindManyArgs,
        paging: Paging,
        planner: &JoinPlanner<'_>,
        layout: &Level,
        distinct: &[String],
    ) -> Result<Vec<Record>> {
        // Fan-out repeats base rows, so row-level paging would cut records
        let fans_out = layout.fans_out();
        let joined = layout.joined_tables();
        let mut statement = self.base_statement(meta, args, paging, &joined, !fans_out);
        planner.apply(&mut statement);
        layout.project(&mut statement);

        let mut predicates = Vec::new();
        let mut order = Vec::new();
        layout.relation_clauses(
            &WhereCompiler::new(self.registry),
            &OrderByCompiler::new(self.registry),
            &mut predicates,
            &mut order,
        );
        if let Some(predicate) = Expression::conjunction(predicates) {
            statement.and_where(predicate);
        }
        if !order.is_empty() {
            statement
                .order_by
                .get_or_insert_with(|| OrderByClause {
                    columns: Vec::new(),
                })
                .columns
                .extend(order);
        }

        let rows = self.run(&statement).await?;
        let refs: Vec<&Row> = rows.iter().collect();
        let mut records = layout.assemble(&refs);
        if fans_out {
            records = slice(distinct_by(records, distinct), paging.skip, paging.size);
        }

        self.load_deferred(layout, records.iter_mut().collect())
            .await?;
        for record in records.iter_mut() {
            layout.strip(record);
        }
        if paging.backwards {
            records.reverse();
        }
        Ok(records)
    }

    /// SELECT over the base table with filter, cursor, ordering and, when
    /// `paged`, grouping and LIMIT/OFFSET. Columns are added by the caller.
    fn base_statement(
        &self,
        meta: &TableMetadata,
        args: &FindManyArgs,
        paging: Paging,
        joined: &JoinedTables,
        paged: bool,
    ) -> SelectStatement {
        let table = meta.name.as_str();
        let mut statement = SelectStatement::from_table(table);

        let filter = WhereCompiler::new(self.registry).compile(
            table,
            table,
            args.filter.as_ref(),
            joined,
        );
        if let Some(predicate) = filter {
            statement.and_where(predicate);
        }
        if let Some(predicate) = args
            .cursor
            .as_ref()
            .and_then(|cursor| cursor_predicate(meta, cursor, paging.backwards))
        {
            statement.and_where(predicate);
        }

        let mut keys =
            OrderByCompiler::new(self.registry).compile(table, table, args.order_by.as_ref(), joined);
        if keys.is_empty() && (args.cursor.is_some() || paging.backwards) {
            keys = meta
                .primary_key
                .iter()
                .filter(|pk| meta.has_column(pk))
                .map(|pk| OrderByColumn {
                    column: ColumnRef::new(table, pk),
                    direction: OrderDirection::Asc,
                    nulls: None,
                })
                .collect();
        }
        if paging.backwards {
            keys = keys.iter().map(OrderByColumn::reversed).collect();
        }
        if !keys.is_empty() {
            statement.order_by = Some(OrderByClause { columns: keys });
        }

        if paged {
            let distinct = distinct_columns(meta, args.distinct.as_deref());
            if !distinct.is_empty() {
                statement.group_by = Some(GroupByClause {
                    columns: distinct
                        .iter()
                        .map(|column| ColumnRef::new(table, column))
                        .collect(),
                });
            }
            if paging.size.is_some() || paging.skip.is_some() {
                statement.limit = Some(LimitClause {
                    count: paging.size,
                    offset: paging.skip,
                });
            }
        }
        statement
    }

    /// Rows of `table` matching `filter`. Relation filters become EXISTS
    /// subqueries; nothing is joined.
    pub(crate) async fn count(&self, table: &str, filter: Option<&WhereInput>) -> Result<u64> {
        self.table(table)?;
        let mut statement = SelectStatement::from_table(table);
        statement.select.columns.push(SelectColumn::Aggregate {
            function: AggregateFunction::Count,
            alias: Some(COUNT_ALIAS.to_string()),
        });
        if let Some(predicate) =
            WhereCompiler::new(self.registry).compile(table, table, filter, &JoinedTables::new())
        {
            statement.and_where(predicate);
        }

        let rows = self.run(&statement).await?;
        let value = rows
            .first()
            .and_then(|row| row.get(COUNT_ALIAS))
            .cloned()
            .unwrap_or(Value::Integer(0));
        parse_count(&value)
    }
}

/// Keep only real columns of `meta`
fn distinct_columns(meta: &TableMetadata, distinct: Option<&[String]>) -> Vec<String> {
    distinct
        .unwrap_or_default()
        .iter()
        .filter(|column| {
            let known = meta.has_column(column);
            if !known {
                debug!(table = %meta.name, column = %column, "unknown distinct column dropped");
            }
            known
        })
        .cloned()
        .collect()
}

/// Strictly after the cursor row, or strictly before it when paging backwards
fn cursor_predicate(
    meta: &TableMetadata,
    cursor: &relq_core::query::CursorInput,
    backwards: bool,
) -> Option<Expression> {
    let op = if backwards {
        BinaryOperator::Lt
    } else {
        BinaryOperator::Gt
    };
    Expression::conjunction(cursor.iter().filter_map(|(column, value)| {
        if !meta.has_column(column) {
            debug!(table = %meta.name, column = %column, "unknown cursor key dropped");
            return None;
        }
        Some(Expression::binary(
            Expression::column(&meta.name, column),
            op,
            Expression::literal(value.clone()),
        ))
    }))
}

/// Drivers report COUNT(*) as an integer, a float or a numeric string
fn parse_count(value: &Value) -> Result<u64> {
    let parsed = match value {
        Value::Integer(n) => u64::try_from(*n).ok(),
        Value::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::Executor(format!("unexpected count value {}", value)))
}
