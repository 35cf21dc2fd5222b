//! Follow-up query loading.
//!
//! Relations are fetched with one batched statement per relation and level,
//! keyed by the owner-side values collected from the records already loaded,
//! then stitched back onto their owners.

use super::join_path::Level;
use super::records::{page_relation, relation_node, scalar, strip_hidden, with_hidden};
use super::QueryExecution;
use crate::config::RelationFetchMode;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use relq_core::query::{
    ColumnRef, Expression, JoinedTables, OrderByClause, OrderByCompiler, RelationInclude,
    ResolvedSelection, SelectStatement, SqlExecutor, WhereCompiler,
};
use relq_core::value::{row_to_record, Node, Record, Value};
use relq_core::{RelationDefinition, Result, TableMetadata};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Related records tagged with the key of the owner they belong to
type Stitched = Vec<(String, Record)>;

impl<'a, E: SqlExecutor> QueryExecution<'a, E> {
    /// Run the base statement, then load every relation with follow-ups
    pub(super) async fn separate_path(
        &self,
        meta: &TableMetadata,
        statement: &mut SelectStatement,
        selection: &ResolvedSelection,
    ) -> Result<Vec<Record>> {
        let links: Vec<&str> = selection
            .relations
            .keys()
            .filter_map(|name| meta.relation(name))
            .map(|definition| definition.from_field.as_str())
            .collect();
        for column in with_hidden(&selection.fields, links) {
            statement.push_column(ColumnRef::new(&meta.name, column), None);
        }

        let rows = self.run(statement).await?;
        let mut records: Vec<Record> = rows.into_iter().map(row_to_record).collect();
        self.load_relations(&meta.name, records.iter_mut().collect(), &selection.relations)
            .await?;
        for record in records.iter_mut() {
            strip_hidden(
                record,
                &selection.fields,
                selection.relations.keys().map(String::as_str),
            );
        }
        Ok(records)
    }

    /// Load relations the join layout deferred, at whatever depth they sit
    pub(super) fn load_deferred<'f>(
        &'f self,
        level: &'f Level,
        mut records: Vec<&'f mut Record>,
    ) -> BoxFuture<'f, Result<()>> {
        async move {
            if records.is_empty() {
                return Ok(());
            }
            if !level.deferred.is_empty() {
                let owners: Vec<&mut Record> = records.iter_mut().map(|r| &mut **r).collect();
                self.load_relations(&level.table, owners, &level.deferred)
                    .await?;
            }
            for rel in &level.relations {
                let mut children: Vec<&mut Record> = Vec::new();
                for record in records.iter_mut() {
                    match record.get_mut(&rel.name) {
                        Some(Node::List(items)) => children.extend(items.iter_mut()),
                        Some(Node::Object(item)) => children.push(item),
                        _ => {}
                    }
                }
                self.load_deferred(&rel.level, children).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Attach `relations` of `table` to `records`
    pub(super) fn load_relations<'f>(
        &'f self,
        table: &'f str,
        mut records: Vec<&'f mut Record>,
        relations: &'f BTreeMap<String, RelationInclude>,
    ) -> BoxFuture<'f, Result<()>> {
        async move {
            if records.is_empty() || relations.is_empty() {
                return Ok(());
            }

            let mut wanted = Vec::new();
            for (name, include) in relations {
                let Some(definition) = self.registry.get_relation(table, name) else {
                    debug!(table, relation = %name, "unknown relation skipped");
                    continue;
                };
                let keys = owner_keys(&records, &definition.from_field);
                wanted.push((name, include, definition, keys));
            }

            let fetches: Vec<_> = wanted
                .iter()
                .map(|(_, include, definition, keys)| self.fetch(definition, include, keys))
                .collect();
            let fetched: Vec<Stitched> = match self.config.relation_fetch {
                RelationFetchMode::Concurrent(limit) => {
                    stream::iter(fetches)
                        .buffered(limit.max(1))
                        .try_collect()
                        .await?
                }
                RelationFetchMode::Sequential => {
                    let mut fetched = Vec::with_capacity(fetches.len());
                    for fetch in fetches {
                        fetched.push(fetch.await?);
                    }
                    fetched
                }
            };

            for ((name, include, definition, _), mut related) in wanted.iter().zip(fetched) {
                let nested = &include.selection.relations;
                self.load_relations(
                    &definition.target_table,
                    related.iter_mut().map(|(_, record)| record).collect(),
                    nested,
                )
                .await?;
                for (_, record) in related.iter_mut() {
                    strip_hidden(
                        record,
                        &include.selection.fields,
                        nested.keys().map(String::as_str),
                    );
                }

                let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
                for (owner, record) in related {
                    groups.entry(owner).or_default().push(record);
                }
                for record in records.iter_mut() {
                    let owner = scalar(record, &definition.from_field);
                    let matched = if owner.is_null() {
                        Vec::new()
                    } else {
                        groups
                            .get(&owner.key_fragment())
                            .cloned()
                            .unwrap_or_default()
                    };
                    let node = relation_node(
                        page_relation(matched, include),
                        definition.kind.is_to_many(),
                    );
                    record.insert(name.to_string(), node);
                }
            }
            Ok(())
        }
        .boxed()
    }

    /// One relation's related rows, tagged with their owner keys
    async fn fetch(
        &self,
        definition: &RelationDefinition,
        include: &RelationInclude,
        keys: &[Value],
    ) -> Result<Stitched> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if definition.through.is_some() {
            return self.fetch_through(definition, include, keys).await;
        }

        let Some(statement) =
            self.related_statement(&definition.target_table, include, &definition.to_field, keys)
        else {
            return Ok(Vec::new());
        };
        let rows = self.run(&statement).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let owner = row
                    .get(&definition.to_field)
                    .map(Value::key_fragment)
                    .unwrap_or_default();
                (owner, row_to_record(row))
            })
            .collect())
    }

    /// Many-to-many: owner keys to target keys through the junction table,
    /// then the targets themselves
    async fn fetch_through(
        &self,
        definition: &RelationDefinition,
        include: &RelationInclude,
        keys: &[Value],
    ) -> Result<Stitched> {
        let Some(through) = &definition.through else {
            return Ok(Vec::new());
        };

        let mut junction = SelectStatement::from_table(&through.table);
        junction.push_column(ColumnRef::new(&through.table, &through.from_column), None);
        junction.push_column(ColumnRef::new(&through.table, &through.to_column), None);
        junction.and_where(Expression::In {
            expr: Box::new(Expression::column(&through.table, &through.from_column)),
            values: keys.to_vec(),
            negated: false,
        });
        let links = self.run(&junction).await?;

        let mut owners_by_target: HashMap<String, Vec<String>> = HashMap::new();
        let mut target_keys = Vec::new();
        let mut seen = HashSet::new();
        for link in &links {
            let (Some(owner), Some(target)) =
                (link.get(&through.from_column), link.get(&through.to_column))
            else {
                continue;
            };
            if owner.is_null() || target.is_null() {
                continue;
            }
            let target_key = target.key_fragment();
            owners_by_target
                .entry(target_key.clone())
                .or_default()
                .push(owner.key_fragment());
            if seen.insert(target_key) {
                target_keys.push(target.clone());
            }
        }
        if target_keys.is_empty() {
            return Ok(Vec::new());
        }

        let Some(statement) = self.related_statement(
            &definition.target_table,
            include,
            &definition.to_field,
            &target_keys,
        ) else {
            return Ok(Vec::new());
        };
        let rows = self.run(&statement).await?;
        let mut stitched = Vec::new();
        for row in rows {
            let target_key = row
                .get(&definition.to_field)
                .map(Value::key_fragment)
                .unwrap_or_default();
            let Some(owners) = owners_by_target.get(&target_key) else {
                continue;
            };
            let record = row_to_record(row);
            for owner in owners {
                stitched.push((owner.clone(), record.clone()));
            }
        }
        Ok(stitched)
    }

    /// `SELECT .. FROM target WHERE link IN (keys)` with the relation's own
    /// filter and ordering
    fn related_statement(
        &self,
        target: &str,
        include: &RelationInclude,
        link: &str,
        keys: &[Value],
    ) -> Option<SelectStatement> {
        let Some(meta) = self.registry.get_table(target) else {
            debug!(table = target, "relation target not registered");
            return None;
        };

        let mut hidden = vec![link];
        hidden.extend(
            include
                .selection
                .relations
                .keys()
                .filter_map(|name| meta.relation(name))
                .map(|definition| definition.from_field.as_str()),
        );
        hidden.extend(
            include
                .distinct
                .iter()
                .flatten()
                .map(String::as_str)
                .filter(|column| meta.has_column(column)),
        );

        let mut statement = SelectStatement::from_table(target);
        for column in with_hidden(&include.selection.fields, hidden) {
            statement.push_column(ColumnRef::new(target, column), None);
        }
        statement.and_where(Expression::In {
            expr: Box::new(Expression::column(target, link)),
            values: keys.to_vec(),
            negated: false,
        });

        let none = JoinedTables::new();
        if let Some(predicate) =
            WhereCompiler::new(self.registry).compile(target, target, include.filter.as_ref(), &none)
        {
            statement.and_where(predicate);
        }
        let order =
            OrderByCompiler::new(self.registry).compile(target, target, include.order_by.as_ref(), &none);
        if !order.is_empty() {
            statement.order_by = Some(OrderByClause { columns: order });
        }
        Some(statement)
    }
}

/// Distinct non-null values of `column` across `records`, in first-seen order
fn owner_keys(records: &[&mut Record], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    records
        .iter()
        .map(|record| scalar(record, column))
        .filter(|value| !value.is_null() && seen.insert(value.key_fragment()))
        .cloned()
        .collect()
}
