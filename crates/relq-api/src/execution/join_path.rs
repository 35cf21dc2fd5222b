//! Join layout and denormalization.
//!
//! A [`Level`] mirrors one table of the relation tree inside a single joined
//! statement: the columns it projects, the prefix those columns carry in
//! result rows and the relations joined beneath it. Assembly walks the same
//! tree to fold flat rows back into nested records.

use super::records::{page_relation, relation_node, strip_hidden, with_hidden};
use relq_core::query::{
    ColumnRef, Expression, JoinPlanner, JoinedTable, JoinedTables, OrderByColumn,
    OrderByCompiler, RelationInclude, ResolvedSelection, SelectStatement, WhereCompiler,
};
use relq_core::value::{composite_key, Node, Record, Row, Value};
use relq_core::SchemaRegistry;
use std::collections::{BTreeMap, HashMap, HashSet};

static NULL: Value = Value::Null;

/// One table of a joined statement
#[derive(Debug, Clone)]
pub(crate) struct Level {
    pub(crate) table: String,
    /// Table name at the root, join alias below it
    pub(crate) qualifier: String,
    /// Prepended to every projected column of this level
    pub(crate) prefix: String,
    /// Caller-visible scalar fields
    pub(crate) fields: Vec<String>,
    /// Projected columns: `fields` plus hidden key columns
    columns: Vec<String>,
    /// Row keys of `columns`, unique across the whole statement
    outputs: Vec<String>,
    /// Primary key columns, empty when the table has none usable
    key: Vec<String>,
    /// Row keys identifying one record; every output when the table has no
    /// usable primary key
    identity: Vec<String>,
    pub(crate) relations: Vec<JoinedRelation>,
    /// Relations that could not be joined and load with follow-up queries
    pub(crate) deferred: BTreeMap<String, RelationInclude>,
}

#[derive(Debug, Clone)]
pub(crate) struct JoinedRelation {
    pub(crate) name: String,
    pub(crate) to_many: bool,
    pub(crate) include: RelationInclude,
    pub(crate) level: Level,
}

impl Level {
    /// Plan joins for every relation of `selection`, depth first, then name
    /// every projected column so no two outputs share a row key
    pub(crate) fn plan(
        registry: &SchemaRegistry,
        planner: &mut JoinPlanner<'_>,
        table: &str,
        selection: &ResolvedSelection,
        extra: &[String],
    ) -> Level {
        let mut level = Level::build(
            registry,
            planner,
            table,
            table,
            String::new(),
            selection,
            extra,
        );
        level.name_outputs(&mut HashSet::new());
        level
    }

    fn build(
        registry: &SchemaRegistry,
        planner: &mut JoinPlanner<'_>,
        table: &str,
        qualifier: &str,
        prefix: String,
        selection: &ResolvedSelection,
        extra: &[String],
    ) -> Level {
        let meta = registry.get_table(table);
        let key: Vec<String> = meta
            .filter(|m| m.has_usable_primary_key())
            .map(|m| m.primary_key.clone())
            .unwrap_or_default();

        let mut hidden: Vec<String> = key.clone();
        hidden.extend(
            extra
                .iter()
                .filter(|c| meta.is_some_and(|m| m.has_column(c)))
                .cloned(),
        );

        let mut relations = Vec::new();
        let mut deferred = BTreeMap::new();
        for (name, include) in &selection.relations {
            match planner
                .add_join(table, qualifier, name, include.join_kind)
                .cloned()
            {
                Some(plan) => {
                    let level = Level::build(
                        registry,
                        planner,
                        &plan.target_table,
                        &plan.alias,
                        format!("{}{}_", prefix, name),
                        &include.selection,
                        include.distinct.as_deref().unwrap_or_default(),
                    );
                    relations.push(JoinedRelation {
                        name: name.clone(),
                        to_many: plan.definition.kind.is_to_many(),
                        include: include.clone(),
                        level,
                    });
                }
                None => {
                    if let Some(definition) = registry.get_relation(table, name) {
                        hidden.push(definition.from_field.clone());
                        deferred.insert(name.clone(), include.clone());
                    }
                }
            }
        }

        let columns = with_hidden(&selection.fields, hidden.iter().map(String::as_str));
        Level {
            table: table.to_string(),
            qualifier: qualifier.to_string(),
            prefix,
            fields: selection.fields.clone(),
            columns,
            outputs: Vec::new(),
            key,
            identity: Vec::new(),
            relations,
            deferred,
        }
    }

    /// Root columns keep their names; joined columns take `prefix + column`,
    /// suffixed with a counter when that name is already taken
    fn name_outputs(&mut self, taken: &mut HashSet<String>) {
        self.outputs = self
            .columns
            .iter()
            .map(|column| {
                let wanted = format!("{}{}", self.prefix, column);
                let mut output = wanted.clone();
                let mut n = 0;
                while !taken.insert(output.clone()) {
                    n += 1;
                    output = format!("{}_{}", wanted, n);
                }
                output
            })
            .collect();

        self.identity = if self.key.is_empty() {
            self.outputs.clone()
        } else {
            self.key
                .iter()
                .filter_map(|k| {
                    let at = self.columns.iter().position(|c| c == k)?;
                    self.outputs.get(at).cloned()
                })
                .collect()
        };

        for rel in &mut self.relations {
            rel.level.name_outputs(taken);
        }
    }

    fn is_root(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Joined relations beneath this level, as the descriptor compilers see them
    pub(crate) fn joined_tables(&self) -> JoinedTables {
        self.relations
            .iter()
            .map(|rel| {
                (
                    rel.name.clone(),
                    JoinedTable {
                        table: rel.level.table.clone(),
                        alias: rel.level.qualifier.clone(),
                        nested: rel.level.joined_tables(),
                    },
                )
            })
            .collect()
    }

    /// True when some joined relation, at any depth, may repeat base rows
    pub(crate) fn fans_out(&self) -> bool {
        self.relations
            .iter()
            .any(|rel| rel.to_many || rel.level.fans_out())
    }

    /// Push the projection of this level and every joined level
    pub(crate) fn project(&self, statement: &mut SelectStatement) {
        for (column, output) in self.columns.iter().zip(&self.outputs) {
            let alias = (output != column).then(|| output.clone());
            statement.push_column(ColumnRef::new(&self.qualifier, column), alias);
        }
        for rel in &self.relations {
            rel.level.project(statement);
        }
    }

    /// Relation-scoped predicates and sort keys of every joined level
    pub(crate) fn relation_clauses(
        &self,
        filters: &WhereCompiler<'_>,
        orders: &OrderByCompiler<'_>,
        predicates: &mut Vec<Expression>,
        order: &mut Vec<OrderByColumn>,
    ) {
        for rel in &self.relations {
            let level = &rel.level;
            let nested = level.joined_tables();
            predicates.extend(filters.compile(
                &level.table,
                &level.qualifier,
                rel.include.filter.as_ref(),
                &nested,
            ));
            order.extend(orders.compile(
                &level.table,
                &level.qualifier,
                rel.include.order_by.as_ref(),
                &nested,
            ));
            level.relation_clauses(filters, orders, predicates, order);
        }
    }

    /// Fold joined rows into records of this level, in first-appearance order
    pub(crate) fn assemble(&self, rows: &[&Row]) -> Vec<Record> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut groups: Vec<Vec<&Row>> = Vec::new();

        for &row in rows {
            let identity: Vec<&Value> = self
                .identity
                .iter()
                .map(|key| row.get(key).unwrap_or(&NULL))
                .collect();
            // An unmatched outer join leaves every column of the level NULL
            if !self.is_root() && identity.iter().all(|v| v.is_null()) {
                continue;
            }
            let key = composite_key(identity);
            match index.get(&key) {
                Some(&at) => groups[at].push(row),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![row]);
                }
            }
        }

        groups
            .into_iter()
            .map(|group| {
                let first = group[0];
                let mut record: Record = self
                    .columns
                    .iter()
                    .zip(&self.outputs)
                    .map(|(column, output)| {
                        let value = first.get(output).cloned().unwrap_or(Value::Null);
                        (column.clone(), Node::Value(value))
                    })
                    .collect();
                for rel in &self.relations {
                    let children = page_relation(rel.level.assemble(&group), &rel.include);
                    record.insert(rel.name.clone(), relation_node(children, rel.to_many));
                }
                record
            })
            .collect()
    }

    /// Remove hidden columns from `record` and its joined children
    pub(crate) fn strip(&self, record: &mut Record) {
        let names = self
            .relations
            .iter()
            .map(|rel| rel.name.as_str())
            .chain(self.deferred.keys().map(String::as_str));
        strip_hidden(record, &self.fields, names);

        for rel in &self.relations {
            match record.get_mut(&rel.name) {
                Some(Node::List(items)) => items.iter_mut().for_each(|item| rel.level.strip(item)),
                Some(Node::Object(item)) => rel.level.strip(item),
                _ => {}
            }
        }
    }
}
