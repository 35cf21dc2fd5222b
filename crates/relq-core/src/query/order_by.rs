/// OrderBy compiler
///
/// Flattens ordering descriptors into sort keys. Base-table columns sort
/// directly; a joined relation may be ordered by its own columns, one level
/// deep.
use super::args::{OrderByInput, OrderEntry, OrderValue};
use super::ast::{ColumnRef, OrderByColumn};
use super::join_planner::JoinedTables;
use crate::schema::{SchemaRegistry, TableMetadata};
use tracing::debug;

#[derive(Debug)]
pub struct OrderByCompiler<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> OrderByCompiler<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(
        &self,
        table: &str,
        qualifier: &str,
        order_by: Option<&OrderByInput>,
        joined: &JoinedTables,
    ) -> Vec<OrderByColumn> {
        let (Some(order_by), Some(meta)) = (order_by, self.registry.get_table(table)) else {
            return Vec::new();
        };

        let mut keys = Vec::new();
        for entry in order_by.entries() {
            for (key, value) in &entry.0 {
                if meta.has_column(key) {
                    keys.extend(sort_key(qualifier, key, value));
                    continue;
                }

                match (joined.get(key), value) {
                    (Some(join), OrderValue::Nested(nested)) => {
                        match self.registry.get_table(&join.table) {
                            Some(target) => {
                                keys.extend(columns_only(target, &join.alias, nested))
                            }
                            None => debug!(relation = %key, "joined table not registered"),
                        }
                    }
                    (Some(_), _) => {
                        debug!(table, key = %key, "relation ordering needs a nested object, dropped")
                    }
                    (None, _) => debug!(table, key = %key, "unknown or unjoined order key dropped"),
                }
            }
        }
        keys
    }
}

fn sort_key(qualifier: &str, column: &str, value: &OrderValue) -> Option<OrderByColumn> {
    let (direction, nulls) = match value {
        OrderValue::Direction(direction) => (*direction, None),
        OrderValue::Extended(spec) => (spec.sort, spec.nulls),
        OrderValue::Nested(_) => {
            debug!(column, "nested ordering on a scalar column dropped");
            return None;
        }
    };
    Some(OrderByColumn {
        column: ColumnRef::new(qualifier, column),
        direction,
        nulls,
    })
}

/// Keys of a joined relation: its own columns only, no further traversal
fn columns_only(target: &TableMetadata, alias: &str, entry: &OrderEntry) -> Vec<OrderByColumn> {
    entry
        .0
        .iter()
        .filter_map(|(key, value)| {
            if target.has_column(key) {
                sort_key(alias, key, value)
            } else {
                debug!(table = %target.name, key = %key, "order key on joined table dropped");
                None
            }
        })
        .collect()
}
