/// Field selection resolver
///
/// Resolves `select`/`include`/`omit` trees into the scalar columns to read
/// and the relations to load, recursively.
use super::args::{OmitInput, OrderByInput, RelationArgs, SelectInput, SelectValue, WhereInput};
use super::ast::JoinType;
use crate::schema::{SchemaRegistry, TableMetadata};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Resolved selection for one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedSelection {
    /// Scalar columns, in declaration order
    pub fields: Vec<String>,
    /// Columns removed by `omit`
    pub excluded_fields: BTreeSet<String>,
    pub relations: BTreeMap<String, RelationInclude>,
}

impl ResolvedSelection {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }
}

/// How one relation is loaded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationInclude {
    pub selection: ResolvedSelection,
    pub filter: Option<WhereInput>,
    pub order_by: Option<OrderByInput>,
    pub take: Option<i64>,
    pub skip: Option<usize>,
    pub distinct: Option<Vec<String>>,
    pub join_kind: JoinType,
}

#[derive(Debug)]
pub struct SelectionResolver<'a> {
    registry: &'a SchemaRegistry,
}

impl<'a> SelectionResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    pub fn resolve(
        &self,
        table: &str,
        select: Option<&SelectInput>,
        include: Option<&SelectInput>,
        omit: Option<&OmitInput>,
    ) -> ResolvedSelection {
        let Some(meta) = self.registry.get_table(table) else {
            debug!(table, "selection on unknown table");
            return ResolvedSelection::default();
        };

        let mut chosen = BTreeSet::new();
        let mut relations = BTreeMap::new();

        if let Some(select) = select {
            for (key, value) in select {
                if meta.has_column(key) {
                    if matches!(value, SelectValue::Flag(true)) {
                        chosen.insert(key.as_str());
                    }
                } else {
                    self.add_relation(meta, key, value, &mut relations);
                }
            }
        }

        // Selecting only relations still reads every scalar column
        let mut fields: Vec<String> = meta
            .column_names()
            .filter(|name| chosen.is_empty() || chosen.contains(name))
            .map(str::to_string)
            .collect();

        if let Some(include) = include {
            for (key, value) in include {
                if meta.has_column(key) {
                    debug!(table, key = %key, "include only accepts relations, dropped");
                    continue;
                }
                self.add_relation(meta, key, value, &mut relations);
            }
        }

        let mut excluded_fields = BTreeSet::new();
        if let Some(omit) = omit {
            for (key, _) in omit.iter().filter(|(_, drop)| **drop) {
                if let Some(pos) = fields.iter().position(|f| f == key) {
                    excluded_fields.insert(fields.remove(pos));
                }
            }
        }

        ResolvedSelection {
            fields,
            excluded_fields,
            relations,
        }
    }

    fn add_relation(
        &self,
        meta: &TableMetadata,
        key: &str,
        value: &SelectValue,
        relations: &mut BTreeMap<String, RelationInclude>,
    ) {
        let Some(relation) = meta.relation(key) else {
            debug!(table = %meta.name, key, "unknown selection key dropped");
            return;
        };
        let include = match value {
            SelectValue::Flag(false) => return,
            SelectValue::Flag(true) => RelationInclude {
                selection: self.resolve(&relation.target_table, None, None, None),
                ..Default::default()
            },
            SelectValue::Relation(args) => self.resolve_relation(&relation.target_table, args),
        };
        relations.insert(key.to_string(), include);
    }

    fn resolve_relation(&self, target: &str, args: &RelationArgs) -> RelationInclude {
        RelationInclude {
            selection: self.resolve(
                target,
                args.select.as_ref(),
                args.include.as_ref(),
                args.omit.as_ref(),
            ),
            filter: args.filter.clone(),
            order_by: args.order_by.clone(),
            take: args.take,
            skip: args.skip,
            distinct: args.distinct.clone(),
            join_kind: args.join_kind.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, TableDef};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::from_catalog(&[
            TableDef::new("Class")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("name"))
                .column(ColumnDef::text("room")),
            TableDef::new("ClassSession")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("classId").references("Class", "id"))
                .column(ColumnDef::text("title")),
        ])
    }

    fn input(value: serde_json::Value) -> SelectInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_to_all_columns() {
        let registry = registry();
        let resolved = SelectionResolver::new(&registry).resolve("Class", None, None, None);
        assert_eq!(resolved.fields, vec!["id", "name", "room"]);
        assert!(resolved.relations.is_empty());
    }

    #[test]
    fn test_select_then_omit() {
        let registry = registry();
        let select = input(json!({"id": true, "name": true, "room": true}));
        let omit: OmitInput = serde_json::from_value(json!({"room": true, "id": false})).unwrap();
        let resolved =
            SelectionResolver::new(&registry).resolve("Class", Some(&select), None, Some(&omit));
        assert_eq!(resolved.fields, vec!["id", "name"]);
        assert!(resolved.excluded_fields.contains("room"));
    }

    #[test]
    fn test_select_only_relations_keeps_all_scalars() {
        let registry = registry();
        let select = input(json!({"classSessions": true}));
        let resolved = SelectionResolver::new(&registry).resolve("Class", Some(&select), None, None);
        assert_eq!(resolved.fields.len(), 3);
        let sessions = &resolved.relations["classSessions"];
        assert_eq!(sessions.selection.fields, vec!["id", "classId", "title"]);
        assert_eq!(sessions.join_kind, JoinType::Left);
    }

    #[test]
    fn test_include_composes_with_select() {
        let registry = registry();
        let select = input(json!({"name": true}));
        let include = input(json!({
            "classSessions": {"select": {"title": true}, "take": 2, "joinKind": "inner"},
            "name": true
        }));
        let resolved = SelectionResolver::new(&registry).resolve(
            "Class",
            Some(&select),
            Some(&include),
            None,
        );
        assert_eq!(resolved.fields, vec!["name"]);
        let sessions = &resolved.relations["classSessions"];
        assert_eq!(sessions.selection.fields, vec!["title"]);
        assert_eq!(sessions.take, Some(2));
        assert_eq!(sessions.join_kind, JoinType::Inner);
    }

    #[test]
    fn test_nested_relations_and_unknown_keys() {
        let registry = registry();
        let include = input(json!({
            "classSessions": {"include": {"class": true}},
            "ghost": true
        }));
        let resolved =
            SelectionResolver::new(&registry).resolve("Class", None, Some(&include), None);
        assert_eq!(resolved.relations.len(), 1);
        let nested = &resolved.relations["classSessions"].selection.relations;
        assert!(nested.contains_key("class"));
        assert!(nested["class"].selection.relations.is_empty());
    }

    #[test]
    fn test_false_flags_are_ignored() {
        let registry = registry();
        let select = input(json!({"id": true, "name": false, "classSessions": false}));
        let resolved = SelectionResolver::new(&registry).resolve("Class", Some(&select), None, None);
        assert_eq!(resolved.fields, vec!["id"]);
        assert!(resolved.relations.is_empty());
    }
}
