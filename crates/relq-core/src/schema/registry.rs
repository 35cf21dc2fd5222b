/// Schema registry
///
/// Scans a table catalog once, records columns and primary keys, and infers
/// bidirectional relations from foreign keys. After initialization the
/// registry is read-only and is shared by reference (usually behind an `Arc`)
/// with every query execution.
use super::catalog::{ColumnDef, ForeignKeyDef, TableDef};
use super::naming::{forward_relation_name, pluralize, to_lower_camel};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// Relation cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl RelationKind {
    /// One-to-many and many-to-many relations load as arrays
    pub fn is_to_many(self) -> bool {
        matches!(self, RelationKind::OneToMany | RelationKind::ManyToMany)
    }
}

/// Junction table of a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughTable {
    pub table: String,
    /// Junction column referencing the owning table's `from_field`
    pub from_column: String,
    /// Junction column referencing the target table's `to_field`
    pub to_column: String,
}

/// A named association from one table to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationDefinition {
    pub name: String,
    pub kind: RelationKind,
    pub target_table: String,
    /// Column on the owning table
    pub from_field: String,
    /// Column on the target table
    pub to_field: String,
    #[serde(default)]
    pub through: Option<ThroughTable>,
    #[serde(default)]
    pub optional: bool,
}

impl RelationDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        target_table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            target_table: target_table.into(),
            from_field: from_field.into(),
            to_field: to_field.into(),
            through: None,
            optional: false,
        }
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target_table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::OneToMany, target_table, from_field, to_field).optional(true)
    }

    pub fn many_to_one(
        name: impl Into<String>,
        target_table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::ManyToOne, target_table, from_field, to_field)
    }

    pub fn one_to_one(
        name: impl Into<String>,
        target_table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::OneToOne, target_table, from_field, to_field)
    }

    /// Many-to-many through a junction table. `from_field`/`to_field` are the
    /// keys on the owning and target tables that the junction references.
    pub fn many_to_many(
        name: impl Into<String>,
        target_table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
        through: ThroughTable,
    ) -> Self {
        let mut relation = Self::new(
            name,
            RelationKind::ManyToMany,
            target_table,
            from_field,
            to_field,
        )
        .optional(true);
        relation.through = Some(through);
        relation
    }

    pub fn optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }
}

/// Registered table
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub name: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnDef>,
    pub relations: BTreeMap<String, RelationDefinition>,
}

impl TableMetadata {
    fn from_def(def: &TableDef) -> Self {
        let primary_key = if !def.primary_key.is_empty() {
            def.primary_key.clone()
        } else if let Some(col) = def.columns.iter().find(|c| c.primary) {
            vec![col.name.clone()]
        } else {
            vec!["id".to_string()]
        };

        Self {
            name: def.name.clone(),
            primary_key,
            columns: def.columns.clone(),
            relations: BTreeMap::new(),
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.get(name)
    }

    /// True when every primary-key column is a declared column
    pub fn has_usable_primary_key(&self) -> bool {
        self.primary_key.iter().all(|pk| self.has_column(pk))
    }
}

/// Registry of tables and their relations
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableMetadata>,
    initialized: bool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize a registry in one step
    pub fn from_catalog(tables: &[TableDef]) -> Self {
        let mut registry = Self::new();
        registry.initialize_from_catalog(tables);
        registry
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Scan the catalog: first pass registers tables, second pass infers
    /// relations from foreign keys. Calling it again is a no-op.
    #[instrument(skip_all, fields(tables = tables.len()))]
    pub fn initialize_from_catalog(&mut self, tables: &[TableDef]) {
        if self.initialized {
            debug!("schema registry already initialized");
            return;
        }

        for def in tables {
            if !def.is_table() {
                debug!(name = %def.name, "skipping catalog entry that is not a table");
                continue;
            }
            if self.tables.contains_key(&def.name) {
                debug!(name = %def.name, "skipping duplicate table definition");
                continue;
            }
            self.tables
                .insert(def.name.clone(), TableMetadata::from_def(def));
        }

        for def in tables {
            if !def.is_table() {
                continue;
            }
            for fk in collect_foreign_keys(def) {
                self.infer_relation(&def.name, &fk);
            }
        }

        self.initialized = true;
        debug!(registered = self.tables.len(), "schema registry initialized");
    }

    fn infer_relation(&mut self, owner: &str, fk: &ForeignKeyDef) {
        if fk.columns.len() != 1 || fk.foreign_columns.len() != 1 {
            debug!(table = owner, columns = ?fk.columns, "skipping composite foreign key");
            return;
        }
        let column = &fk.columns[0];
        let foreign_column = &fk.foreign_columns[0];

        let Some(owner_meta) = self.tables.get(owner) else {
            return;
        };
        let Some(column_def) = owner_meta.column(column) else {
            debug!(table = owner, column = %column, "foreign key column not declared, skipped");
            return;
        };
        let Some(target_meta) = self.tables.get(&fk.foreign_table) else {
            debug!(table = owner, target = %fk.foreign_table, "foreign key target not registered, skipped");
            return;
        };
        if !target_meta.has_column(foreign_column) {
            debug!(
                table = owner,
                target = %fk.foreign_table,
                column = %foreign_column,
                "foreign key target column not declared, skipped"
            );
            return;
        }

        let one_to_one = column_def.unique || owner_meta.primary_key == [column.clone()];
        let optional = column_def.nullable;
        let target = fk.foreign_table.clone();

        let forward_name = forward_relation_name(column, owner, &target);
        let forward = RelationDefinition::new(
            forward_name,
            if one_to_one {
                RelationKind::OneToOne
            } else {
                RelationKind::ManyToOne
            },
            target.clone(),
            column.clone(),
            foreign_column.clone(),
        )
        .optional(optional);

        let reverse = if one_to_one {
            RelationDefinition::new(
                to_lower_camel(owner),
                RelationKind::OneToOne,
                owner,
                foreign_column.clone(),
                column.clone(),
            )
            .optional(true)
        } else {
            RelationDefinition::one_to_many(
                pluralize(&to_lower_camel(owner)),
                owner,
                foreign_column.clone(),
                column.clone(),
            )
        };

        self.register_if_absent(owner, forward);
        self.register_if_absent(&target, reverse);
    }

    fn register_if_absent(&mut self, table: &str, relation: RelationDefinition) {
        if let Some(meta) = self.tables.get_mut(table) {
            if meta.relations.contains_key(&relation.name) {
                debug!(table, relation = %relation.name, "relation name taken, keeping existing");
                return;
            }
            meta.relations.insert(relation.name.clone(), relation);
        }
    }

    /// Register a relation by hand. Fails fast when the owning or target table
    /// is unknown or the key columns do not exist. Replaces any relation of the
    /// same name.
    pub fn define_relation(&mut self, table: &str, relation: RelationDefinition) -> Result<()> {
        let owner = self
            .tables
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        let target = self
            .tables
            .get(&relation.target_table)
            .ok_or_else(|| Error::UnknownTable(relation.target_table.clone()))?;

        let invalid = |reason: String| Error::InvalidRelation {
            table: table.to_string(),
            relation: relation.name.clone(),
            reason,
        };

        if !owner.has_column(&relation.from_field) {
            return Err(invalid(format!(
                "column {} does not exist on {}",
                relation.from_field, table
            )));
        }
        if !target.has_column(&relation.to_field) {
            return Err(invalid(format!(
                "column {} does not exist on {}",
                relation.to_field, relation.target_table
            )));
        }
        match (&relation.through, relation.kind) {
            (None, RelationKind::ManyToMany) => {
                return Err(invalid("many-to-many relation needs a through table".to_string()));
            }
            (Some(through), _) => {
                if let Some(junction) = self.tables.get(&through.table) {
                    for col in [&through.from_column, &through.to_column] {
                        if !junction.has_column(col) {
                            return Err(invalid(format!(
                                "column {} does not exist on {}",
                                col, through.table
                            )));
                        }
                    }
                }
            }
            _ => {}
        }

        if let Some(meta) = self.tables.get_mut(table) {
            meta.relations.insert(relation.name.clone(), relation);
        }
        Ok(())
    }

    pub fn define_relations<I>(&mut self, table: &str, relations: I) -> Result<()>
    where
        I: IntoIterator<Item = RelationDefinition>,
    {
        for relation in relations {
            self.define_relation(table, relation)?;
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<&TableMetadata> {
        self.tables.get(name)
    }

    pub fn get_relation(&self, table: &str, name: &str) -> Option<&RelationDefinition> {
        self.tables.get(table).and_then(|t| t.relations.get(name))
    }

    /// All relations of a table, ordered by name; empty for unknown tables
    pub fn get_relations(&self, table: &str) -> Vec<&RelationDefinition> {
        self.tables
            .get(table)
            .map(|t| t.relations.values().collect())
            .unwrap_or_default()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .is_some_and(|t| t.has_column(column))
    }

    pub fn has_relation(&self, table: &str, relation: &str) -> bool {
        self.get_relation(table, relation).is_some()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

/// Inline column references (in column order) followed by table-level
/// foreign keys
fn collect_foreign_keys(def: &TableDef) -> Vec<ForeignKeyDef> {
    let mut fks: Vec<ForeignKeyDef> = def
        .columns
        .iter()
        .filter_map(|col| {
            col.references
                .as_ref()
                .map(|r| ForeignKeyDef::new(&col.name, &r.table, &r.column))
        })
        .collect();
    for fk in &def.foreign_keys {
        if !fks.contains(fk) {
            fks.push(fk.clone());
        }
    }
    fks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::catalog::ColumnDef;

    fn catalog() -> Vec<TableDef> {
        vec![
            TableDef::new("Mentor")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("name")),
            TableDef::new("Contract")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("mentorId").references("Mentor", "id"))
                .column(ColumnDef::text("reviewer_id").nullable())
                .foreign_key(ForeignKeyDef::new("reviewer_id", "Mentor", "id")),
            TableDef::new("MentorProfile")
                .column(ColumnDef::text("id").primary_key())
                .column(ColumnDef::text("mentorId").unique().references("Mentor", "id")),
        ]
    }

    #[test]
    fn test_primary_key_detection() {
        let registry = SchemaRegistry::from_catalog(&[
            TableDef::new("Composite")
                .column(ColumnDef::text("a"))
                .column(ColumnDef::text("b"))
                .primary_key(["a", "b"]),
            TableDef::new("Flagged")
                .column(ColumnDef::text("code").primary_key()),
            TableDef::new("Plain").column(ColumnDef::text("x")),
        ]);
        assert_eq!(registry.get_table("Composite").unwrap().primary_key, vec!["a", "b"]);
        assert_eq!(registry.get_table("Flagged").unwrap().primary_key, vec!["code"]);
        assert_eq!(registry.get_table("Plain").unwrap().primary_key, vec!["id"]);
    }

    #[test]
    fn test_infers_forward_and_reverse() {
        let registry = SchemaRegistry::from_catalog(&catalog());

        let mentor = registry.get_relation("Contract", "mentor").unwrap();
        assert_eq!(mentor.kind, RelationKind::ManyToOne);
        assert_eq!(mentor.from_field, "mentorId");
        assert_eq!(mentor.to_field, "id");
        assert!(!mentor.optional);

        let reviewer = registry.get_relation("Contract", "reviewer").unwrap();
        assert!(reviewer.optional);

        let contracts = registry.get_relation("Mentor", "contracts").unwrap();
        assert_eq!(contracts.kind, RelationKind::OneToMany);
        assert_eq!(contracts.from_field, "id");
        assert_eq!(contracts.to_field, "mentorId");
    }

    #[test]
    fn test_unique_foreign_key_is_one_to_one() {
        let registry = SchemaRegistry::from_catalog(&catalog());
        let forward = registry.get_relation("MentorProfile", "mentor").unwrap();
        assert_eq!(forward.kind, RelationKind::OneToOne);
        let reverse = registry.get_relation("Mentor", "mentorProfile").unwrap();
        assert_eq!(reverse.kind, RelationKind::OneToOne);
        assert_eq!(reverse.to_field, "mentorId");
    }

    #[test]
    fn test_reverse_name_collision_keeps_first() {
        // Both Contract foreign keys point at Mentor; only one `contracts`
        // reverse relation can exist.
        let registry = SchemaRegistry::from_catalog(&catalog());
        let contracts = registry.get_relation("Mentor", "contracts").unwrap();
        assert_eq!(contracts.to_field, "mentorId");
    }

    #[test]
    fn test_unresolvable_foreign_keys_are_skipped() {
        let registry = SchemaRegistry::from_catalog(&[
            TableDef::new("A").column(ColumnDef::text("id").primary_key()),
            TableDef::new("B")
                .column(ColumnDef::text("id").primary_key())
                .foreign_key(ForeignKeyDef::new("ghostId", "A", "id"))
                .foreign_key(ForeignKeyDef::new("id", "Missing", "id")),
            TableDef::new(""),
        ]);
        assert!(registry.get_relations("B").is_empty());
        assert!(registry.get_relations("A").is_empty());
        assert!(registry.get_table("").is_none());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut registry = SchemaRegistry::from_catalog(&catalog());
        let before = registry.get_table("Mentor").cloned();
        registry.initialize_from_catalog(&[TableDef::new("Other").column(ColumnDef::text("id"))]);
        assert!(registry.get_table("Other").is_none());
        assert_eq!(registry.get_table("Mentor").cloned(), before);
    }

    #[test]
    fn test_define_relation_unknown_table_fails() {
        let mut registry = SchemaRegistry::from_catalog(&catalog());
        let err = registry
            .define_relation(
                "Nope",
                RelationDefinition::one_to_many("things", "Mentor", "id", "id"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable(t) if t == "Nope"));
    }

    #[test]
    fn test_define_relation_validates_columns() {
        let mut registry = SchemaRegistry::from_catalog(&catalog());
        let err = registry
            .define_relation(
                "Mentor",
                RelationDefinition::one_to_many("things", "Contract", "id", "missing"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRelation { .. }));

        registry
            .define_relation(
                "Mentor",
                RelationDefinition::one_to_many("reviews", "Contract", "id", "reviewer_id"),
            )
            .unwrap();
        assert!(registry.has_relation("Mentor", "reviews"));
    }
}
