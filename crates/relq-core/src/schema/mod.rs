/// Schema module
///
/// Table catalog types and the relation-inferring schema registry.
pub mod catalog;
pub mod naming;
pub mod registry;

pub use catalog::{Catalog, ColumnDef, ColumnReference, ColumnType, ForeignKeyDef, TableDef};
pub use registry::{
    RelationDefinition, RelationKind, SchemaRegistry, TableMetadata, ThroughTable,
};
