//! # relq core
//!
//! Schema registry, query descriptors, descriptor compilers, join planning and
//! the statement AST shared by the relq query engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
/// Table catalog and schema registry
#[allow(missing_docs)]
pub mod schema;
pub mod query;
/// Values, rows and nested records
#[allow(missing_docs)]
pub mod value;

pub use error::{Error, Result};
pub use schema::{
    Catalog, ColumnDef, ColumnType, ForeignKeyDef, RelationDefinition, RelationKind,
    SchemaRegistry, TableDef, TableMetadata, ThroughTable,
};
pub use value::{Node, Record, Row, Value};
