//! # relq
//!
//! A declarative relational query engine. Data-only descriptors (filter
//! trees, ordering specs, selection trees) compile into SELECT statements
//! over tables whose relations are inferred from foreign keys, and flat
//! result rows come back as nested records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relq::{ColumnDef, FindManyArgs, MemoryExecutor, QueryEngine, SchemaRegistry, TableDef};
//! use std::sync::Arc;
//!
//! # async fn demo() -> relq::Result<()> {
//! // Scan the catalog once at startup
//! let registry = SchemaRegistry::from_catalog(&[
//!     TableDef::new("Class")
//!         .column(ColumnDef::text("id").primary_key())
//!         .column(ColumnDef::text("name")),
//!     TableDef::new("ClassSession")
//!         .column(ColumnDef::text("id").primary_key())
//!         .column(ColumnDef::text("classId").references("Class", "id"))
//!         .column(ColumnDef::text("title")),
//! ]);
//!
//! let engine = QueryEngine::new(Arc::new(registry), MemoryExecutor::new());
//! let classes = engine
//!     .find_many("Class", &FindManyArgs::new().include("classSessions"))
//!     .await?;
//! println!("{} classes", classes.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Relation loading
//!
//! - **join** (default): one statement with an aliased LEFT JOIN per
//!   relation, folded back into nested records by primary key.
//! - **query**: the base statement, then one batched `IN (...)` statement per
//!   relation, stitched onto the owners by key. Many-to-many relations always
//!   load this way.
//!
//! Descriptor keys that name neither a column nor a registered relation are
//! dropped; enable `debug` logging (see [`logging`]) to see them.

use std::sync::Arc;
use tracing::instrument;

pub mod config;
mod execution;
pub mod logging;

pub use config::{EngineConfig, RelationFetchMode, RelationLoadStrategy};
pub use relq_core::query;
pub use relq_core::query::{
    CountArgs, CursorInput, FieldCondition, FilterValue, FindManyArgs, FindUniqueArgs, JoinType,
    MemoryExecutor, NullsOrder, OmitInput, OrderByInput, OrderDirection, PlaceholderStyle,
    QueryMode, RelationArgs, SelectInput, SelectStatement, SelectValue, SqlExecutor, WhereInput,
};
pub use relq_core::{
    Catalog, ColumnDef, ColumnType, Error, ForeignKeyDef, Node, Record, RelationDefinition,
    RelationKind, Result, Row, SchemaRegistry, TableDef, TableMetadata, ThroughTable, Value,
};

use execution::QueryExecution;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Entry point for queries.
///
/// Holds the shared schema registry, the executor statements run on and the
/// engine configuration. Every call builds its own planner state, so one
/// engine serves any number of concurrent calls.
///
/// # Examples
///
/// ```rust,no_run
/// use relq::{Catalog, CountArgs, MemoryExecutor, QueryEngine, WhereInput};
///
/// # async fn demo() -> relq::Result<()> {
/// let catalog = Catalog::from_json_file("./catalog.json")?;
/// let engine = QueryEngine::from_catalog(&catalog, MemoryExecutor::new());
///
/// let active = WhereInput::new().field("status", "active");
/// if engine.exists("Contract", &active).await? {
///     let args = CountArgs { filter: Some(active) };
///     println!("{} active contracts", engine.count("Contract", &args).await?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct QueryEngine<E> {
    registry: Arc<SchemaRegistry>,
    executor: E,
    config: EngineConfig,
}

impl<E: SqlExecutor> QueryEngine<E> {
    /// Engine with the default configuration
    pub fn new(registry: Arc<SchemaRegistry>, executor: E) -> Self {
        Self::with_config(registry, executor, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<SchemaRegistry>, executor: E, config: EngineConfig) -> Self {
        Self {
            registry,
            executor,
            config,
        }
    }

    /// Scan `catalog` into a fresh registry and wrap it
    pub fn from_catalog(catalog: &Catalog, executor: E) -> Self {
        Self::new(
            Arc::new(SchemaRegistry::from_catalog(&catalog.tables)),
            executor,
        )
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn execution(&self) -> QueryExecution<'_, E> {
        QueryExecution::new(&self.registry, &self.executor, &self.config)
    }

    /// Every record of `table` matching `args`, shaped by its selection.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownTable`] when `table` is not registered; executor
    /// failures propagate unchanged and no partial result is returned.
    #[instrument(level = "debug", skip(self, args))]
    pub async fn find_many(&self, table: &str, args: &FindManyArgs) -> Result<Vec<Record>> {
        self.execution().find_many(table, args).await
    }

    /// First record matching `args`; any `take` in `args` is replaced by 1
    pub async fn find_first(&self, table: &str, args: &FindManyArgs) -> Result<Option<Record>> {
        let args = FindManyArgs {
            take: Some(1),
            ..args.clone()
        };
        Ok(self.find_many(table, &args).await?.into_iter().next())
    }

    /// The record identified by `args.filter`, expected to match at most one
    /// row
    pub async fn find_unique(&self, table: &str, args: &FindUniqueArgs) -> Result<Option<Record>> {
        self.find_first(table, &FindManyArgs::from(args.clone()))
            .await
    }

    /// Number of rows matching `args.filter`
    #[instrument(level = "debug", skip(self, args))]
    pub async fn count(&self, table: &str, args: &CountArgs) -> Result<u64> {
        self.execution().count(table, args.filter.as_ref()).await
    }

    /// Whether any row matches `filter`
    pub async fn exists(&self, table: &str, filter: &WhereInput) -> Result<bool> {
        let count = self.execution().count(table, Some(filter)).await?;
        Ok(count > 0)
    }
}
