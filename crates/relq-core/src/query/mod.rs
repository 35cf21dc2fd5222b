/// Query module
///
/// Descriptor types, the descriptor compilers, join planning, the compiled
/// statement AST and statement execution.
/// Query descriptors
#[allow(missing_docs)]
pub mod args;
/// Compiled statement AST
#[allow(missing_docs)]
pub mod ast;
/// SQL executor contract and in-memory executor
#[allow(missing_docs)]
pub mod executor;
/// Join planner
#[allow(missing_docs)]
pub mod join_planner;
/// OrderBy compiler
#[allow(missing_docs)]
pub mod order_by;
/// Field selection resolver
#[allow(missing_docs)]
pub mod selection;
/// Where compiler
#[allow(missing_docs)]
pub mod where_compiler;

// Re-export main types
pub use args::*;
pub use ast::*;
pub use executor::{MemoryExecutor, SqlExecutor};
pub use join_planner::{JoinPlan, JoinPlanner, JoinedTable, JoinedTables};
pub use order_by::OrderByCompiler;
pub use selection::{RelationInclude, ResolvedSelection, SelectionResolver};
pub use where_compiler::WhereCompiler;
