// ============================================================================
// Query value objects
// ============================================================================
//
// Engine-agnostic descriptions of reads and writes. The router never renders
// SQL itself; sessions receive these values and execute them however their
// backend requires.
//
// ============================================================================

pub mod condition;
pub mod find;
pub mod update;

pub use condition::{FindCondition, ReadPolicy, ShardCondition, UpdateCondition};
pub use find::{Direction, Filter, FindQuery, OrderBy};
pub use update::UpdateQuery;
