// ============================================================================
// ShardWizard Library
// ============================================================================
//
// Routes data access across identifier groups of master shards and read
// replicas:
//
// - routing: engine registry and shard resolution
// - transaction: scoped transaction affinity and auto-transactions
// - parallel: per-shard fan-out with merge
// - facade: the Router that ties them together
//
// ============================================================================

pub mod core;
pub mod interface;
pub mod query;
pub mod routing;
pub mod transaction;
pub mod parallel;
pub mod connection;
pub mod memory;
pub mod facade;
pub mod prelude;

// Re-export main types for convenience
pub use core::{Identified, Identifier, Result, Role, RouterError, ShardKey, Value};
pub use facade::Router;
pub use interface::{Engine, EngineFactory, QuerySession, Session};
pub use transaction::{SessionHandle, TxScope};

// Re-export configuration API
pub use connection::config::{GroupConfig, RouterConfig};
pub use routing::{EngineGroup, EngineRegistry, SlaveBalance};
