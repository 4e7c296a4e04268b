// ============================================================================
// In-memory engine
// ============================================================================
//
// A self-contained Engine/Session pair for tests, demos and local runs.
// Engines count every call they receive and can be told to fail the next
// call of a given kind, which is how router behavior is observed without a
// real database.

mod engine;
mod eval;
mod session;

pub use engine::{EngineStats, MemoryEngine, MemoryEngineFactory, MemoryOp};
pub use eval::row_order;
pub use session::MemorySession;

use crate::core::Value;
use std::collections::BTreeMap;

/// Column name to value.
pub type MemoryRow = BTreeMap<String, Value>;
