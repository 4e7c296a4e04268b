//! Types most callers need, in one import.
//!
//! `use shardwizard::prelude::*;` brings in the router, the scope, the query
//! builders and the collaborator traits. The bundled in-memory engine lives
//! under `prelude::memory` so that it does not clash with real backends.

pub use crate::core::{Identified, Identifier, Result, Role, RouterError, ShardKey, Value};
pub use crate::facade::Router;
pub use crate::interface::{Engine, EngineFactory, QuerySession, Session};
pub use crate::query::{
    Filter, FindCondition, FindQuery, OrderBy, ReadPolicy, UpdateCondition, UpdateQuery,
};
pub use crate::transaction::{SessionHandle, TxScope};

pub mod memory {
    //! In-process engine for tests and local runs.
    pub use crate::memory::{
        EngineStats, MemoryEngine, MemoryEngineFactory, MemoryOp, MemoryRow, MemorySession,
        row_order,
    };
}
