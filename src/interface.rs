use async_trait::async_trait;
use crate::core::Result;
use crate::query::{FindQuery, UpdateQuery};

/// A single-connection unit of work.
///
/// The router only drives the transaction lifecycle; everything else a
/// session can do is reached through [`QuerySession`] or through the
/// concrete type inside caller callbacks.
#[async_trait]
pub trait Session: Send + 'static {
    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Releases the underlying connection. Must be idempotent.
    async fn close(&mut self) -> Result<()>;

    fn is_in_transaction(&self) -> bool;

    fn is_closed(&self) -> bool;
}

/// Query capability needed by the parallel fan-out operations.
///
/// Rows come back in the backend's own representation; callers map them
/// into typed records with a row mapper.
#[async_trait]
pub trait QuerySession: Session {
    type Row: Send + 'static;

    async fn find(&mut self, query: &FindQuery) -> Result<Vec<Self::Row>>;

    async fn count(&mut self, query: &FindQuery) -> Result<i64>;

    /// Returns the number of affected rows.
    async fn update(&mut self, update: &UpdateQuery) -> Result<u64>;
}

/// A pooled connection factory for one physical replica.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    type Session: Session;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    async fn new_session(&self) -> Result<Self::Session>;

    /// Verifies the replica is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Builds engines from connection strings found in configuration.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    type Engine: Engine;

    async fn connect(&self, dsn: &str) -> Result<Self::Engine>;
}
