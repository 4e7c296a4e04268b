// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Scoped transaction affinity on top of the engine registry:
//
// - SessionHandle: shared handle to one session on one engine
// - TxScope: per-unit-of-work registry of open transactions
// - coordinator: forced-new and auto-wrapped transactions
//
// ============================================================================

pub mod coordinator;
pub mod handle;
pub mod scope;

pub use coordinator::{auto_transaction, force_new_transaction};
pub use handle::SessionHandle;
pub use scope::TxScope;
