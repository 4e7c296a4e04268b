use super::identifier::{Identifier, Role};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Identifier '{0}' is not registered")]
    UnknownIdentifier(Identifier),

    #[error("Identifier '{0}' is already registered")]
    DuplicateIdentifier(Identifier),

    #[error("Identifier '{identifier}' has {shard_count} master shards; a shard key is required")]
    AmbiguousShard {
        identifier: Identifier,
        shard_count: usize,
    },

    #[error("Identifier '{0}' is read-only")]
    IdentifierReadOnly(Identifier),

    #[error("Identifier '{identifier}' has no {role} engine")]
    NoEngine { identifier: Identifier, role: Role },

    #[error("Shard {shard} is out of range for {count} {role} engines of '{identifier}'")]
    ShardOutOfRange {
        identifier: Identifier,
        role: Role,
        shard: usize,
        count: usize,
    },

    #[error("Transaction already active: {0}")]
    TransactionAlreadyActive(String),

    #[error("No active transaction: {0}")]
    TransactionAbsent(String),

    #[error("Session is closed: {0}")]
    SessionClosed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("Fan-out worker failed: {0}")]
    Worker(String),

    #[error("{error} (rollback also failed: {rollback_error})")]
    RollbackFailed {
        error: Box<RouterError>,
        rollback_error: Box<RouterError>,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl RouterError {
    /// Wraps an opaque collaborator error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(anyhow::anyhow!(message.into()))
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::IdentifierReadOnly(_))
    }

    pub fn is_unknown_identifier(&self) -> bool {
        matches!(self, Self::UnknownIdentifier(_))
    }

    pub fn is_ambiguous_shard(&self) -> bool {
        matches!(self, Self::AmbiguousShard { .. })
    }

    /// Returns the error that caused a rollback, looking through `RollbackFailed`.
    pub fn primary(&self) -> &RouterError {
        match self {
            Self::RollbackFailed { error, .. } => error.primary(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl<T> From<std::sync::PoisonError<T>> for RouterError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
