use crate::core::{Identifier, Result, Role, RouterError};
use crate::interface::Session;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{Level, event};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle to a session bound to one engine.
///
/// Clones refer to the same session; the registry hands out clones so that
/// every operation in a scope sees the same transaction.
pub struct SessionHandle<S> {
    id: u64,
    identifier: Identifier,
    role: Role,
    shard: usize,
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            identifier: self.identifier.clone(),
            role: self.role,
            shard: self.shard,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for SessionHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("role", &self.role)
            .field("shard", &self.shard)
            .finish()
    }
}

impl<S: Session> SessionHandle<S> {
    pub(crate) fn new(session: S, identifier: Identifier, role: Role, shard: usize) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        event!(
            Level::DEBUG,
            session_id = id,
            identifier = %identifier,
            role = %role,
            shard,
            "session opened"
        );
        Self {
            id,
            identifier,
            role,
            shard,
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    /// True if both handles point at the same underlying session.
    pub fn same_session(&self, other: &SessionHandle<S>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Locks the session for direct use.
    pub async fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().await
    }

    pub async fn is_in_transaction(&self) -> bool {
        self.inner.lock().await.is_in_transaction()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_closed()
    }

    pub async fn begin(&self) -> Result<()> {
        let mut session = self.inner.lock().await;
        if session.is_closed() {
            return Err(RouterError::SessionClosed(self.describe()));
        }
        if session.is_in_transaction() {
            return Err(RouterError::TransactionAlreadyActive(self.describe()));
        }
        session.begin().await?;
        event!(Level::DEBUG, session_id = self.id, "transaction begun");
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        let mut session = self.inner.lock().await;
        if !session.is_in_transaction() {
            return Err(RouterError::TransactionAbsent(self.describe()));
        }
        session.commit().await?;
        event!(Level::DEBUG, session_id = self.id, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        let mut session = self.inner.lock().await;
        if !session.is_in_transaction() {
            return Err(RouterError::TransactionAbsent(self.describe()));
        }
        session.rollback().await?;
        event!(Level::DEBUG, session_id = self.id, "transaction rolled back");
        Ok(())
    }

    /// Releases the connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut session = self.inner.lock().await;
        if session.is_closed() {
            return Ok(());
        }
        session.close().await?;
        event!(Level::DEBUG, session_id = self.id, "session closed");
        Ok(())
    }

    fn describe(&self) -> String {
        format!(
            "session {} on {} {} shard {}",
            self.id, self.identifier, self.role, self.shard
        )
    }
}
