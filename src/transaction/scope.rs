use super::SessionHandle;
use super::coordinator::open_transaction;
use crate::core::{Identified, Identifier, Result, ShardKey};
use crate::interface::Engine;
use crate::routing::{EngineGroup, EngineRegistry};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Commit,
    Rollback,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// Session registry for one unit of work (typically one request).
///
/// Holds at most one transactional session per identifier and master shard.
/// Every method that changes the registry takes `&mut self`, so a scope is
/// driven by one caller at a time; share work across tasks by giving each
/// task its own scope.
///
/// Finalize with [`finish_commit`](Self::finish_commit),
/// [`finish_rollback`](Self::finish_rollback) or [`close`](Self::close).
/// Dropping a scope with open transactions cannot roll them back (that
/// needs I/O) and only logs a warning; the sessions are released when their
/// last handle drops.
pub struct TxScope<E: Engine> {
    id: Uuid,
    registry: Arc<EngineRegistry<E>>,
    active: HashMap<Identifier, BTreeMap<usize, SessionHandle<E::Session>>>,
}

impl<E: Engine> TxScope<E> {
    pub fn new(registry: Arc<EngineRegistry<E>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            active: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Identifiers with at least one open transaction, sorted.
    pub fn active_identifiers(&self) -> Vec<Identifier> {
        let mut identifiers = self.active.keys().cloned().collect::<Vec<_>>();
        identifiers.sort();
        identifiers
    }

    pub fn active_session(&self, obj: impl Identified, shard: usize) -> Option<SessionHandle<E::Session>> {
        self.active
            .get(&obj.identifier())
            .and_then(|sessions| sessions.get(&shard))
            .cloned()
    }

    /// Open transaction on the master shard `key` routes to, if any.
    pub(crate) fn active_for_key(
        &self,
        group: &EngineGroup<E>,
        key: Option<&ShardKey>,
    ) -> Option<SessionHandle<E::Session>> {
        let sessions = self.active.get(group.identifier())?;
        let shard = group.master_shard(key).ok()?;
        sessions.get(&shard).cloned()
    }

    /// True if `handle` is one of this scope's transactional sessions.
    pub fn owns(&self, handle: &SessionHandle<E::Session>) -> bool {
        self.active
            .get(handle.identifier())
            .and_then(|sessions| sessions.get(&handle.shard()))
            .is_some_and(|owned| owned.same_session(handle))
    }

    /// Returns the scope's transaction for `obj`, beginning one on first use.
    pub async fn transaction(&mut self, obj: impl Identified) -> Result<SessionHandle<E::Session>> {
        let key = obj.shard_key();
        self.transaction_by_key(obj, key).await
    }

    /// Like [`transaction`](Self::transaction) with an explicit shard key.
    pub async fn transaction_by_key(
        &mut self,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        let group = self.registry.ensure_writable(obj)?;
        let route = group.resolve_master(key.as_ref())?;

        let cached = self
            .active
            .get(group.identifier())
            .and_then(|sessions| sessions.get(&route.shard))
            .cloned();
        if let Some(existing) = cached {
            if existing.is_in_transaction().await && !existing.is_closed().await {
                return Ok(existing);
            }
            // Finished outside the scope: forget it and start over.
            if let Some(sessions) = self.active.get_mut(group.identifier()) {
                sessions.remove(&route.shard);
                if sessions.is_empty() {
                    self.active.remove(group.identifier());
                }
            }
            event!(
                Level::DEBUG,
                scope = %self.id,
                identifier = %group.identifier(),
                shard = route.shard,
                session_id = existing.id(),
                "replacing finished scope transaction"
            );
            if let Err(err) = existing.close().await {
                event!(Level::WARN, session_id = existing.id(), error = %err, "failed to close stale session");
            }
        }

        let handle = open_transaction(&group, &route).await?;
        event!(
            Level::DEBUG,
            scope = %self.id,
            identifier = %group.identifier(),
            shard = route.shard,
            session_id = handle.id(),
            "scope transaction started"
        );
        self.active
            .entry(group.identifier().clone())
            .or_default()
            .insert(route.shard, handle.clone());
        Ok(handle)
    }

    /// Commits and releases every open transaction of `obj`. No-op if none.
    pub async fn commit_all(&mut self, obj: impl Identified) -> Result<()> {
        self.finalize(obj.identifier(), Outcome::Commit).await
    }

    /// Rolls back and releases every open transaction of `obj`. No-op if none.
    pub async fn rollback_all(&mut self, obj: impl Identified) -> Result<()> {
        self.finalize(obj.identifier(), Outcome::Rollback).await
    }

    /// Releases every session of `obj` whatever its transaction state.
    pub async fn close_all(&mut self, obj: impl Identified) {
        let identifier = obj.identifier();
        let Some(sessions) = self.active.remove(&identifier) else {
            return;
        };
        for (shard, handle) in sessions {
            if let Err(err) = handle.close().await {
                event!(
                    Level::WARN,
                    scope = %self.id,
                    identifier = %identifier,
                    shard,
                    error = %err,
                    "failed to close scope session"
                );
            }
        }
    }

    /// Commits every identifier and ends the scope.
    ///
    /// Identifiers are finalized in sorted order; the first error is
    /// returned after all of them were attempted.
    pub async fn finish_commit(mut self) -> Result<()> {
        self.finalize_everything(Outcome::Commit).await
    }

    /// Rolls back every identifier and ends the scope.
    pub async fn finish_rollback(mut self) -> Result<()> {
        self.finalize_everything(Outcome::Rollback).await
    }

    /// Releases every session and ends the scope.
    pub async fn close(mut self) {
        for identifier in self.active_identifiers() {
            self.close_all(identifier).await;
        }
    }

    async fn finalize_everything(&mut self, outcome: Outcome) -> Result<()> {
        let mut first_error = None;
        for identifier in self.active_identifiers() {
            if let Err(err) = self.finalize(identifier, outcome).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn finalize(&mut self, identifier: Identifier, outcome: Outcome) -> Result<()> {
        let Some(sessions) = self.active.remove(&identifier) else {
            return Ok(());
        };

        let span = info_span!(
            "scope.finalize",
            scope = %self.id,
            identifier = %identifier,
            outcome = outcome.as_str(),
            shards = sessions.len()
        );

        async move {
            let mut first_error = None;
            for (shard, handle) in sessions {
                // Once a commit fails the remaining shards are rolled back.
                let result = if !handle.is_in_transaction().await {
                    event!(Level::DEBUG, shard, session_id = handle.id(), "scope session already finished");
                    Ok(())
                } else {
                    match (outcome, first_error.is_some()) {
                        (Outcome::Commit, false) => handle.commit().await,
                        _ => handle.rollback().await,
                    }
                };
                if let Err(err) = result {
                    event!(Level::ERROR, shard, error = %err, "scope finalize failed");
                    first_error.get_or_insert(err);
                }
                if let Err(err) = handle.close().await {
                    event!(Level::WARN, shard, error = %err, "failed to close scope session");
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        }
        .instrument(span)
        .await
    }
}

impl<E: Engine> Drop for TxScope<E> {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            event!(
                Level::WARN,
                scope = %self.id,
                identifiers = ?self.active_identifiers(),
                "TxScope dropped with open transactions; call finish_commit, finish_rollback or close"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryEngine, MemoryOp};

    fn sharded() -> (Arc<EngineRegistry<MemoryEngine>>, MemoryEngine, MemoryEngine) {
        let registry = Arc::new(EngineRegistry::new());
        let m0 = MemoryEngine::new("m0");
        let m1 = MemoryEngine::new("m1");
        registry
            .register_group("orders", vec![m0.clone(), m1.clone()], Vec::new())
            .unwrap();
        (registry, m0, m1)
    }

    #[tokio::test]
    async fn test_failed_commit_rolls_back_remaining_shards() {
        let (registry, m0, m1) = sharded();
        let mut scope = TxScope::new(registry);
        scope.transaction_by_key("orders", Some(ShardKey::Int(0))).await.unwrap();
        scope.transaction_by_key("orders", Some(ShardKey::Int(1))).await.unwrap();

        m0.fail_next(MemoryOp::Commit, "lost").await;
        let err = scope.commit_all("orders").await.unwrap_err();

        assert_eq!(err.to_string(), "m0: lost");
        assert_eq!(m1.stats().commits, 0);
        assert_eq!(m1.stats().rollbacks, 1);
        assert!(scope.is_empty());
        assert_eq!(m0.stats().open_sessions() + m1.stats().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_active_session_lookup() {
        let (registry, _, _) = sharded();
        let group = registry.group("orders").unwrap();
        let mut scope = TxScope::new(Arc::clone(&registry));

        let tx = scope.transaction_by_key("orders", Some(ShardKey::Int(3))).await.unwrap();
        assert_eq!(tx.shard(), 1);
        assert!(scope.owns(&tx));
        assert!(scope.active_session("orders", 0).is_none());
        assert!(scope.active_for_key(&group, Some(&ShardKey::Int(5))).is_some());
        assert!(scope.active_for_key(&group, None).is_none());

        scope.close().await;
    }

    fn single() -> (Arc<EngineRegistry<MemoryEngine>>, MemoryEngine) {
        let registry = Arc::new(EngineRegistry::new());
        let engine = MemoryEngine::new("u0");
        registry
            .register_group("users", vec![engine.clone()], Vec::new())
            .unwrap();
        (registry, engine)
    }

    #[tokio::test]
    async fn test_transaction_finished_outside_scope_is_replaced() {
        let (registry, engine) = single();
        let mut scope = TxScope::new(registry);

        let first = scope.transaction("users").await.unwrap();
        first.commit().await.unwrap();

        let second = scope.transaction("users").await.unwrap();
        assert!(!second.same_session(&first));
        assert!(second.is_in_transaction().await);
        assert!(first.is_closed().await);

        second.close().await.unwrap();
        let third = scope.transaction("users").await.unwrap();
        assert!(!third.same_session(&second));
        assert!(third.is_in_transaction().await);

        scope.commit_all("users").await.unwrap();
        assert_eq!(engine.stats().begins, 3);
        assert_eq!(engine.stats().commits, 2);
        assert_eq!(engine.stats().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_finalize_releases_finished_sessions() {
        let (registry, engine) = single();
        let mut scope = TxScope::new(registry);

        let tx = scope.transaction("users").await.unwrap();
        tx.rollback().await.unwrap();

        scope.commit_all("users").await.unwrap();
        assert!(scope.is_empty());
        assert!(tx.is_closed().await);
        assert_eq!(engine.stats().commits, 0);
        assert_eq!(engine.stats().rollbacks, 1);
        assert_eq!(engine.stats().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_finish_commit_covers_every_identifier() {
        let (registry, m0, _) = sharded();
        let users = MemoryEngine::new("u0");
        registry
            .register_group("users", vec![users.clone()], Vec::new())
            .unwrap();

        let mut scope = TxScope::new(registry);
        scope.transaction(Identifier::new("users")).await.unwrap();
        scope.transaction_by_key("orders", Some(ShardKey::Int(0))).await.unwrap();
        assert_eq!(
            scope.active_identifiers(),
            vec![Identifier::new("orders"), Identifier::new("users")]
        );

        scope.finish_commit().await.unwrap();
        assert_eq!(users.stats().commits, 1);
        assert_eq!(m0.stats().commits, 1);
    }
}
