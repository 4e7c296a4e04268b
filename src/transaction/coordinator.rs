use super::SessionHandle;
use crate::core::{Identified, Result, RouterError, ShardKey};
use crate::interface::{Engine, Session};
use crate::routing::{EngineGroup, EngineRegistry, Route};
use std::future::Future;
use tracing::{Level, event};

/// Mints a bare session on the routed engine.
pub(crate) async fn open_session<E: Engine>(
    group: &EngineGroup<E>,
    route: &Route<E>,
) -> Result<SessionHandle<E::Session>> {
    let session = route.engine.new_session().await?;
    Ok(SessionHandle::new(
        session,
        group.identifier().clone(),
        route.role,
        route.shard,
    ))
}

/// Mints a session on the routed engine and begins a transaction on it.
///
/// The session is closed again if `begin` fails.
pub(crate) async fn open_transaction<E: Engine>(
    group: &EngineGroup<E>,
    route: &Route<E>,
) -> Result<SessionHandle<E::Session>> {
    let handle = open_session(group, route).await?;
    if let Err(err) = handle.begin().await {
        let _ = handle.close().await;
        return Err(err);
    }
    Ok(handle)
}

/// Begins a transaction on a fresh master session, independent of any scope.
///
/// Used when work must commit or roll back separately from an ongoing
/// transaction on the same identifier.
pub async fn force_new_transaction<E: Engine>(
    registry: &EngineRegistry<E>,
    obj: impl Identified,
    key: Option<&ShardKey>,
) -> Result<SessionHandle<E::Session>> {
    let group = registry.ensure_writable(obj)?;
    let route = group.resolve_master(key)?;
    let handle = open_transaction(&group, &route).await?;
    event!(
        Level::DEBUG,
        identifier = %group.identifier(),
        session_id = handle.id(),
        "forced new transaction"
    );
    Ok(handle)
}

/// Runs `op` on `session`, wrapping it in a transaction when `enabled`.
///
/// A session that is already transactional is used as-is: the caller owns
/// that transaction boundary. Otherwise, with `enabled`, the session is begun
/// before `op`, committed on success and rolled back on error. The error
/// from `op` is returned unchanged; a failing rollback is attached to it as
/// `RollbackFailed`.
pub async fn auto_transaction<S, F, Fut, T>(
    enabled: bool,
    session: SessionHandle<S>,
    op: F,
) -> Result<T>
where
    S: Session,
    F: FnOnce(SessionHandle<S>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !enabled || session.is_in_transaction().await {
        return op(session).await;
    }

    session.begin().await?;
    match op(session.clone()).await {
        Ok(value) => {
            if let Err(err) = session.commit().await {
                if session.is_in_transaction().await {
                    let _ = session.rollback().await;
                }
                return Err(err);
            }
            Ok(value)
        }
        Err(err) => match session.rollback().await {
            Ok(()) => Err(err),
            Err(rollback_error) => {
                event!(
                    Level::ERROR,
                    session_id = session.id(),
                    error = %err,
                    rollback_error = %rollback_error,
                    "auto transaction rollback failed"
                );
                Err(RouterError::RollbackFailed {
                    error: Box::new(err),
                    rollback_error: Box::new(rollback_error),
                })
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identifier, Role};
    use async_trait::async_trait;

    #[derive(Default)]
    struct CountingSession {
        begins: u32,
        commits: u32,
        rollbacks: u32,
        in_transaction: bool,
        closed: bool,
        fail_rollback: bool,
    }

    #[async_trait]
    impl Session for CountingSession {
        async fn begin(&mut self) -> Result<()> {
            self.begins += 1;
            self.in_transaction = true;
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            self.commits += 1;
            self.in_transaction = false;
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.rollbacks += 1;
            self.in_transaction = false;
            if self.fail_rollback {
                return Err(RouterError::backend("connection reset"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }

        fn is_in_transaction(&self) -> bool {
            self.in_transaction
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn handle(session: CountingSession) -> SessionHandle<CountingSession> {
        SessionHandle::new(session, Identifier::new("users"), Role::Master, 0)
    }

    async fn calls(handle: &SessionHandle<CountingSession>) -> (u32, u32, u32) {
        let session = handle.lock().await;
        (session.begins, session.commits, session.rollbacks)
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let session = handle(CountingSession::default());

        let value = auto_transaction(false, session.clone(), |_| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        let err = auto_transaction(false, session.clone(), |_| async {
            Err::<(), _>(RouterError::backend("boom"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "boom");

        assert_eq!(calls(&session).await, (0, 0, 0));
    }

    #[tokio::test]
    async fn test_enabled_commits_on_success() {
        let session = handle(CountingSession::default());
        auto_transaction(true, session.clone(), |_| async { Ok(()) }).await.unwrap();
        assert_eq!(calls(&session).await, (1, 1, 0));
    }

    #[tokio::test]
    async fn test_enabled_rolls_back_on_error() {
        let session = handle(CountingSession::default());
        let err = auto_transaction(true, session.clone(), |_| async {
            Err::<(), _>(RouterError::IdentifierReadOnly(Identifier::new("users")))
        })
        .await
        .unwrap_err();

        assert!(err.is_read_only());
        assert_eq!(calls(&session).await, (1, 0, 1));
    }

    #[tokio::test]
    async fn test_existing_transaction_is_reused() {
        let session = handle(CountingSession::default());
        session.begin().await.unwrap();

        auto_transaction(true, session.clone(), |_| async { Ok(()) }).await.unwrap();
        let _ = auto_transaction(true, session.clone(), |_| async {
            Err::<(), _>(RouterError::backend("boom"))
        })
        .await;

        assert_eq!(calls(&session).await, (1, 0, 0));
        assert!(session.is_in_transaction().await);
    }

    #[tokio::test]
    async fn test_rollback_failure_is_attached() {
        let session = handle(CountingSession {
            fail_rollback: true,
            ..CountingSession::default()
        });
        let err = auto_transaction(true, session.clone(), |_| async {
            Err::<(), _>(RouterError::backend("deadlock"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, RouterError::RollbackFailed { .. }));
        assert_eq!(err.primary().to_string(), "deadlock");
    }
}
