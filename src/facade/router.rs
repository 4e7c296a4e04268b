use crate::connection::config::RouterConfig;
use crate::connection::connect_group;
use crate::core::{Identified, Identifier, Result, Role, ShardKey};
use crate::interface::{Engine, EngineFactory, QuerySession};
use crate::parallel::{FanOut, RowOf};
use crate::query::{FindCondition, FindQuery, ReadPolicy, UpdateCondition};
use crate::routing::{EngineGroup, EngineRegistry};
use crate::transaction::coordinator::{self, open_session};
use crate::transaction::{SessionHandle, TxScope};
use futures::future::join_all;
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use tracing::{Level, event};

/// Entry point for routed data access.
///
/// A router owns the engine registry and is cheap to clone; clones share the
/// registry. Per-request transaction state lives in a [`TxScope`] obtained
/// from [`scope`](Self::scope) and passed to the scoped operations.
///
/// Session lifetime rules:
/// - sessions returned by `use_*` and `using_*` that are not part of a
///   scope's transaction are bare; the caller closes them (dropping the last
///   handle also releases them)
/// - sessions returned by `transaction*` belong to the scope and are
///   released by `commit_all`, `rollback_all` or `close_all`
/// - the `get`/`find`/`count`/`insert`/`update` wrappers close any bare
///   session they opened before returning
pub struct Router<E: Engine> {
    registry: Arc<EngineRegistry<E>>,
    fanout: FanOut<E>,
}

impl<E: Engine> Clone for Router<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            fanout: self.fanout.clone(),
        }
    }
}

impl<E: Engine> Default for Router<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Engine> Router<E> {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(EngineRegistry::new()))
    }

    pub fn with_registry(registry: Arc<EngineRegistry<E>>) -> Self {
        Self {
            fanout: FanOut::new(Arc::clone(&registry)),
            registry,
        }
    }

    /// Builds a router by connecting every DSN of `config` through `factory`.
    pub async fn from_config<F>(config: &RouterConfig, factory: &F) -> Result<Self>
    where
        F: EngineFactory<Engine = E>,
    {
        config.validate()?;
        let router = Self::new();
        for group_config in &config.groups {
            let connected = connect_group(factory, group_config).await?;
            let group = EngineGroup::new(
                Identifier::new(&group_config.identifier),
                connected.masters,
                connected.slaves,
            )
            .with_balance(group_config.slave_balance);
            group.set_read_only(group_config.read_only);
            group.set_auto_transaction(group_config.auto_transaction);
            router.registry.register(group)?;
        }
        event!(Level::INFO, groups = config.groups.len(), "router configured");
        Ok(router)
    }

    pub fn registry(&self) -> &Arc<EngineRegistry<E>> {
        &self.registry
    }

    pub fn register_group(
        &self,
        identifier: impl Into<Identifier>,
        masters: Vec<E>,
        slaves: Vec<E>,
    ) -> Result<Arc<EngineGroup<E>>> {
        self.registry.register_group(identifier, masters, slaves)
    }

    /// Sets the read-only flag of `obj`'s identifier.
    pub fn read_only(&self, obj: impl Identified, read_only: bool) -> Result<()> {
        self.registry.set_read_only(obj, read_only)
    }

    pub fn is_read_only(&self, obj: impl Identified) -> Result<bool> {
        self.registry.is_read_only(obj)
    }

    pub fn set_auto_transaction(&self, obj: impl Identified, enabled: bool) -> Result<()> {
        self.registry.set_auto_transaction(obj, enabled)
    }

    pub fn is_auto_transaction(&self, obj: impl Identified) -> Result<bool> {
        self.registry.is_auto_transaction(obj)
    }

    /// New, empty transaction scope for one unit of work.
    pub fn scope(&self) -> TxScope<E> {
        TxScope::new(Arc::clone(&self.registry))
    }

    // ------------------------------------------------------------------
    // Engine resolution
    // ------------------------------------------------------------------

    /// Master engine for `obj`, routed by its own shard key.
    pub fn master(&self, obj: impl Identified) -> Result<Arc<E>> {
        let key = obj.shard_key();
        self.master_by_key(obj, key)
    }

    pub fn master_by_key(&self, obj: impl Identified, key: Option<ShardKey>) -> Result<Arc<E>> {
        Ok(self.registry.resolve_master(obj, key.as_ref())?.engine)
    }

    pub fn masters(&self, obj: impl Identified) -> Result<Vec<Arc<E>>> {
        Ok(self.registry.group(obj)?.masters().to_vec())
    }

    /// Slave engine for `obj`; unkeyed objects are load-balanced.
    pub fn slave(&self, obj: impl Identified) -> Result<Arc<E>> {
        let key = obj.shard_key();
        self.slave_by_key(obj, key)
    }

    pub fn slave_by_key(&self, obj: impl Identified, key: Option<ShardKey>) -> Result<Arc<E>> {
        Ok(self.registry.resolve_slave(obj, key.as_ref())?.engine)
    }

    pub fn slaves(&self, obj: impl Identified) -> Result<Vec<Arc<E>>> {
        Ok(self.registry.group(obj)?.slaves().to_vec())
    }

    // ------------------------------------------------------------------
    // Session acquisition
    // ------------------------------------------------------------------

    /// Bare session on the master `obj` routes to, ignoring any scope.
    pub async fn new_master_session(&self, obj: impl Identified) -> Result<SessionHandle<E::Session>> {
        let key = obj.shard_key();
        self.using_master_session(obj, key).await
    }

    /// The scope's transaction on `obj`'s master shard, or a bare master
    /// session when the scope has none.
    pub async fn use_master_session(
        &self,
        scope: &TxScope<E>,
        obj: impl Identified,
    ) -> Result<SessionHandle<E::Session>> {
        let key = obj.shard_key();
        self.use_master_session_by_key(scope, obj, key).await
    }

    pub async fn use_master_session_by_key(
        &self,
        scope: &TxScope<E>,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        let group = self.registry.group(obj)?;
        if let Some(active) = scope.active_for_key(&group, key.as_ref()) {
            return Ok(active);
        }
        let route = group.resolve_master(key.as_ref())?;
        open_session(&group, &route).await
    }

    /// The scope's transaction on `obj`'s master shard, or a bare slave
    /// session when the scope has none.
    ///
    /// Reads inside a scope transaction see its uncommitted writes.
    pub async fn use_slave_session(
        &self,
        scope: &TxScope<E>,
        obj: impl Identified,
    ) -> Result<SessionHandle<E::Session>> {
        let key = obj.shard_key();
        self.use_slave_session_by_key(scope, obj, key).await
    }

    pub async fn use_slave_session_by_key(
        &self,
        scope: &TxScope<E>,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        let group = self.registry.group(obj)?;
        if let Some(active) = scope.active_for_key(&group, key.as_ref()) {
            return Ok(active);
        }
        let route = group.resolve_slave(key.as_ref())?;
        open_session(&group, &route).await
    }

    /// One session per master shard, in shard order: the scope's
    /// transaction where it has one, a bare session elsewhere.
    pub async fn use_all_master_sessions(
        &self,
        scope: &TxScope<E>,
        obj: impl Identified,
    ) -> Result<Vec<SessionHandle<E::Session>>> {
        let group = self.registry.group(obj)?;
        let mut sessions = Vec::with_capacity(group.master_count());
        for route in group.resolve_all(Role::Master) {
            match scope.active_session(group.identifier(), route.shard) {
                Some(active) => sessions.push(active),
                None => sessions.push(open_session(&group, &route).await?),
            }
        }
        Ok(sessions)
    }

    /// Always a new bare master session; never joins a transaction.
    pub async fn using_master_session(
        &self,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        let group = self.registry.group(obj)?;
        let route = group.resolve_master(key.as_ref())?;
        open_session(&group, &route).await
    }

    /// Always a new bare slave session; never joins a transaction.
    pub async fn using_slave_session(
        &self,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        let group = self.registry.group(obj)?;
        let route = group.resolve_slave(key.as_ref())?;
        open_session(&group, &route).await
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Transaction on a fresh master session, outside any scope.
    ///
    /// The caller commits or rolls it back and closes it.
    pub async fn force_new_transaction(&self, obj: impl Identified) -> Result<SessionHandle<E::Session>> {
        let key = obj.shard_key();
        coordinator::force_new_transaction(&self.registry, obj, key.as_ref()).await
    }

    pub async fn transaction(
        &self,
        scope: &mut TxScope<E>,
        obj: impl Identified,
    ) -> Result<SessionHandle<E::Session>> {
        scope.transaction(obj).await
    }

    pub async fn transaction_by_key(
        &self,
        scope: &mut TxScope<E>,
        obj: impl Identified,
        key: Option<ShardKey>,
    ) -> Result<SessionHandle<E::Session>> {
        scope.transaction_by_key(obj, key).await
    }

    /// Runs `f` on `session`, wrapped in a transaction if `obj`'s identifier
    /// has auto-transaction enabled and `session` is not transactional yet.
    pub async fn auto_transaction<F, Fut, T>(
        &self,
        obj: impl Identified,
        session: SessionHandle<E::Session>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let enabled = self.registry.is_auto_transaction(obj)?;
        coordinator::auto_transaction(enabled, session, f).await
    }

    pub async fn commit_all(&self, scope: &mut TxScope<E>, obj: impl Identified) -> Result<()> {
        scope.commit_all(obj).await
    }

    pub async fn rollback_all(&self, scope: &mut TxScope<E>, obj: impl Identified) -> Result<()> {
        scope.rollback_all(obj).await
    }

    pub async fn close_all(&self, scope: &mut TxScope<E>, obj: impl Identified) {
        scope.close_all(obj).await
    }

    // ------------------------------------------------------------------
    // Single-target operations
    // ------------------------------------------------------------------

    /// Runs a read callback on the session [`use_slave_session`](Self::use_slave_session) picks.
    pub async fn get<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.use_slave_session(scope, obj).await?;
        release_after(scope, session, f).await
    }

    pub async fn find<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get(scope, obj, f).await
    }

    pub async fn count<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get(scope, obj, f).await
    }

    /// Like [`get`](Self::get) but reads from the master, for reads that
    /// must observe the latest committed write.
    pub async fn get_using_master<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.use_master_session(scope, obj).await?;
        release_after(scope, session, f).await
    }

    pub async fn find_using_master<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_using_master(scope, obj, f).await
    }

    pub async fn count_using_master<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.get_using_master(scope, obj, f).await
    }

    /// Runs a write callback on `obj`'s master shard.
    ///
    /// Read-only identifiers are rejected before any engine is contacted.
    /// Inside a scope transaction the callback joins it; otherwise it runs
    /// on a bare session, wrapped per the identifier's auto-transaction flag.
    pub async fn insert<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.write(scope, obj, f).await
    }

    pub async fn update<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.write(scope, obj, f).await
    }

    async fn write<F, Fut, T>(&self, scope: &TxScope<E>, obj: impl Identified, f: F) -> Result<T>
    where
        F: FnOnce(SessionHandle<E::Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let group = self.registry.ensure_writable(&obj)?;
        let key = obj.shard_key();
        let session = self.use_master_session_by_key(scope, &obj, key).await?;
        let enabled = group.is_auto_transaction();
        release_after(scope, session, |session| {
            coordinator::auto_transaction(enabled, session, f)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Pings every master and slave of `obj` concurrently.
    pub async fn ping(&self, obj: impl Identified) -> Result<()> {
        let group = self.registry.group(obj)?;
        let engines = group.masters().iter().chain(group.slaves());
        let results = join_all(engines.map(|engine| engine.ping())).await;
        for (index, result) in results.into_iter().enumerate() {
            if let Err(err) = result {
                event!(
                    Level::WARN,
                    identifier = %group.identifier(),
                    engine = index,
                    error = %err,
                    "ping failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Pings every registered identifier, in identifier order.
    pub async fn ping_all(&self) -> Result<()> {
        for identifier in self.registry.identifiers()? {
            self.ping(&identifier).await?;
        }
        Ok(())
    }
}

impl<E> Router<E>
where
    E: Engine,
    E::Session: QuerySession,
{
    /// See [`FanOut::find_parallel`].
    pub async fn find_parallel<T, M, C>(
        &self,
        obj: impl Identified,
        policy: ReadPolicy,
        query: FindQuery,
        map_row: M,
        compare: C,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        M: Fn(RowOf<E>) -> Result<T> + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering,
    {
        self.fanout.find_parallel(obj, policy, query, map_row, compare).await
    }

    pub async fn find_parallel_by_condition<T, M>(
        &self,
        obj: impl Identified,
        condition: FindCondition,
        map_row: M,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        M: Fn(RowOf<E>) -> Result<T> + Send + Sync + 'static,
    {
        self.fanout.find_parallel_by_condition(obj, condition, map_row).await
    }

    pub async fn count_parallel_by_condition(
        &self,
        obj: impl Identified,
        condition: FindCondition,
    ) -> Result<Vec<i64>> {
        self.fanout.count_parallel_by_condition(obj, condition).await
    }

    /// See [`FanOut::update_parallel_by_condition`]. Shards that finished
    /// before another shard failed keep their changes.
    pub async fn update_parallel_by_condition(
        &self,
        obj: impl Identified,
        condition: UpdateCondition,
    ) -> Result<u64> {
        self.fanout.update_parallel_by_condition(obj, condition).await
    }
}

/// Runs `f` and closes `session` afterwards unless `scope` owns it.
async fn release_after<E, F, Fut, T>(scope: &TxScope<E>, session: SessionHandle<E::Session>, f: F) -> Result<T>
where
    E: Engine,
    F: FnOnce(SessionHandle<E::Session>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let owned = scope.owns(&session);
    let outcome = f(session.clone()).await;
    if owned {
        return outcome;
    }
    let closed = session.close().await;
    let value = outcome?;
    closed?;
    Ok(value)
}
