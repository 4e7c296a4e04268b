use super::merge::k_way_merge;
use crate::core::{Identified, Identifier, Result, Role, RouterError};
use crate::interface::{Engine, QuerySession};
use crate::query::{FindCondition, FindQuery, ReadPolicy, ShardCondition, UpdateCondition, UpdateQuery};
use crate::routing::{EngineGroup, EngineRegistry, Route};
use crate::transaction::{SessionHandle, auto_transaction};
use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{Instrument, Level, event, info_span};

/// Row type produced by the sessions of engine `E`.
pub type RowOf<E> = <<E as Engine>::Session as QuerySession>::Row;

/// Runs one logical read or write on every shard of an identifier at once.
///
/// Each shard gets its own task and its own bare session, so fan-out never
/// touches a scope's open transactions. The first shard error aborts the
/// remaining tasks and is returned; results of shards that already finished
/// are discarded.
pub struct FanOut<E: Engine> {
    registry: Arc<EngineRegistry<E>>,
}

impl<E: Engine> Clone for FanOut<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<E: Engine> FanOut<E> {
    pub fn new(registry: Arc<EngineRegistry<E>>) -> Self {
        Self { registry }
    }
}

impl<E> FanOut<E>
where
    E: Engine,
    E::Session: QuerySession,
{
    /// Issues `query` on every engine of `policy`'s role and merges the
    /// per-shard results, each already sorted by `query.order_by`, with
    /// `compare`.
    ///
    /// `compare` must order mapped records the same way `query.order_by`
    /// orders rows; when they disagree the output is not globally sorted.
    /// For raw [`MemoryRow`](crate::memory::MemoryRow) results,
    /// [`row_order`](crate::memory::row_order) builds it from the query's
    /// `order_by`.
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
        let group = self.registry.group(obj)?;
        let routes = group.resolve_all(policy.role());
        let plan = ShardCondition::Every(query).plan(group.identifier(), policy.role(), routes.len())?;
        let runs = self
            .run("find_parallel", &group, routes, plan, false, find_worker::<E::Session, T, M>(map_row))
            .await?;
        Ok(k_way_merge(runs.into_iter().map(|(_, run)| run).collect(), compare))
    }

    /// Issues each shard's own query; shards absent from `condition` are
    /// skipped. Results are concatenated in shard order.
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
        let group = self.registry.group(obj)?;
        let role = condition.policy.role();
        let routes = group.resolve_all(role);
        let plan = condition.target.plan(group.identifier(), role, routes.len())?;
        let runs = self
            .run("find_parallel_by_condition", &group, routes, plan, false, find_worker::<E::Session, T, M>(map_row))
            .await?;
        Ok(runs.into_iter().flat_map(|(_, run)| run).collect())
    }

    /// Per-shard counts, indexed by shard. Skipped shards report 0.
    pub async fn count_parallel_by_condition(
        &self,
        obj: impl Identified,
        condition: FindCondition,
    ) -> Result<Vec<i64>> {
        let group = self.registry.group(obj)?;
        let role = condition.policy.role();
        let routes = group.resolve_all(role);
        let shard_count = routes.len();
        let plan = condition.target.plan(group.identifier(), role, shard_count)?;
        let counted = self
            .run(
                "count_parallel_by_condition",
                &group,
                routes,
                plan,
                false,
                |session: SessionHandle<E::Session>, query: FindQuery| async move {
                    session.lock().await.count(&query).await
                },
            )
            .await?;

        let mut counts = vec![0; shard_count];
        for (shard, count) in counted {
            counts[shard] = count;
        }
        Ok(counts)
    }

    /// Applies each shard's update and returns the total affected rows.
    ///
    /// Shards are not coordinated: if one shard fails, updates already
    /// committed on other shards stay applied. With auto-transaction enabled
    /// each shard's update runs in its own transaction.
    pub async fn update_parallel_by_condition(
        &self,
        obj: impl Identified,
        condition: UpdateCondition,
    ) -> Result<u64> {
        let group = self.registry.ensure_writable(obj)?;
        let routes = group.resolve_all(Role::Master);
        let plan = condition.target.plan(group.identifier(), Role::Master, routes.len())?;
        let updated = self
            .run(
                "update_parallel_by_condition",
                &group,
                routes,
                plan,
                group.is_auto_transaction(),
                |session: SessionHandle<E::Session>, update: UpdateQuery| async move {
                    session.lock().await.update(&update).await
                },
            )
            .await;

        match updated {
            Ok(per_shard) => Ok(per_shard.into_iter().map(|(_, affected)| affected).sum()),
            Err(err) => {
                event!(
                    Level::WARN,
                    identifier = %group.identifier(),
                    error = %err,
                    "parallel update failed; shards that already finished keep their changes"
                );
                Err(err)
            }
        }
    }

    async fn run<Q, R, W, Fut>(
        &self,
        operation: &'static str,
        group: &EngineGroup<E>,
        routes: Vec<Route<E>>,
        plan: Vec<(usize, Q)>,
        auto_tx: bool,
        work: W,
    ) -> Result<Vec<(usize, R)>>
    where
        Q: Send + 'static,
        R: Send + 'static,
        W: Fn(SessionHandle<E::Session>, Q) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let identifier = group.identifier().clone();
        let span = info_span!("fanout", operation, identifier = %identifier, shards = plan.len());

        async move {
            let work = Arc::new(work);
            let mut tasks = JoinSet::new();
            for (shard, query) in plan {
                // plan() only yields shards below routes.len()
                let route = routes[shard].clone();
                let identifier = identifier.clone();
                let work = Arc::clone(&work);
                tasks.spawn(async move {
                    let result = run_shard(identifier, route, auto_tx, query, work).await;
                    (shard, result)
                });
            }

            let mut results = Vec::with_capacity(tasks.len());
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((shard, Ok(value))) => results.push((shard, value)),
                    Ok((shard, Err(err))) => {
                        tasks.abort_all();
                        event!(Level::WARN, shard, error = %err, "shard failed; cancelling siblings");
                        return Err(err);
                    }
                    Err(join_error) => {
                        tasks.abort_all();
                        return Err(RouterError::Worker(join_error.to_string()));
                    }
                }
            }

            results.sort_by_key(|(shard, _)| *shard);
            event!(Level::DEBUG, completed = results.len(), "fan-out finished");
            Ok::<_, RouterError>(results)
        }
        .instrument(span)
        .await
    }
}

fn find_worker<S, T, M>(
    map_row: M,
) -> impl Fn(SessionHandle<S>, FindQuery) -> std::pin::Pin<Box<dyn Future<Output = Result<Vec<T>>> + Send>>
       + Send
       + Sync
       + 'static
where
    S: QuerySession,
    T: Send + 'static,
    M: Fn(S::Row) -> Result<T> + Send + Sync + 'static,
{
    let map_row = Arc::new(map_row);
    move |session: SessionHandle<S>, query: FindQuery| {
        let map_row = Arc::clone(&map_row);
        Box::pin(async move {
            let rows = session.lock().await.find(&query).await?;
            rows.into_iter()
                .map(|row| (*map_row)(row))
                .collect::<Result<Vec<T>>>()
        })
    }
}

async fn run_shard<E, Q, R, W, Fut>(
    identifier: Identifier,
    route: Route<E>,
    auto_tx: bool,
    query: Q,
    work: Arc<W>,
) -> Result<R>
where
    E: Engine,
    W: Fn(SessionHandle<E::Session>, Q) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let session = route.engine.new_session().await?;
    let handle = SessionHandle::new(session, identifier, route.role, route.shard);
    let outcome = auto_transaction(auto_tx, handle.clone(), |session| (*work)(session, query)).await;
    let closed = handle.close().await;
    let value = outcome?;
    closed?;
    Ok(value)
}
