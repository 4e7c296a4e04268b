use super::{EngineGroup, EngineRegistry, SlaveBalance};
use crate::core::{Identified, Result, Role, RouterError, ShardKey};
use rand::Rng;
use std::sync::Arc;

/// A resolved engine together with its position in the group.
pub struct Route<E> {
    pub engine: Arc<E>,
    pub role: Role,
    pub shard: usize,
}

impl<E> Clone for Route<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            role: self.role,
            shard: self.shard,
        }
    }
}

impl<E> EngineGroup<E> {
    /// Picks the master shard for `key`.
    ///
    /// A single master is returned regardless of key; with several shards a
    /// missing key is an `AmbiguousShard` error.
    pub fn resolve_master(&self, key: Option<&ShardKey>) -> Result<Route<E>> {
        let shard = self.master_shard(key)?;
        Ok(Route {
            engine: Arc::clone(&self.masters()[shard]),
            role: Role::Master,
            shard,
        })
    }

    /// Master shard index for `key` without resolving the engine.
    pub fn master_shard(&self, key: Option<&ShardKey>) -> Result<usize> {
        match (self.master_count(), key) {
            (0, _) => Err(RouterError::NoEngine {
                identifier: self.identifier().clone(),
                role: Role::Master,
            }),
            (1, _) => Ok(0),
            (count, Some(key)) => Ok(key.shard_index(count)),
            (count, None) => Err(RouterError::AmbiguousShard {
                identifier: self.identifier().clone(),
                shard_count: count,
            }),
        }
    }

    /// Picks a slave for `key`, balancing unkeyed reads.
    ///
    /// Groups without slaves read from the master route instead.
    pub fn resolve_slave(&self, key: Option<&ShardKey>) -> Result<Route<E>> {
        let count = self.slave_count();
        if count == 0 {
            return self.resolve_master(key);
        }
        let shard = match key {
            _ if count == 1 => 0,
            Some(key) => key.shard_index(count),
            None => match self.balance() {
                SlaveBalance::RoundRobin => self.next_round_robin() % count,
                SlaveBalance::Random => rand::thread_rng().gen_range(0..count),
            },
        };
        Ok(Route {
            engine: Arc::clone(&self.slaves()[shard]),
            role: Role::Slave,
            shard,
        })
    }

    /// Every engine of `role` in index order.
    ///
    /// Slave fan-out on a group without slaves targets the masters.
    pub fn resolve_all(&self, role: Role) -> Vec<Route<E>> {
        let role = match role {
            Role::Slave if self.slave_count() == 0 => Role::Master,
            other => other,
        };
        self.engines(role)
            .iter()
            .enumerate()
            .map(|(shard, engine)| Route {
                engine: Arc::clone(engine),
                role,
                shard,
            })
            .collect()
    }
}

impl<E> EngineRegistry<E> {
    pub fn resolve_master(&self, obj: impl Identified, key: Option<&ShardKey>) -> Result<Route<E>> {
        self.group(obj)?.resolve_master(key)
    }

    pub fn resolve_slave(&self, obj: impl Identified, key: Option<&ShardKey>) -> Result<Route<E>> {
        self.group(obj)?.resolve_slave(key)
    }

    pub fn resolve_all_masters(&self, obj: impl Identified) -> Result<Vec<Route<E>>> {
        Ok(self.group(obj)?.resolve_all(Role::Master))
    }

    pub fn resolve_all_slaves(&self, obj: impl Identified) -> Result<Vec<Route<E>>> {
        Ok(self.group(obj)?.resolve_all(Role::Slave))
    }
}
