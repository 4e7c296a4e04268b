use super::{FindQuery, UpdateQuery};
use crate::core::{Identifier, Result, Role, RouterError};
use std::collections::BTreeMap;

/// Which replica role a fan-out read is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    #[default]
    Master,
    Slave,
}

impl ReadPolicy {
    pub fn role(self) -> Role {
        match self {
            Self::Master => Role::Master,
            Self::Slave => Role::Slave,
        }
    }
}

/// Per-shard query selection for fan-out operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardCondition<Q> {
    /// The same query on every engine of the role.
    Every(Q),
    /// Only the listed shard indices, each with its own query.
    PerShard(BTreeMap<usize, Q>),
}

impl<Q: Clone> ShardCondition<Q> {
    /// Expands the selection against `count` engines, in shard order.
    ///
    /// Fails with `ShardOutOfRange` if any listed index is `>= count`.
    pub fn plan(&self, identifier: &Identifier, role: Role, count: usize) -> Result<Vec<(usize, Q)>> {
        match self {
            Self::Every(query) => Ok((0..count).map(|shard| (shard, query.clone())).collect()),
            Self::PerShard(shards) => {
                if let Some((&shard, _)) = shards.iter().find(|(shard, _)| **shard >= count) {
                    return Err(RouterError::ShardOutOfRange {
                        identifier: identifier.clone(),
                        role,
                        shard,
                        count,
                    });
                }
                Ok(shards
                    .iter()
                    .map(|(shard, query)| (*shard, query.clone()))
                    .collect())
            }
        }
    }
}

impl<Q> Default for ShardCondition<Q> {
    fn default() -> Self {
        Self::PerShard(BTreeMap::new())
    }
}

impl<Q> ShardCondition<Q> {
    fn insert(&mut self, shard: usize, query: Q) {
        match self {
            Self::PerShard(shards) => {
                shards.insert(shard, query);
            }
            Self::Every(_) => {
                let mut shards = BTreeMap::new();
                shards.insert(shard, query);
                *self = Self::PerShard(shards);
            }
        }
    }
}

/// Fan-out read selection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindCondition {
    pub policy: ReadPolicy,
    pub target: ShardCondition<FindQuery>,
}

impl FindCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every(query: FindQuery) -> Self {
        Self {
            policy: ReadPolicy::Master,
            target: ShardCondition::Every(query),
        }
    }

    /// Sets the query for one shard; replaces an `every` selection.
    pub fn shard(mut self, shard: usize, query: FindQuery) -> Self {
        self.target.insert(shard, query);
        self
    }

    pub fn on_slaves(mut self) -> Self {
        self.policy = ReadPolicy::Slave;
        self
    }
}

/// Fan-out write selection. Always targets master shards.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UpdateCondition {
    pub target: ShardCondition<UpdateQuery>,
}

impl UpdateCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every(update: UpdateQuery) -> Self {
        Self {
            target: ShardCondition::Every(update),
        }
    }

    pub fn shard(mut self, shard: usize, update: UpdateQuery) -> Self {
        self.target.insert(shard, update);
        self
    }
}
