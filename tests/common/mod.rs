#![allow(dead_code)]

use shardwizard::memory::{MemoryEngine, MemoryRow};
use shardwizard::{Identified, Identifier, Router, ShardKey, Value};

/// Keyed record routed to the "orders" group by id.
pub struct Order {
    pub id: i64,
}

impl Identified for Order {
    fn identifier(&self) -> Identifier {
        Identifier::new("orders")
    }

    fn shard_key(&self) -> Option<ShardKey> {
        Some(ShardKey::Int(self.id))
    }
}

pub fn row(id: i64, status: &str) -> MemoryRow {
    MemoryRow::from([
        ("id".to_string(), Value::Integer(id)),
        ("status".to_string(), Value::from(status)),
    ])
}

pub fn engines(prefix: &str, count: usize) -> Vec<MemoryEngine> {
    (0..count)
        .map(|index| MemoryEngine::new(format!("{}{}", prefix, index)))
        .collect()
}

/// Router with "orders" on `shards` masters (m0, m1, ...) and `replicas`
/// slaves (s0, s1, ...). Returns the engines for inspection.
pub fn orders_router(
    shards: usize,
    replicas: usize,
) -> (Router<MemoryEngine>, Vec<MemoryEngine>, Vec<MemoryEngine>) {
    let router = Router::new();
    let masters = engines("m", shards);
    let slaves = engines("s", replicas);
    router
        .register_group("orders", masters.clone(), slaves.clone())
        .unwrap();
    (router, masters, slaves)
}

/// Router with a single-master "users" group.
pub fn users_router(auto_transaction: bool) -> (Router<MemoryEngine>, MemoryEngine) {
    let router = Router::new();
    let engine = MemoryEngine::new("users-0");
    router
        .register_group("users", vec![engine.clone()], Vec::new())
        .unwrap();
    router.set_auto_transaction("users", auto_transaction).unwrap();
    (router, engine)
}
