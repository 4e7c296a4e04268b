/// Routing tests
///
/// Engine registration, master/slave resolution and health checks.
/// Run with: cargo test --test routing_tests

mod common;

use common::{Order, orders_router};
use shardwizard::memory::{MemoryEngine, MemoryOp};
use shardwizard::{Engine, Router, RouterError, ShardKey, SlaveBalance, EngineGroup, Identifier};

#[tokio::test]
async fn test_master_resolution_is_deterministic() {
    let (router, _, _) = orders_router(3, 0);

    for _ in 0..5 {
        let engine = router.master(&Order { id: 5 }).unwrap();
        assert_eq!(engine.name(), "m2");
    }
    assert_eq!(router.master(&Order { id: 6 }).unwrap().name(), "m0");
    assert_eq!(
        router
            .master_by_key("orders", Some(ShardKey::Int(7)))
            .unwrap()
            .name(),
        "m1"
    );

    let text_key = Some(ShardKey::from("customer-42"));
    let first = router.master_by_key("orders", text_key.clone()).unwrap();
    let second = router.master_by_key("orders", text_key).unwrap();
    assert_eq!(first.name(), second.name());
}

#[tokio::test]
async fn test_unkeyed_master_with_many_shards_is_ambiguous() {
    let (router, masters, _) = orders_router(3, 0);

    let err = router.master("orders").unwrap_err();
    assert!(err.is_ambiguous_shard());
    assert!(matches!(err, RouterError::AmbiguousShard { shard_count: 3, .. }));

    let mut scope = router.scope();
    let err = router.transaction(&mut scope, "orders").await.unwrap_err();
    assert!(err.is_ambiguous_shard());
    assert!(masters.iter().all(|m| m.stats().sessions_opened == 0));
}

#[tokio::test]
async fn test_single_master_ignores_key() {
    let (router, _, _) = orders_router(1, 0);
    assert_eq!(router.master("orders").unwrap().name(), "m0");
    assert_eq!(router.master(&Order { id: 99 }).unwrap().name(), "m0");
}

#[tokio::test]
async fn test_unknown_identifier() {
    let (router, _, _) = orders_router(1, 0);
    let err = router.master("invoices").unwrap_err();
    assert!(err.is_unknown_identifier());
    assert!(router.is_read_only("invoices").is_err());
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let (router, _, _) = orders_router(1, 0);
    let err = router
        .register_group("orders", vec![MemoryEngine::new("other")], Vec::new())
        .unwrap_err();
    assert!(matches!(err, RouterError::DuplicateIdentifier(_)));

    let err = router
        .register_group("empty", Vec::new(), Vec::new())
        .unwrap_err();
    assert!(matches!(err, RouterError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_unkeyed_slave_reads_round_robin() {
    let (router, _, _) = orders_router(2, 2);

    let names: Vec<String> = (0..4)
        .map(|_| router.slave("orders").unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["s0", "s1", "s0", "s1"]);

    // keyed reads hash onto the replica set
    assert_eq!(router.slave(&Order { id: 3 }).unwrap().name(), "s1");
}

#[tokio::test]
async fn test_random_balance_stays_in_range() {
    let router: Router<MemoryEngine> = Router::new();
    let group = EngineGroup::new(
        Identifier::new("orders"),
        vec![MemoryEngine::new("m0")],
        vec![MemoryEngine::new("s0"), MemoryEngine::new("s1"), MemoryEngine::new("s2")],
    )
    .with_balance(SlaveBalance::Random);
    router.registry().register(group).unwrap();

    for _ in 0..20 {
        let name = router.slave("orders").unwrap().name().to_string();
        assert!(["s0", "s1", "s2"].contains(&name.as_str()));
    }
}

#[tokio::test]
async fn test_slave_falls_back_to_master() {
    let (router, _, _) = orders_router(2, 0);
    assert_eq!(router.slave(&Order { id: 1 }).unwrap().name(), "m1");
    assert!(router.slaves("orders").unwrap().is_empty());
    assert_eq!(router.masters("orders").unwrap().len(), 2);
}

#[tokio::test]
async fn test_flags_are_per_identifier() {
    let (router, _, _) = orders_router(1, 0);
    router
        .register_group("users", vec![MemoryEngine::new("u0")], Vec::new())
        .unwrap();

    router.read_only("orders", true).unwrap();
    router.set_auto_transaction("users", true).unwrap();

    assert!(router.is_read_only("orders").unwrap());
    assert!(!router.is_read_only("users").unwrap());
    assert!(router.is_auto_transaction("users").unwrap());
    assert!(!router.is_auto_transaction("orders").unwrap());
}

#[tokio::test]
async fn test_flag_writes_visible_to_concurrent_readers() {
    let (router, _, _) = orders_router(1, 0);

    let mut readers = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..100 {
                router.is_read_only("orders").unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    router.read_only("orders", true).unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert!(router.is_read_only("orders").unwrap());
}

#[tokio::test]
async fn test_ping() {
    let (router, masters, slaves) = orders_router(2, 1);
    router.ping("orders").await.unwrap();
    assert!(masters.iter().chain(&slaves).all(|e| e.stats().pings == 1));

    slaves[0].fail_next(MemoryOp::Ping, "replica down").await;
    let err = router.ping_all().await.unwrap_err();
    assert_eq!(err.to_string(), "s0: replica down");
}
