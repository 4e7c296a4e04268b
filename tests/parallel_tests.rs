/// Parallel fan-out tests
///
/// find/count/update across every shard of an identifier.
/// Run with: cargo test --test parallel_tests

mod common;

use common::{orders_router, row};
use shardwizard::memory::{MemoryOp, MemoryRow, row_order};
use shardwizard::query::{
    Filter, FindCondition, FindQuery, OrderBy, ReadPolicy, UpdateCondition, UpdateQuery,
};
use shardwizard::{Result, RouterError, Value};
use std::time::Duration;

fn id_of(row: MemoryRow) -> Result<i64> {
    row.get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| RouterError::TypeMismatch("id is not an integer".to_string()))
}

async fn seed_ids(engine: &shardwizard::memory::MemoryEngine, ids: &[i64]) {
    engine
        .seed("orders", ids.iter().map(|id| row(*id, "open")))
        .await;
}

#[tokio::test]
async fn test_find_parallel_merges_shards_in_order() {
    let (router, masters, _) = orders_router(3, 0);
    seed_ids(&masters[0], &[7, 1, 4]).await;
    seed_ids(&masters[1], &[5, 2]).await;
    seed_ids(&masters[2], &[9, 3, 8, 6]).await;

    let query = FindQuery::table("orders").order_by(OrderBy::asc("id"));
    let ids = router
        .find_parallel("orders", ReadPolicy::Master, query, id_of, |a, b| a.cmp(b))
        .await
        .unwrap();

    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    assert!(masters.iter().all(|m| m.stats().finds == 1));
    assert!(masters.iter().all(|m| m.stats().open_sessions() == 0));
}

#[tokio::test]
async fn test_find_parallel_descending_on_slaves() {
    let (router, masters, slaves) = orders_router(1, 2);
    seed_ids(&slaves[0], &[1, 5]).await;
    seed_ids(&slaves[1], &[4, 2, 3]).await;

    let query = FindQuery::table("orders").order_by(OrderBy::desc("id"));
    let ids = router
        .find_parallel("orders", ReadPolicy::Slave, query, id_of, |a, b| b.cmp(a))
        .await
        .unwrap();

    assert_eq!(ids, vec![5, 4, 3, 2, 1]);
    assert_eq!(masters[0].stats().finds, 0);
}

#[tokio::test]
async fn test_find_parallel_rows_with_matching_comparator() {
    let (router, masters, _) = orders_router(2, 0);
    masters[0]
        .seed("orders", [row(1, "paid"), row(2, "open"), row(5, "open")])
        .await;
    masters[1].seed("orders", [row(3, "open"), row(4, "paid")]).await;

    let query = FindQuery::table("orders")
        .order_by(OrderBy::asc("status"))
        .order_by(OrderBy::asc("id"));
    let compare = row_order(query.order_by.clone());
    let rows = router
        .find_parallel("orders", ReadPolicy::Master, query, |row| Ok(row), compare)
        .await
        .unwrap();

    let ids: Vec<i64> = rows.iter().filter_map(|r| r["id"].as_i64()).collect();
    assert_eq!(ids, vec![2, 3, 5, 1, 4]);
}

#[tokio::test]
async fn test_find_parallel_by_condition_per_shard_queries() {
    let (router, masters, _) = orders_router(3, 0);
    seed_ids(&masters[0], &[1, 2, 3]).await;
    seed_ids(&masters[1], &[4, 5]).await;
    seed_ids(&masters[2], &[6, 7, 8]).await;

    let condition = FindCondition::new()
        .shard(2, FindQuery::table("orders").filter(Filter::gt("id", 6)))
        .shard(0, FindQuery::table("orders").filter(Filter::lt("id", 3)));
    let ids = router
        .find_parallel_by_condition("orders", condition, id_of)
        .await
        .unwrap();

    // concatenated in shard order, shard 1 skipped
    assert_eq!(ids, vec![1, 2, 7, 8]);
    assert_eq!(masters[1].stats().sessions_opened, 0);
}

#[tokio::test]
async fn test_count_parallel_reports_zero_for_skipped_shards() {
    let (router, masters, _) = orders_router(3, 0);
    seed_ids(&masters[0], &(0..10).collect::<Vec<_>>()).await;
    seed_ids(&masters[1], &(10..15).collect::<Vec<_>>()).await;
    seed_ids(&masters[2], &(20..27).collect::<Vec<_>>()).await;

    let all = FindQuery::table("orders");
    let condition = FindCondition::new().shard(0, all.clone()).shard(2, all);
    let counts = router
        .count_parallel_by_condition("orders", condition)
        .await
        .unwrap();

    assert_eq!(counts, vec![10, 0, 7]);
    assert_eq!(masters[1].stats().counts, 0);
}

#[tokio::test]
async fn test_condition_outside_shard_range_is_rejected() {
    let (router, masters, _) = orders_router(2, 0);

    let condition = FindCondition::new().shard(5, FindQuery::table("orders"));
    let err = router
        .count_parallel_by_condition("orders", condition)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::ShardOutOfRange { shard: 5, count: 2, .. }));
    assert!(masters.iter().all(|m| m.stats().total_calls() == 0));
}

#[tokio::test]
async fn test_update_parallel_sums_affected_rows() {
    let (router, masters, _) = orders_router(3, 0);
    router.set_auto_transaction("orders", true).unwrap();
    seed_ids(&masters[0], &[1, 2]).await;
    seed_ids(&masters[1], &[3]).await;
    seed_ids(&masters[2], &[4, 5, 6]).await;

    let update = UpdateQuery::table("orders").set("status", "archived");
    let affected = router
        .update_parallel_by_condition("orders", UpdateCondition::every(update))
        .await
        .unwrap();

    assert_eq!(affected, 6);
    for master in &masters {
        let stats = master.stats();
        assert_eq!((stats.begins, stats.commits, stats.rollbacks), (1, 1, 0));
        assert!(
            master
                .rows("orders")
                .await
                .iter()
                .all(|r| r["status"] == Value::from("archived"))
        );
    }
}

#[tokio::test]
async fn test_update_parallel_failure_cancels_other_shards() {
    let (router, masters, _) = orders_router(3, 0);
    for master in &masters {
        seed_ids(master, &[1]).await;
        master.set_latency(Some(Duration::from_millis(200))).await;
    }
    masters[2].set_latency(None).await;
    masters[2].fail_next(MemoryOp::Update, "disk full").await;

    let update = UpdateQuery::table("orders").set("status", "archived");
    let err = router
        .update_parallel_by_condition("orders", UpdateCondition::every(update))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "m2: disk full");
    assert!(matches!(err, RouterError::Backend(_)));

    // the slower shards were aborted before their update ran
    tokio::time::sleep(Duration::from_millis(400)).await;
    for master in &masters {
        let rows = master.rows("orders").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["status"], Value::from("open"));
        assert_eq!(master.stats().open_sessions(), 0);
    }
}

#[tokio::test]
async fn test_update_parallel_on_read_only_identifier() {
    let (router, masters, _) = orders_router(3, 0);
    router.read_only("orders", true).unwrap();

    let update = UpdateQuery::table("orders").set("status", "archived");
    let err = router
        .update_parallel_by_condition("orders", UpdateCondition::every(update))
        .await
        .unwrap_err();

    assert!(err.is_read_only());
    assert!(masters.iter().all(|m| m.stats().total_calls() == 0));
}

#[tokio::test]
async fn test_fan_out_does_not_join_scope_transaction() {
    let (router, masters, _) = orders_router(1, 0);
    let mut scope = router.scope();
    let tx = router.transaction(&mut scope, "orders").await.unwrap();
    tx.lock().await.insert("orders", row(1, "open")).await.unwrap();

    let counts = router
        .count_parallel_by_condition("orders", FindCondition::every(FindQuery::table("orders")))
        .await
        .unwrap();
    assert_eq!(counts, vec![0]);

    router.commit_all(&mut scope, "orders").await.unwrap();
    assert_eq!(masters[0].rows("orders").await.len(), 1);
}
