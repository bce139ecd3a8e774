use chrono::{Duration, Utc};
use shingo_core::dispatch::port::DispatchLedger;
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{AccountId, AlertId, Direction, NewSignal, OrderType, SignalStatus};
use shingo_core::signal::port::SignalStore;
use shingo_store::config::set_root_dir;
use shingo_store::queue::SqliteQueueStore;
use tempfile::tempdir;

const MAX_RETRIES: i32 = 2;

#[tokio::test]
async fn test_lease_reclaim_and_retry_ceiling() {
    let tmp_dir = tempdir().expect("Failed to create temp dir");
    set_root_dir(tmp_dir.path().to_path_buf());
    let store = SqliteQueueStore::new().await.expect("Failed to create queue store");

    // 时间全部显式传入，租约过期无需真实等待
    let t0 = Utc::now();
    let lease = Duration::seconds(60);

    let new = NewSignal {
        alert_id: AlertId("tv-lease".into()),
        account_id: Some(AccountId("acct-lease".into())),
        symbol: "XAUUSD".into(),
        direction: Direction::Short,
        order_type: OrderType::Market,
        priority: 5,
        payload: serde_json::json!({}),
    };
    let signal = store.insert(&new, t0).await.unwrap();
    let route = AccountId("acct-lease".into());

    // 1. worker-a 认领并心跳两次后失联
    let claim_a = store.claim_next("worker-a", Some(&route), t0).await.unwrap().unwrap();
    assert_eq!(claim_a.dispatch.retry_count, 0);

    store
        .heartbeat(&claim_a.dispatch.id, "worker-a", t0 + Duration::seconds(20))
        .await
        .unwrap();
    store
        .heartbeat(&claim_a.dispatch.id, "worker-a", t0 + Duration::seconds(40))
        .await
        .unwrap();

    // 心跳尚新：t0+90 的扫描 (deadline = t0+30) 不应回收
    let sweep = store
        .reclaim_expired(t0 + Duration::seconds(90) - lease, MAX_RETRIES, t0 + Duration::seconds(90))
        .await
        .unwrap();
    assert!(sweep.is_empty());

    // 最后心跳停在 t0+40：t0+101 的扫描越过租约阈值，信号必须被重新排队
    let sweep_at = t0 + Duration::seconds(101);
    let reclaimed = store
        .reclaim_expired(sweep_at - lease, MAX_RETRIES, sweep_at)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert!(!reclaimed[0].exhausted);

    let requeued = store.get_signal(&signal.id).await.unwrap();
    assert_eq!(requeued.status, SignalStatus::Pending);

    // 重复扫描是 no-op (多实例并发安全)
    let again = store
        .reclaim_expired(sweep_at - lease, MAX_RETRIES, sweep_at)
        .await
        .unwrap();
    assert!(again.is_empty());

    // 2. 失联 worker-a 的僵尸心跳被拒绝：它已不再持有租约
    let zombie = store
        .heartbeat(&claim_a.dispatch.id, "worker-a", sweep_at)
        .await;
    assert!(matches!(zombie, Err(QueueError::LeaseExpired(_))));

    // 3. worker-b 重新认领，重试序号递增
    let claim_b = store
        .claim_next("worker-b", Some(&route), sweep_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim_b.dispatch.retry_count, 1);

    // 4. 连续失联直至重试上限：第 MAX_RETRIES+1 次过期落入终态 failed
    let sweep2_at = sweep_at + Duration::seconds(200);
    let reclaimed = store
        .reclaim_expired(sweep2_at - lease, MAX_RETRIES, sweep2_at)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert!(!reclaimed[0].exhausted, "retry 2 of 2 may still requeue");

    let claim_c = store
        .claim_next("worker-c", Some(&route), sweep2_at)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim_c.dispatch.retry_count, 2);

    let sweep3_at = sweep2_at + Duration::seconds(200);
    let reclaimed = store
        .reclaim_expired(sweep3_at - lease, MAX_RETRIES, sweep3_at)
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert!(reclaimed[0].exhausted, "retry 3 exceeds the ceiling of 2");

    let dead = store.get_signal(&signal.id).await.unwrap();
    assert_eq!(dead.status, SignalStatus::Failed);

    // 终态信号不再可认领
    let none = store.claim_next("worker-d", Some(&route), sweep3_at).await.unwrap();
    assert!(none.is_none());

    // 派发史：3 次尝试全部留痕，序号 0/1/2
    let history = store.list_for_signal(&signal.id).await.unwrap();
    assert_eq!(history.len(), 3);
    let counts: Vec<i32> = history.iter().map(|d| d.retry_count).collect();
    assert_eq!(counts, vec![0, 1, 2]);
}
