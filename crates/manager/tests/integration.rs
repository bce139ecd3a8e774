use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::tempdir;

use shingo_core::common::FakeClockProvider;
use shingo_core::config::DispatchConfig;
use shingo_core::dispatch::entity::DispatchStatus;
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{
    AccountId, AlertId, Direction, NewSignal, OrderType, SignalId, SignalStatus,
};
use shingo_core::trade::entity::{ExecutionReport, ExecutionTicket, TradeStatus};
use shingo_core::trade::port::TradeFilter;
use shingo_manager::dispatch::{DispatchManager, ManagerError};
use shingo_manager::lease::LeaseMonitor;
use shingo_store::queue::SqliteQueueStore;

fn test_config() -> DispatchConfig {
    DispatchConfig {
        heartbeat_interval_secs: 20,
        lease_timeout_secs: 60,
        sweep_interval_secs: 10,
        max_retries: 3,
        default_account: "primary".to_string(),
    }
}

fn submit_req(alert: &str, symbol: &str, priority: i32) -> NewSignal {
    NewSignal {
        alert_id: AlertId(alert.to_string()),
        account_id: None,
        symbol: symbol.to_string(),
        direction: Direction::Long,
        order_type: OrderType::Market,
        priority,
        payload: serde_json::json!({"source": "tradingview"}),
    }
}

struct Harness {
    manager: Arc<DispatchManager>,
    monitor: Arc<LeaseMonitor>,
    clock: Arc<FakeClockProvider>,
}

async fn harness() -> Harness {
    let store = Arc::new(SqliteQueueStore::new().await.unwrap());
    let clock = Arc::new(FakeClockProvider::new(Utc::now()));

    let manager = DispatchManager::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
        test_config(),
    );
    let monitor = LeaseMonitor::new(store.clone(), clock.clone(), test_config());

    Harness {
        manager,
        monitor,
        clock,
    }
}

#[tokio::test]
async fn test_dispatch_lifecycle() {
    let tmp_dir = tempdir().unwrap();
    shingo_store::config::set_root_dir(tmp_dir.path().to_path_buf());
    let h = harness().await;

    // ---- 完整主线：提交 → A 认领失联 → 回收重排 → B 认领执行成功 ----

    // 1. 提交信号
    let signal = h
        .manager
        .submit(submit_req("tv-001", "EURUSD", 5))
        .await
        .unwrap();
    assert_eq!(signal.status, SignalStatus::Pending);

    // 2. Worker-A 认领，retry_count = 0
    let claim_a = h.manager.claim("worker-a", None).await.unwrap().unwrap();
    assert_eq!(claim_a.signal.status, SignalStatus::Claimed);
    assert_eq!(claim_a.dispatch.retry_count, 0);

    // 3. A 心跳两次后停止 (进程崩溃)
    h.clock.advance(Duration::seconds(20));
    h.manager
        .heartbeat(&claim_a.dispatch.id, "worker-a")
        .await
        .unwrap();
    h.clock.advance(Duration::seconds(20));
    h.manager
        .heartbeat(&claim_a.dispatch.id, "worker-a")
        .await
        .unwrap();

    // 租约尚未过期：此时扫描不应有任何回收
    let sweep = h.monitor.sweep_once().await.unwrap();
    assert!(sweep.is_empty());

    // 4. 越过租约阈值后，监视器把信号重新排队
    h.clock.advance(Duration::seconds(61));
    let sweep = h.monitor.sweep_once().await.unwrap();
    assert_eq!(sweep.len(), 1);
    assert!(!sweep[0].exhausted);

    let requeued = h.manager.get_signal(&signal.id).await.unwrap();
    assert_eq!(requeued.status, SignalStatus::Pending);

    // 失联的 A 此刻再心跳：租约已被回收，必须被拒绝并停手
    let zombie = h.manager.heartbeat(&claim_a.dispatch.id, "worker-a").await;
    assert!(matches!(
        zombie,
        Err(ManagerError::Queue(QueueError::LeaseExpired(_)))
    ));

    // 5. Worker-B 重新认领，retry_count 递增为 1
    let claim_b = h.manager.claim("worker-b", None).await.unwrap().unwrap();
    assert_eq!(claim_b.dispatch.retry_count, 1);

    // 6. B 上报 processing 并执行成交
    h.manager
        .transition(&signal.id, SignalStatus::Processing, None)
        .await
        .unwrap();

    let report = ExecutionReport {
        ticket: ExecutionTicket("tkt-77".into()),
        status: TradeStatus::Filled,
        price: Some(rust_decimal_macros::dec!(1.0901)),
        stop_loss: None,
        take_profit: None,
        payload: serde_json::json!({"lots": 0.5}),
    };
    let trade = h
        .manager
        .record_execution(&signal.id, report.clone())
        .await
        .unwrap();
    assert_eq!(trade.symbol, "EURUSD");
    assert_eq!(trade.direction, Direction::Long);
    // 无路由信号记账到默认账户
    assert_eq!(trade.account_id, AccountId("primary".into()));

    // 网络超时重试的重复回报：纯 no-op
    let trade2 = h
        .manager
        .record_execution(&signal.id, report)
        .await
        .unwrap();
    assert_eq!(trade2.id, trade.id);

    let executed = h
        .manager
        .transition(&signal.id, SignalStatus::Executed, None)
        .await
        .unwrap();
    assert_eq!(executed.status, SignalStatus::Executed);

    // 7. 终局核对：两条派发 (failed + completed)，一行成交
    let dispatches = h.manager.list_dispatches(&signal.id).await.unwrap();
    assert_eq!(dispatches.len(), 2);
    assert_eq!(dispatches[0].status, DispatchStatus::Failed);
    assert_eq!(dispatches[1].status, DispatchStatus::Completed);

    let trades = h.manager.query_trades(&TradeFilter::default()).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].ticket.0, "tkt-77");

    // ---- 撤销是非抢占的：持有者在下一次心跳时才发现 ----

    let cancellable = h
        .manager
        .submit(submit_req("tv-002", "GBPUSD", 1))
        .await
        .unwrap();
    let claim_c = h.manager.claim("worker-c", None).await.unwrap().unwrap();
    assert_eq!(claim_c.signal.id, cancellable.id);

    let cancelled = h
        .manager
        .transition(&cancellable.id, SignalStatus::Cancelled, Some("operator abort".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, SignalStatus::Cancelled);

    // 撤销不打断在途认领，但持有者的下一次心跳被拒绝
    let rejected = h.manager.heartbeat(&claim_c.dispatch.id, "worker-c").await;
    assert!(matches!(
        rejected,
        Err(ManagerError::Queue(QueueError::LeaseExpired(_)))
    ));

    // ---- 空队列认领立即返回空 ----
    let none = h.manager.claim("worker-idle", None).await.unwrap();
    assert!(none.is_none());

    // ---- 对账防御：未认领/不存在的信号引用被拒绝 ----

    let unclaimed = h
        .manager
        .submit(submit_req("tv-003", "USDJPY", 1))
        .await
        .unwrap();
    let report = ExecutionReport {
        ticket: ExecutionTicket("tkt-88".into()),
        status: TradeStatus::Filled,
        price: None,
        stop_loss: None,
        take_profit: None,
        payload: serde_json::json!({}),
    };
    let err = h.manager.record_execution(&unclaimed.id, report.clone()).await;
    assert!(matches!(
        err,
        Err(ManagerError::Queue(QueueError::Conflict(_)))
    ));

    let err = h
        .manager
        .record_execution(&SignalId("no-such-signal".into()), report)
        .await;
    assert!(matches!(
        err,
        Err(ManagerError::Queue(QueueError::NotFound(_)))
    ));
}

/// 后台定时器路径：内存存储 + 真实 tokio interval 驱动的自动回收。
#[tokio::test]
async fn test_lease_monitor_background_sweep() {
    use shingo_store::mem::MemoryQueueStore;
    use tokio::time::{sleep, Duration as TokioDuration};

    let store = Arc::new(MemoryQueueStore::new());
    let clock = Arc::new(FakeClockProvider::new(Utc::now()));
    let mut config = test_config();
    config.sweep_interval_secs = 1;

    let manager = DispatchManager::new(
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
        config.clone(),
    );
    let monitor = LeaseMonitor::new(store.clone(), clock.clone(), config);

    let signal = manager
        .submit(submit_req("tv-bg", "EURUSD", 1))
        .await
        .unwrap();
    let claim = manager.claim("worker-bg", None).await.unwrap().unwrap();
    assert_eq!(claim.dispatch.retry_count, 0);

    // 拨过租约阈值后再启动监视器，下一个 tick 即应完成回收
    clock.advance(Duration::seconds(120));
    let handle = monitor.spawn();

    sleep(TokioDuration::from_millis(1500)).await;
    handle.abort();

    let requeued = manager.get_signal(&signal.id).await.unwrap();
    assert_eq!(requeued.status, SignalStatus::Pending);

    let claim2 = manager.claim("worker-bg2", None).await.unwrap().unwrap();
    assert_eq!(claim2.dispatch.retry_count, 1);
}
