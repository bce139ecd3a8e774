use chrono::Utc;
use shingo_core::dispatch::port::DispatchLedger;
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{AccountId, AlertId, Direction, NewSignal, OrderType, SignalStatus};
use shingo_core::signal::port::{SignalFilter, SignalStore};
use shingo_core::trade::entity::{ExecutionReport, ExecutionTicket, SignalSnapshot, TradeStatus};
use shingo_core::trade::port::TradeLedger;
use shingo_store::config::set_root_dir;
use shingo_store::queue::SqliteQueueStore;
use std::sync::Arc;
use tempfile::tempdir;

fn new_signal(alert: &str, account: Option<&str>, priority: i32) -> NewSignal {
    NewSignal {
        alert_id: AlertId(alert.to_string()),
        account_id: account.map(|a| AccountId(a.to_string())),
        symbol: "EURUSD".to_string(),
        direction: Direction::Long,
        order_type: OrderType::Market,
        priority,
        payload: serde_json::json!({"source": "test"}),
    }
}

#[tokio::test]
async fn test_queue_full_integration() {
    // 1. 初始化临时测试环境
    let tmp_dir = tempdir().expect("Failed to create temp dir");
    set_root_dir(tmp_dir.path().to_path_buf());
    let store = Arc::new(SqliteQueueStore::new().await.expect("Failed to create queue store"));

    // 2. 幂等摄入：同一 alert_id 第二次提交必须冲突，且只落一行
    let now = Utc::now();
    let first = store.insert(&new_signal("tv-dup", Some("acct-ing"), 1), now).await.unwrap();
    assert_eq!(first.status, SignalStatus::Pending);

    let dup = store.insert(&new_signal("tv-dup", Some("acct-ing"), 1), now).await;
    assert!(matches!(dup, Err(QueueError::Conflict(_))));

    let stored = store
        .query_signals(&SignalFilter {
            account_id: Some(AccountId("acct-ing".into())),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);

    // 3. 优先级决胜：相同可见时间下高优先级先出队
    let now = Utc::now();
    store.insert(&new_signal("tv-p5", Some("acct-prio"), 5), now).await.unwrap();
    store.insert(&new_signal("tv-p10", Some("acct-prio"), 10), now).await.unwrap();

    let route = AccountId("acct-prio".into());
    let claim1 = store
        .claim_next("worker-a", Some(&route), Utc::now())
        .await
        .unwrap()
        .expect("Should claim the priority-10 signal");
    assert_eq!(claim1.signal.alert_id.0, "tv-p10");
    assert_eq!(claim1.signal.status, SignalStatus::Claimed);
    assert_eq!(claim1.dispatch.retry_count, 0);
    assert!(claim1.signal.acknowledged_at.is_some());

    let claim2 = store
        .claim_next("worker-a", Some(&route), Utc::now())
        .await
        .unwrap()
        .expect("Should claim the priority-5 signal");
    assert_eq!(claim2.signal.alert_id.0, "tv-p5");

    // 队列已空：立即返回空而不是阻塞
    let empty = store.claim_next("worker-a", Some(&route), Utc::now()).await.unwrap();
    assert!(empty.is_none());

    // 4. 并发认领唯一性：8 个并发调用只有一个能拿到同一条信号
    store.insert(&new_signal("tv-conc", Some("acct-conc"), 1), Utc::now()).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let route = AccountId("acct-conc".into());
            store
                .claim_next(&format!("worker-{}", i), Some(&route), Utc::now())
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "Exactly one concurrent claimer may win");

    // 5. 状态机：合法主路径 + 幂等重放 + 非法跳变
    store.insert(&new_signal("tv-sm", Some("acct-sm"), 1), Utc::now()).await.unwrap();
    let route = AccountId("acct-sm".into());
    let claim = store
        .claim_next("worker-sm", Some(&route), Utc::now())
        .await
        .unwrap()
        .unwrap();
    let sid = claim.signal.id.clone();

    let sig = store
        .transition(&sid, SignalStatus::Processing, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(sig.status, SignalStatus::Processing);

    let sig = store
        .transition(&sid, SignalStatus::Executed, Some("filled by broker"), Utc::now())
        .await
        .unwrap();
    assert_eq!(sig.status, SignalStatus::Executed);
    let executed_at = sig.executed_at.expect("executed_at must be stamped");

    // 幂等重放：第二次 executed 成功且不改写 executed_at
    let replay = store
        .transition(&sid, SignalStatus::Executed, None, Utc::now())
        .await
        .unwrap();
    assert_eq!(replay.executed_at, Some(executed_at));

    // 级联：执行成功后活动派发应当是 completed
    let dispatches = store.list_for_signal(&sid).await.unwrap();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(
        dispatches[0].status,
        shingo_core::dispatch::entity::DispatchStatus::Completed
    );

    // 非法跳变：pending 直接 executed 必须被拒绝
    let fresh = store.insert(&new_signal("tv-illegal", Some("acct-sm"), 1), Utc::now()).await.unwrap();
    let err = store
        .transition(&fresh.id, SignalStatus::Executed, None, Utc::now())
        .await;
    assert!(matches!(err, Err(QueueError::Conflict(_))));

    // 6. 成交台账幂等：同票据重复回报只有一行，第二次不报错
    let snapshot = SignalSnapshot {
        symbol: "EURUSD".into(),
        direction: Direction::Long,
        order_type: OrderType::Market,
    };
    let report = ExecutionReport {
        ticket: ExecutionTicket("tkt-77".into()),
        status: TradeStatus::Filled,
        price: Some(rust_decimal_macros::dec!(1.0852)),
        stop_loss: None,
        take_profit: None,
        payload: serde_json::json!({"fill": "full"}),
    };
    let account = AccountId("acct-sm".into());

    let trade1 = store.upsert(&sid, &account, &snapshot, &report, Utc::now()).await.unwrap();
    let trade2 = store.upsert(&sid, &account, &snapshot, &report, Utc::now()).await.unwrap();
    assert_eq!(trade1.id, trade2.id);
    assert_eq!(trade2.status, TradeStatus::Filled);
    assert_eq!(trade2.filled_at, trade1.filled_at);

    let by_ticket = store
        .get_by_ticket(&ExecutionTicket("tkt-77".into()))
        .await
        .unwrap()
        .expect("Trade should exist");
    assert_eq!(by_ticket.symbol, "EURUSD");

    // 同票据挂到另一条信号上：票据冲突
    let other = store.insert(&new_signal("tv-other", Some("acct-sm"), 1), Utc::now()).await.unwrap();
    let clash = store.upsert(&other.id, &account, &snapshot, &report, Utc::now()).await;
    assert!(matches!(clash, Err(QueueError::Conflict(_))));
}
