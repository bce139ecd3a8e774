use reqwest::StatusCode;
use std::sync::Arc;
use tokio::net::TcpListener;

use shingo_api::server::{build_router, AppState};
use shingo_api::types::{
    ApiResponse, ClaimRequest, ClaimResponse, HeartbeatRequest, RecordExecutionRequest,
    SignalResponse, SubmitSignalRequest, TradeResponse, TransitionRequest,
};
use shingo_core::common::RealTimeProvider;
use shingo_core::config::DispatchConfig;
use shingo_manager::dispatch::DispatchManager;
use shingo_store::queue::SqliteQueueStore;

const TEST_TOKEN: &str = "test-deploy-token";

// 帮助函数：在随机端口启动测试服务器
async fn spawn_test_server() -> (String, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    shingo_store::config::set_root_dir(tmp_dir.path().to_path_buf());

    let store = Arc::new(SqliteQueueStore::new().await.unwrap());
    let manager = DispatchManager::new(
        store.clone(),
        store.clone(),
        store.clone(),
        Arc::new(RealTimeProvider),
        DispatchConfig::default(),
    );

    let state = AppState {
        manager,
        api_token: Arc::new(TEST_TOKEN.to_string()),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let addr = format!("http://127.0.0.1:{}", port);

    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    // 稍微等待服务器启动
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    (addr, tmp_dir)
}

fn submit_body(alert_id: &str) -> SubmitSignalRequest {
    SubmitSignalRequest {
        alert_id: alert_id.to_string(),
        account_id: None,
        symbol: "EURUSD".to_string(),
        direction: "long".to_string(),
        order_type: "market".to_string(),
        priority: 5,
        payload: Some(serde_json::json!({"source": "webhook"})),
    }
}

#[tokio::test]
async fn test_api_full_workflow() {
    let (addr, _tmp) = spawn_test_server().await;
    let client = reqwest::Client::new();

    // 0. 健康检查无需鉴权
    let resp = client.get(format!("{}/healthz", addr)).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // 1. 未携带令牌的业务请求被拒绝
    let resp = client
        .post(format!("{}/api/v1/signals", addr))
        .json(&submit_body("tv-unauth"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // 2. 摄入信号；重复 alert_id 返回 409
    let resp = client
        .post(format!("{}/api/v1/signals", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&submit_body("tv-001"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ApiResponse<SignalResponse> = resp.json().await.unwrap();
    let signal = body.data.expect("signal payload");
    assert_eq!(signal.status, "pending");

    let resp = client
        .post(format!("{}/api/v1/signals", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&submit_body("tv-001"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // 非法 direction 在网关边界被拒绝
    let mut bad = submit_body("tv-bad");
    bad.direction = "sideways".to_string();
    let resp = client
        .post(format!("{}/api/v1/signals", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&bad)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // 3. Worker 认领；队列空时 data 为 null
    let resp = client
        .post(format!("{}/api/v1/worker/claim", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&ClaimRequest {
            worker_id: "worker-api".to_string(),
            account_id: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ApiResponse<ClaimResponse> = resp.json().await.unwrap();
    let claim = body.data.expect("claim payload");
    assert_eq!(claim.signal.id, signal.id);
    assert_eq!(claim.dispatch.retry_count, 0);

    let resp = client
        .post(format!("{}/api/v1/worker/claim", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&ClaimRequest {
            worker_id: "worker-api".to_string(),
            account_id: None,
        })
        .send()
        .await
        .unwrap();
    let body: ApiResponse<ClaimResponse> = resp.json().await.unwrap();
    assert!(body.data.is_none(), "empty queue claim must return null data");

    // 4. 心跳：持有者成功，冒名者 410
    let resp = client
        .post(format!(
            "{}/api/v1/worker/dispatches/{}/heartbeat",
            addr, claim.dispatch.id
        ))
        .bearer_auth(TEST_TOKEN)
        .json(&HeartbeatRequest {
            worker_id: "worker-api".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!(
            "{}/api/v1/worker/dispatches/{}/heartbeat",
            addr, claim.dispatch.id
        ))
        .bearer_auth(TEST_TOKEN)
        .json(&HeartbeatRequest {
            worker_id: "worker-imposter".to_string(),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::GONE);

    // 5. 状态迁移 claimed → processing；非法跳变被 409 拒绝
    let resp = client
        .post(format!("{}/api/v1/signals/{}/transition", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&TransitionRequest {
            status: "processing".to_string(),
            reason: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!("{}/api/v1/signals/{}/transition", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&TransitionRequest {
            status: "pending".to_string(),
            reason: None,
        })
        .send()
        .await
        .unwrap();
    // processing → pending 属于合法重排队；先验证合法路径后再测非法路径
    assert_eq!(resp.status(), StatusCode::OK);

    // pending → executed 是非法跳变
    let resp = client
        .post(format!("{}/api/v1/signals/{}/transition", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&TransitionRequest {
            status: "executed".to_string(),
            reason: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // 6. 重新认领并走完执行主线：claim → processing → 回报 → executed
    let resp = client
        .post(format!("{}/api/v1/worker/claim", addr))
        .bearer_auth(TEST_TOKEN)
        .json(&ClaimRequest {
            worker_id: "worker-api-2".to_string(),
            account_id: None,
        })
        .send()
        .await
        .unwrap();
    let body: ApiResponse<ClaimResponse> = resp.json().await.unwrap();
    let claim2 = body.data.expect("re-claim payload");
    assert_eq!(claim2.dispatch.retry_count, 1);

    let resp = client
        .post(format!("{}/api/v1/signals/{}/transition", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&TransitionRequest {
            status: "processing".to_string(),
            reason: None,
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let exec_req = RecordExecutionRequest {
        ticket: "tkt-77".to_string(),
        status: "filled".to_string(),
        price: Some("1.0901".to_string()),
        stop_loss: None,
        take_profit: None,
        payload: Some(serde_json::json!({"lots": 0.5})),
    };
    let resp = client
        .post(format!("{}/api/v1/worker/signals/{}/executions", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&exec_req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ApiResponse<TradeResponse> = resp.json().await.unwrap();
    let trade = body.data.expect("trade payload");
    assert_eq!(trade.ticket, "tkt-77");
    assert_eq!(trade.symbol, "EURUSD");

    // 重复回报幂等：同一行，不报错
    let resp = client
        .post(format!("{}/api/v1/worker/signals/{}/executions", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&exec_req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ApiResponse<TradeResponse> = resp.json().await.unwrap();
    assert_eq!(body.data.expect("trade payload").id, trade.id);

    let resp = client
        .post(format!("{}/api/v1/signals/{}/transition", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .json(&TransitionRequest {
            status: "executed".to_string(),
            reason: Some("bridge confirmed".to_string()),
        })
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: ApiResponse<SignalResponse> = resp.json().await.unwrap();
    assert_eq!(body.data.expect("signal payload").status, "executed");

    // 7. 运维视角核对：两条派发历史、一行成交
    let resp = client
        .get(format!("{}/api/v1/signals/{}/dispatches", addr, signal.id))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    let body: ApiResponse<Vec<shingo_api::types::DispatchResponse>> = resp.json().await.unwrap();
    let dispatches = body.data.expect("dispatch history");
    assert_eq!(dispatches.len(), 2);
    assert_eq!(dispatches[0].status, "failed");
    assert_eq!(dispatches[1].status, "completed");

    let resp = client
        .get(format!("{}/api/v1/trades?status=filled", addr))
        .bearer_auth(TEST_TOKEN)
        .send()
        .await
        .unwrap();
    let body: ApiResponse<Vec<TradeResponse>> = resp.json().await.unwrap();
    assert_eq!(body.data.expect("trades").len(), 1);
}
