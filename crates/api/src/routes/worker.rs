//! # Worker 路由控制器
//!
//! 实现 `/api/v1/worker` 路径下的 REST 接口：
//! 认领、心跳续租与执行回报对账。所有执行 Worker 只经由这三个入口
//! 与调度队列交互，彼此之间从不直接通信。

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{
    ApiResponse, ClaimRequest, ClaimResponse, DispatchResponse, HeartbeatRequest,
    RecordExecutionRequest, SignalResponse, TradeResponse,
};
use shingo_core::dispatch::entity::DispatchId;
use shingo_core::signal::entity::{AccountId, SignalId};
use shingo_core::trade::entity::{ExecutionReport, ExecutionTicket, TradeStatus};

fn parse_price(raw: &Option<String>, field: &str) -> Result<Option<Decimal>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => Decimal::from_str(s)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(format!("{} 不是合法的十进制数: {}", field, e))),
    }
}

/// 认领下一条可执行信号
///
/// 原子地选出最高优先级、最早可见的 pending 信号并置为 claimed，
/// 同时追加一条派发记录。两个并发调用绝不会拿到同一条信号。
/// 队列为空时立即返回空载荷 (data = null)；退避轮询是 Worker 的职责，
/// 本接口从不阻塞等待。
#[utoipa::path(
    post,
    path = "/api/v1/worker/claim",
    tag = "执行 (Worker)",
    security(("bearer_token" = [])),
    request_body = ClaimRequest,
    responses(
        (status = 200, description = "认领成功或队列为空", body = ApiResponse<ClaimResponse>),
        (status = 400, description = "请求参数错误"),
        (status = 401, description = "未认证")
    )
)]
pub async fn claim(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ApiResponse<ClaimResponse>>, ApiError> {
    if req.worker_id.trim().is_empty() {
        return Err(ApiError::BadRequest("worker_id must not be empty".into()));
    }

    let claim = state
        .manager
        .claim(&req.worker_id, req.account_id.map(AccountId))
        .await?;

    match claim {
        Some(c) => Ok(Json(ApiResponse::ok(ClaimResponse {
            signal: SignalResponse::from(&c.signal),
            dispatch: DispatchResponse::from(&c.dispatch),
            heartbeat_interval_secs: state.manager.config().heartbeat_interval_secs,
        }))),
        None => Ok(Json(ApiResponse::empty())),
    }
}

/// 心跳续租
///
/// 持有认领的 Worker 必须按固定间隔调用，刷新信号与派发的租约。
/// 租约已被监视器回收或 Worker 身份不符时返回 410，
/// 调用方必须立刻停止处理该信号 (它已被重新排队给其他 Worker)。
#[utoipa::path(
    post,
    path = "/api/v1/worker/dispatches/{id}/heartbeat",
    tag = "执行 (Worker)",
    security(("bearer_token" = [])),
    params(
        ("id" = String, Path, description = "派发记录 ID")
    ),
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "续租成功", body = ApiResponse<String>),
        (status = 404, description = "派发不存在"),
        (status = 410, description = "租约已被回收"),
        (status = 401, description = "未认证")
    )
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    state
        .manager
        .heartbeat(&DispatchId(id), &req.worker_id)
        .await?;
    Ok(Json(ApiResponse::ok("ok".to_string())))
}

/// 上报执行回报 (Trade Reconciler)
///
/// 以 `ticket` 为幂等键落账：同票据的重复回报就地更新而不产生重复行，
/// 容忍网络超时导致的至少一次投递。symbol/direction/order_type
/// 取信号的认领快照，不受信号后续变化影响。
#[utoipa::path(
    post,
    path = "/api/v1/worker/signals/{id}/executions",
    tag = "执行 (Worker)",
    security(("bearer_token" = [])),
    params(
        ("id" = String, Path, description = "信号 ID")
    ),
    request_body = RecordExecutionRequest,
    responses(
        (status = 200, description = "对账成功", body = ApiResponse<TradeResponse>),
        (status = 400, description = "请求参数错误"),
        (status = 404, description = "信号不存在"),
        (status = 409, description = "信号从未被认领或票据冲突"),
        (status = 401, description = "未认证")
    )
)]
pub async fn record_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RecordExecutionRequest>,
) -> Result<Json<ApiResponse<TradeResponse>>, ApiError> {
    let status: TradeStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let report = ExecutionReport {
        ticket: ExecutionTicket(req.ticket),
        status,
        price: parse_price(&req.price, "price")?,
        stop_loss: parse_price(&req.stop_loss, "stop_loss")?,
        take_profit: parse_price(&req.take_profit, "take_profit")?,
        payload: req.payload.unwrap_or(serde_json::Value::Null),
    };

    let trade = state
        .manager
        .record_execution(&SignalId(id), report)
        .await?;
    Ok(Json(ApiResponse::ok(TradeResponse::from(&trade))))
}
