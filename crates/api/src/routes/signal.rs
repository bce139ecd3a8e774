//! # 信号路由控制器
//!
//! 实现 `/api/v1/signals` 路径下的 REST 接口：
//! 生产者摄入、状态迁移与运维侧的信号/派发查询。

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{
    ApiResponse, DispatchResponse, SignalResponse, SubmitSignalRequest, TransitionRequest,
};
use shingo_core::signal::entity::{AccountId, AlertId, NewSignal, SignalId, SignalStatus};
use shingo_core::signal::port::SignalFilter;

fn parse_time(raw: &Option<String>, field: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| ApiError::BadRequest(format!("{} 不是合法的 RFC3339 时间: {}", field, e))),
    }
}

/// 提交一条新的交易信号
///
/// 生产者 (策略/AI 管线) 的唯一写入口。`alert_id` 为幂等键：
/// 重复提交同一 alert_id 返回 409，保证恰好一次摄入。
#[utoipa::path(
    post,
    path = "/api/v1/signals",
    tag = "信号 (Signal)",
    security(("bearer_token" = [])),
    request_body = SubmitSignalRequest,
    responses(
        (status = 200, description = "摄入成功", body = ApiResponse<SignalResponse>),
        (status = 400, description = "请求参数错误"),
        (status = 409, description = "alert_id 重复"),
        (status = 401, description = "未认证")
    )
)]
pub async fn submit_signal(
    State(state): State<AppState>,
    Json(req): Json<SubmitSignalRequest>,
) -> Result<Json<ApiResponse<SignalResponse>>, ApiError> {
    let direction = req
        .direction
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;
    let order_type = req
        .order_type
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let new = NewSignal {
        alert_id: AlertId(req.alert_id),
        account_id: req.account_id.map(AccountId),
        symbol: req.symbol,
        direction,
        order_type,
        priority: req.priority,
        payload: req.payload.unwrap_or(serde_json::Value::Null),
    };

    let signal = state.manager.submit(new).await?;
    Ok(Json(ApiResponse::ok(SignalResponse::from(&signal))))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ListSignalsQuery {
    pub status: Option<String>,
    pub account_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
}

/// 查询信号列表 (运维只读)
///
/// 支持按状态、账户路由与创建时间范围过滤，`created_at` 倒序。
#[utoipa::path(
    get,
    path = "/api/v1/signals",
    tag = "信号 (Signal)",
    security(("bearer_token" = [])),
    params(
        ("status" = Option<String>, Query, description = "生命周期状态过滤"),
        ("account_id" = Option<String>, Query, description = "账户路由过滤"),
        ("from" = Option<String>, Query, description = "创建时间下界 (RFC3339)"),
        ("to" = Option<String>, Query, description = "创建时间上界 (RFC3339)"),
        ("limit" = Option<u32>, Query, description = "返回数量限制，默认 100")
    ),
    responses(
        (status = 200, description = "信号列表获取成功", body = ApiResponse<Vec<SignalResponse>>),
        (status = 401, description = "未认证")
    )
)]
pub async fn list_signals(
    State(state): State<AppState>,
    Query(query): Query<ListSignalsQuery>,
) -> Result<Json<ApiResponse<Vec<SignalResponse>>>, ApiError> {
    let status = match &query.status {
        None => None,
        Some(raw) => Some(
            raw.parse::<SignalStatus>()
                .map_err(|e| ApiError::BadRequest(e))?,
        ),
    };

    let filter = SignalFilter {
        status,
        account_id: query.account_id.map(AccountId),
        from: parse_time(&query.from, "from")?,
        to: parse_time(&query.to, "to")?,
        limit: query.limit,
    };

    let signals = state.manager.query_signals(&filter).await?;
    let responses: Vec<SignalResponse> = signals.iter().map(SignalResponse::from).collect();
    Ok(Json(ApiResponse::ok(responses)))
}

/// 获取指定信号的详情
#[utoipa::path(
    get,
    path = "/api/v1/signals/{id}",
    tag = "信号 (Signal)",
    security(("bearer_token" = [])),
    params(
        ("id" = String, Path, description = "信号 ID")
    ),
    responses(
        (status = 200, description = "信号详情获取成功", body = ApiResponse<SignalResponse>),
        (status = 404, description = "信号不存在"),
        (status = 401, description = "未认证")
    )
)]
pub async fn get_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<SignalResponse>>, ApiError> {
    let signal = state.manager.get_signal(&SignalId(id)).await?;
    Ok(Json(ApiResponse::ok(SignalResponse::from(&signal))))
}

/// 列出指定信号的全部派发历史
///
/// 一条信号跨越重试可累积多条派发记录，按认领时间升序返回。
#[utoipa::path(
    get,
    path = "/api/v1/signals/{id}/dispatches",
    tag = "信号 (Signal)",
    security(("bearer_token" = [])),
    params(
        ("id" = String, Path, description = "信号 ID")
    ),
    responses(
        (status = 200, description = "派发历史获取成功", body = ApiResponse<Vec<DispatchResponse>>),
        (status = 401, description = "未认证")
    )
)]
pub async fn list_signal_dispatches(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<DispatchResponse>>>, ApiError> {
    let dispatches = state.manager.list_dispatches(&SignalId(id)).await?;
    let responses: Vec<DispatchResponse> = dispatches.iter().map(DispatchResponse::from).collect();
    Ok(Json(ApiResponse::ok(responses)))
}

/// 对信号执行一次状态迁移
///
/// 迁移以持久化的当前状态为前提 (CAS)：非法或竞争失败返回 409；
/// 重复迁移到当前状态幂等成功。撤销 (cancelled) 是非抢占的：
/// 在途 Worker 会在下一次心跳或迁移调用时发现并停手。
#[utoipa::path(
    post,
    path = "/api/v1/signals/{id}/transition",
    tag = "信号 (Signal)",
    security(("bearer_token" = [])),
    params(
        ("id" = String, Path, description = "信号 ID")
    ),
    request_body = TransitionRequest,
    responses(
        (status = 200, description = "迁移成功", body = ApiResponse<SignalResponse>),
        (status = 404, description = "信号不存在"),
        (status = 409, description = "非法迁移或并发冲突"),
        (status = 401, description = "未认证")
    )
)]
pub async fn transition_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<ApiResponse<SignalResponse>>, ApiError> {
    let target: SignalStatus = req
        .status
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let signal = state
        .manager
        .transition(&SignalId(id), target, req.reason)
        .await?;
    Ok(Json(ApiResponse::ok(SignalResponse::from(&signal))))
}
