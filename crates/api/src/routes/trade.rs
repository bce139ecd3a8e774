//! # 成交台账路由控制器
//!
//! 实现 `/api/v1/trades` 路径下的只读查询接口，供运维端核对执行结果。

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, TradeResponse};
use shingo_core::signal::entity::AccountId;
use shingo_core::trade::entity::TradeStatus;
use shingo_core::trade::port::TradeFilter;

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ListTradesQuery {
    pub status: Option<String>,
    pub account_id: Option<String>,
    pub limit: Option<u32>,
}

/// 查询成交列表 (运维只读)
#[utoipa::path(
    get,
    path = "/api/v1/trades",
    tag = "成交 (Trade)",
    security(("bearer_token" = [])),
    params(
        ("status" = Option<String>, Query, description = "成交状态过滤"),
        ("account_id" = Option<String>, Query, description = "记账账户过滤"),
        ("limit" = Option<u32>, Query, description = "返回数量限制，默认 100")
    ),
    responses(
        (status = 200, description = "成交列表获取成功", body = ApiResponse<Vec<TradeResponse>>),
        (status = 401, description = "未认证")
    )
)]
pub async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<ListTradesQuery>,
) -> Result<Json<ApiResponse<Vec<TradeResponse>>>, ApiError> {
    let status = match &query.status {
        None => None,
        Some(raw) => Some(
            raw.parse::<TradeStatus>()
                .map_err(|e| ApiError::BadRequest(e))?,
        ),
    };

    let filter = TradeFilter {
        status,
        account_id: query.account_id.map(AccountId),
        from: None,
        to: None,
        limit: query.limit,
    };

    let trades = state.manager.query_trades(&filter).await?;
    let responses: Vec<TradeResponse> = trades.iter().map(TradeResponse::from).collect();
    Ok(Json(ApiResponse::ok(responses)))
}
