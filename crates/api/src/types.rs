//! # DTO (Data Transfer Object) 层
//!
//! 将内部领域模型转化为面向调用方 JSON 输出的轻量结构体。
//! 所有 DTO 必须派生 `utoipa::ToSchema` 以自动进入 Swagger 文档。

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================
//  信号相关 DTO
// ============================================================

/// 信号摄入请求体 (生产者)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitSignalRequest {
    /// 生产者侧幂等键，全局唯一
    #[schema(example = "tv-20260807-001")]
    pub alert_id: String,
    /// 可选的账户路由提示
    #[schema(example = "SysAcct_Alpha_01")]
    pub account_id: Option<String>,
    /// 交易标的
    #[schema(example = "EURUSD")]
    pub symbol: String,
    /// 方向 (long / short / flat)
    #[schema(example = "long")]
    pub direction: String,
    /// 委托类型 (market / limit / stop)
    #[schema(example = "market")]
    pub order_type: String,
    /// 优先级，数值越大越紧急
    #[schema(example = 5)]
    pub priority: i32,
    /// 生产者附加的原始载荷
    pub payload: Option<serde_json::Value>,
}

/// 信号 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SignalResponse {
    /// 信号 ID
    #[schema(example = "a1b2c3d4-e5f6-7890")]
    pub id: String,
    /// 生产者幂等键
    #[schema(example = "tv-20260807-001")]
    pub alert_id: String,
    /// 账户路由
    #[schema(example = "SysAcct_Alpha_01")]
    pub account_id: Option<String>,
    /// 交易标的
    #[schema(example = "EURUSD")]
    pub symbol: String,
    /// 方向
    #[schema(example = "long")]
    pub direction: String,
    /// 委托类型
    #[schema(example = "market")]
    pub order_type: String,
    /// 优先级
    #[schema(example = 5)]
    pub priority: i32,
    /// 生命周期状态
    #[schema(example = "pending")]
    pub status: String,
    /// 可见性时间戳 (ISO 8601)
    #[schema(example = "2026-08-07T10:00:00Z")]
    pub next_poll_at: String,
    /// 首次被认领时间
    pub acknowledged_at: Option<String>,
    /// 最近心跳时间
    pub last_heartbeat_at: Option<String>,
    /// 执行成功时间
    pub executed_at: Option<String>,
    /// 撤销时间
    pub cancelled_at: Option<String>,
    /// 最近一次迁移原因
    pub reason: Option<String>,
    /// 创建时间
    #[schema(example = "2026-08-07T10:00:00Z")]
    pub created_at: String,
}

/// 状态迁移请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransitionRequest {
    /// 目标状态 (processing / executed / failed / cancelled / pending)
    #[schema(example = "processing")]
    pub status: String,
    /// 可选的迁移原因
    #[schema(example = "filled by broker bridge")]
    pub reason: Option<String>,
}

// ============================================================
//  派发相关 DTO
// ============================================================

/// 派发记录 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatchResponse {
    /// 派发 ID
    #[schema(example = "d1e2f3a4-b5c6-7890")]
    pub id: String,
    /// 归属信号 ID
    pub signal_id: String,
    /// 持有租约的 Worker
    #[schema(example = "worker-eu-01")]
    pub worker_id: String,
    /// 状态 (claimed / processing / completed / failed)
    #[schema(example = "claimed")]
    pub status: String,
    /// 重试序号，首次认领为 0
    #[schema(example = 0)]
    pub retry_count: i32,
    /// 认领时间
    #[schema(example = "2026-08-07T10:00:05Z")]
    pub claimed_at: String,
    /// 最近心跳时间
    pub last_heartbeat_at: String,
    /// 完成时间
    pub completed_at: Option<String>,
    /// 失败/回收时间
    pub failed_at: Option<String>,
}

/// 认领请求体 (Worker)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimRequest {
    /// Worker 标识
    #[schema(example = "worker-eu-01")]
    pub worker_id: String,
    /// 可选的账户路由过滤
    #[schema(example = "SysAcct_Alpha_01")]
    pub account_id: Option<String>,
}

/// 认领成功 DTO：信号 + 新追加的派发行
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClaimResponse {
    pub signal: SignalResponse,
    pub dispatch: DispatchResponse,
    /// Worker 应当遵守的心跳上报间隔 (秒)
    #[schema(example = 20)]
    pub heartbeat_interval_secs: u64,
}

/// 心跳请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HeartbeatRequest {
    /// Worker 标识，必须与派发行持有者一致
    #[schema(example = "worker-eu-01")]
    pub worker_id: String,
}

// ============================================================
//  成交相关 DTO
// ============================================================

/// 执行回报请求体 (Worker → Trade Reconciler)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordExecutionRequest {
    /// 物理执行幂等键
    #[schema(example = "tkt-77")]
    pub ticket: String,
    /// 执行状态 (pending / executing / filled / partial_fill / closed / rejected)
    #[schema(example = "filled")]
    pub status: String,
    /// 成交价格
    #[schema(example = "1.0901")]
    pub price: Option<String>,
    /// 止损位
    #[schema(example = "1.0850")]
    pub stop_loss: Option<String>,
    /// 止盈位
    #[schema(example = "1.1000")]
    pub take_profit: Option<String>,
    /// 执行端原始回报载荷
    pub payload: Option<serde_json::Value>,
}

/// 成交记录 DTO
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TradeResponse {
    /// 成交记录 ID
    pub id: String,
    /// 归属信号 ID
    pub signal_id: Option<String>,
    /// 记账账户
    #[schema(example = "SysAcct_Alpha_01")]
    pub account_id: String,
    /// 物理执行幂等键
    #[schema(example = "tkt-77")]
    pub ticket: String,
    /// 状态
    #[schema(example = "filled")]
    pub status: String,
    /// 认领快照：标的
    #[schema(example = "EURUSD")]
    pub symbol: String,
    /// 认领快照：方向
    #[schema(example = "long")]
    pub direction: String,
    /// 认领快照：委托类型
    #[schema(example = "market")]
    pub order_type: String,
    /// 成交价格
    #[schema(example = "1.0901")]
    pub price: Option<String>,
    /// 止损位
    pub stop_loss: Option<String>,
    /// 止盈位
    pub take_profit: Option<String>,
    /// 首次落库时间
    pub opened_at: String,
    /// 首次 filled 时间
    pub filled_at: Option<String>,
    /// 首次 closed 时间
    pub closed_at: Option<String>,
}

// ============================================================
//  通用响应 DTO
// ============================================================

/// 统一 API 响应包装器
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T: Serialize + ToSchema> {
    /// 是否成功
    pub success: bool,
    /// 数据载荷 (成功时)
    pub data: Option<T>,
    /// 错误信息 (失败时)
    pub error: Option<String>,
}

impl<T: Serialize + ToSchema> ApiResponse<T> {
    /// 构建成功响应
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// 构建不带载荷的成功响应 (例如队列为空的认领)
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

/// 构建失败响应 (不含泛型载荷)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiErrorResponse {
    /// 固定为 false
    pub success: bool,
    /// 错误描述信息
    pub error: String,
}

impl ApiErrorResponse {
    /// 从错误信息构建
    pub fn from_msg(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: msg.into(),
        }
    }
}

// ============================================================
//  领域模型 → DTO 惯用转换 (impl From<T>)
// ============================================================

impl From<&shingo_core::signal::entity::Signal> for SignalResponse {
    fn from(s: &shingo_core::signal::entity::Signal) -> Self {
        Self {
            id: s.id.0.clone(),
            alert_id: s.alert_id.0.clone(),
            account_id: s.account_id.as_ref().map(|a| a.0.clone()),
            symbol: s.symbol.clone(),
            direction: s.direction.to_string(),
            order_type: s.order_type.to_string(),
            priority: s.priority,
            status: s.status.to_string(),
            next_poll_at: s.next_poll_at.to_rfc3339(),
            acknowledged_at: s.acknowledged_at.map(|t| t.to_rfc3339()),
            last_heartbeat_at: s.last_heartbeat_at.map(|t| t.to_rfc3339()),
            executed_at: s.executed_at.map(|t| t.to_rfc3339()),
            cancelled_at: s.cancelled_at.map(|t| t.to_rfc3339()),
            reason: s.reason.clone(),
            created_at: s.created_at.to_rfc3339(),
        }
    }
}

impl From<&shingo_core::dispatch::entity::Dispatch> for DispatchResponse {
    fn from(d: &shingo_core::dispatch::entity::Dispatch) -> Self {
        Self {
            id: d.id.0.clone(),
            signal_id: d.signal_id.0.clone(),
            worker_id: d.worker_id.clone(),
            status: d.status.to_string(),
            retry_count: d.retry_count,
            claimed_at: d.claimed_at.to_rfc3339(),
            last_heartbeat_at: d.last_heartbeat_at.to_rfc3339(),
            completed_at: d.completed_at.map(|t| t.to_rfc3339()),
            failed_at: d.failed_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl From<&shingo_core::trade::entity::Trade> for TradeResponse {
    fn from(t: &shingo_core::trade::entity::Trade) -> Self {
        Self {
            id: t.id.0.clone(),
            signal_id: t.signal_id.as_ref().map(|s| s.0.clone()),
            account_id: t.account_id.0.clone(),
            ticket: t.ticket.0.clone(),
            status: t.status.to_string(),
            symbol: t.symbol.clone(),
            direction: t.direction.to_string(),
            order_type: t.order_type.to_string(),
            price: t.price.map(|p| p.to_string()),
            stop_loss: t.stop_loss.map(|p| p.to_string()),
            take_profit: t.take_profit.map(|p| p.to_string()),
            opened_at: t.opened_at.to_rfc3339(),
            filled_at: t.filled_at.map(|ts| ts.to_rfc3339()),
            closed_at: t.closed_at.map(|ts| ts.to_rfc3339()),
        }
    }
}
