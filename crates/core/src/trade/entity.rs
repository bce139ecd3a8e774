use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::entity::{AccountId, Direction, OrderType, Signal, SignalId};

/// # Summary
/// 成交记录的系统内唯一标识。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TradeId(pub String);

/// # Summary
/// 物理执行回报的幂等键。同一笔真实成交无论回报多少次都只对应一行 Trade。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTicket(pub String);

/// # Summary
/// 成交记录的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Pending,
    Executing,
    Filled,
    PartialFill,
    Closed,
    Rejected,
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Executing => "executing",
            TradeStatus::Filled => "filled",
            TradeStatus::PartialFill => "partial_fill",
            TradeStatus::Closed => "closed",
            TradeStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TradeStatus::Pending),
            "executing" => Ok(TradeStatus::Executing),
            "filled" => Ok(TradeStatus::Filled),
            "partial_fill" => Ok(TradeStatus::PartialFill),
            "closed" => Ok(TradeStatus::Closed),
            "rejected" => Ok(TradeStatus::Rejected),
            _ => Err(format!("Unknown TradeStatus: {}", s)),
        }
    }
}

/// # Summary
/// 对账时刻从信号上捕获的不可变快照。
/// 显式值拷贝而非对可变 Signal 的活引用：信号后续的任何状态变化
/// 都不会回溯影响已落库的成交记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
}

impl SignalSnapshot {
    /// 从信号聚合根捕获快照
    pub fn capture(signal: &Signal) -> Self {
        Self {
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            order_type: signal.order_type,
        }
    }
}

/// # Summary
/// Worker 上报的一次执行结果。作为 Trade 对账的输入。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// 物理执行幂等键
    pub ticket: ExecutionTicket,
    /// 执行状态
    pub status: TradeStatus,
    /// 成交价格
    pub price: Option<Decimal>,
    /// 止损位
    pub stop_loss: Option<Decimal>,
    /// 止盈位
    pub take_profit: Option<Decimal>,
    /// 执行端原始回报载荷
    pub payload: serde_json::Value,
}

/// # Summary
/// `Trade` 聚合根：一笔物理执行在台账中的唯一投影。
///
/// # Invariants
/// - `execution_ticket` 全局唯一；同票据重复回报就地更新，绝不产生重复行。
/// - symbol/direction/order_type 为认领快照值，不随信号后续变化。
/// - 本记录仅由 Trade Reconciler 一个写入方维护。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// 成交记录 ID
    pub id: TradeId,
    /// 归属信号 (允许为空，兼容人工补录的场外成交)
    pub signal_id: Option<SignalId>,
    /// 记账账户
    pub account_id: AccountId,
    /// 物理执行幂等键
    pub ticket: ExecutionTicket,
    /// 执行状态
    pub status: TradeStatus,
    /// 认领快照：标的
    pub symbol: String,
    /// 认领快照：方向
    pub direction: Direction,
    /// 认领快照：委托类型
    pub order_type: OrderType,
    /// 成交价格
    pub price: Option<Decimal>,
    /// 止损位
    pub stop_loss: Option<Decimal>,
    /// 止盈位
    pub take_profit: Option<Decimal>,
    /// 执行端原始回报载荷
    pub payload: serde_json::Value,
    /// 首次落库时间
    pub opened_at: DateTime<Utc>,
    /// 首次达到 filled 的时间
    pub filled_at: Option<DateTime<Utc>>,
    /// 首次达到 closed 的时间
    pub closed_at: Option<DateTime<Utc>>,
    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
}
