use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// # Summary
/// 信号的系统内唯一标识。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignalId(pub String);

/// # Summary
/// 上游生产者 (策略/AI 管线) 为每个交易意图分配的幂等键。
///
/// # Invariants
/// - AlertId 在整个系统中必须全局唯一，唯一性即恰好一次摄入保证。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct AlertId(pub String);

/// # Summary
/// 逻辑账户路由标识，用于把信号定向到特定的执行账户。
///
/// # Invariants
/// - 信号允许不携带路由 (None)，此时任意 Worker 均可认领。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccountId(pub String);

/// # Summary
/// 交易意图的方向定义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// 做多
    Long,
    /// 做空
    Short,
    /// 平仓 (清空持仓)
    Flat,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::Flat => write!(f, "flat"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            "flat" => Ok(Direction::Flat),
            _ => Err(format!("Unknown Direction: {}", s)),
        }
    }
}

/// # Summary
/// 委托类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "market" => Ok(OrderType::Market),
            "limit" => Ok(OrderType::Limit),
            "stop" => Ok(OrderType::Stop),
            _ => Err(format!("Unknown OrderType: {}", s)),
        }
    }
}

/// # Summary
/// 信号的生命周期状态。
///
/// # Invariants
/// - 合法迁移: pending → claimed → processing → {executed, failed}；
///   {claimed, processing} → pending (租约回收重排队)；
///   {claimed, processing} → failed (重试上限耗尽)；
///   任意非终态 → cancelled (外部撤销)。
/// - executed / cancelled / failed 为终态，不再有出边。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    /// 待认领
    Pending,
    /// 已被某 Worker 认领，持有租约
    Claimed,
    /// Worker 已开始真实执行
    Processing,
    /// 执行成功 (终态)
    Executed,
    /// 外部撤销 (终态)
    Cancelled,
    /// 执行失败或重试耗尽 (终态)
    Failed,
}

impl SignalStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Executed | SignalStatus::Cancelled | SignalStatus::Failed
        )
    }

    /// # Summary
    /// 校验从当前状态迁移到 `target` 是否合法。
    ///
    /// # Logic
    /// 同状态迁移 (target == self) 不在此处判定，调用方将其视为幂等 no-op。
    pub fn can_transition_to(&self, target: SignalStatus) -> bool {
        use SignalStatus::*;
        match (*self, target) {
            (Pending, Claimed) => true,
            (Claimed, Processing) => true,
            (Processing, Executed) => true,
            // 租约回收：有界重排队
            (Claimed, Pending) | (Processing, Pending) => true,
            // 重试耗尽或执行失败
            (Claimed, Failed) | (Processing, Failed) => true,
            // 外部撤销，非终态均可达
            (s, Cancelled) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Claimed => "claimed",
            SignalStatus::Processing => "processing",
            SignalStatus::Executed => "executed",
            SignalStatus::Cancelled => "cancelled",
            SignalStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SignalStatus::Pending),
            "claimed" => Ok(SignalStatus::Claimed),
            "processing" => Ok(SignalStatus::Processing),
            "executed" => Ok(SignalStatus::Executed),
            "cancelled" => Ok(SignalStatus::Cancelled),
            "failed" => Ok(SignalStatus::Failed),
            _ => Err(format!("Unknown SignalStatus: {}", s)),
        }
    }
}

/// # Summary
/// `Signal` 聚合根：一条等待执行的标准化交易意图。
///
/// # Invariants
/// - `alert_id` 全局唯一，重复提交会被存储层以冲突拒绝。
/// - 任意时刻至多存在一条处于 claimed/processing 的活动派发，
///   但跨越多次重试可以累积任意多条历史派发。
/// - `status` 与 `next_poll_at` 只允许经由状态迁移路径修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// 系统内全局唯一的信号 ID
    pub id: SignalId,
    /// 生产者侧幂等键
    pub alert_id: AlertId,
    /// 可选的账户路由提示
    pub account_id: Option<AccountId>,
    /// 交易标的
    pub symbol: String,
    /// 交易方向
    pub direction: Direction,
    /// 委托类型
    pub order_type: OrderType,
    /// 优先级，数值越大越紧急
    pub priority: i32,
    /// 生命周期状态
    pub status: SignalStatus,
    /// 可见性时间戳，早于等于当前时间才可被认领
    pub next_poll_at: DateTime<Utc>,
    /// 首次被认领的时间
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// 最近一次心跳续租时间
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// 执行成功时间
    pub executed_at: Option<DateTime<Utc>>,
    /// 撤销时间
    pub cancelled_at: Option<DateTime<Utc>>,
    /// 最近一次状态迁移附带的原因说明
    pub reason: Option<String>,
    /// 生产者附加的原始载荷
    pub payload: serde_json::Value,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 最后更新时间
    pub updated_at: DateTime<Utc>,
}

/// # Summary
/// 信号摄入请求。由生产者提交，经校验后落库为 Pending 信号。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSignal {
    pub alert_id: AlertId,
    pub account_id: Option<AccountId>,
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub priority: i32,
    pub payload: serde_json::Value,
}

impl NewSignal {
    /// # Summary
    /// 摄入前的基础校验。
    ///
    /// # Returns
    /// * 非法输入返回 `QueueError::Validation`。
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.alert_id.0.trim().is_empty() {
            return Err(QueueError::Validation("alert_id must not be empty".into()));
        }
        if self.symbol.trim().is_empty() {
            return Err(QueueError::Validation("symbol must not be empty".into()));
        }
        if let Some(account) = &self.account_id {
            if account.0.trim().is_empty() {
                return Err(QueueError::Validation(
                    "account_id must not be empty when present".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_state_machine() {
        use SignalStatus::*;

        // 正向主路径
        assert!(Pending.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Executed));

        // 租约回收重排队
        assert!(Claimed.can_transition_to(Pending));
        assert!(Processing.can_transition_to(Pending));

        // 撤销只对非终态开放
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(!Executed.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Cancelled));

        // 非法跳变
        assert!(!Pending.can_transition_to(Executed));
        assert!(!Pending.can_transition_to(Processing));
        assert!(!Executed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Claimed));
    }

    #[test]
    fn test_new_signal_validate() {
        let mut sig = NewSignal {
            alert_id: AlertId("tv-001".into()),
            account_id: None,
            symbol: "EURUSD".into(),
            direction: Direction::Long,
            order_type: OrderType::Market,
            priority: 5,
            payload: serde_json::json!({}),
        };
        assert!(sig.validate().is_ok());

        sig.symbol = "  ".into();
        assert!(matches!(sig.validate(), Err(QueueError::Validation(_))));
    }
}
