use super::entity::{ExecutionReport, ExecutionTicket, SignalSnapshot, Trade, TradeStatus};
use crate::error::QueueError;
use crate::signal::entity::{AccountId, SignalId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 成交台账查询过滤条件。
#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub status: Option<TradeStatus>,
    pub account_id: Option<AccountId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// # Summary
/// 成交台账端口。Trade Reconciler 经由此接口成为 Trade 行的唯一写入方。
///
/// # Invariants
/// - `upsert` 以 `execution_ticket` 为幂等键：不存在则插入，
///   已存在则就地更新状态/价格/载荷，绝不产生重复行。
///   这容忍 Worker 侧至少一次的回报投递 (超时重试的回调)。
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// # Summary
    /// 按票据幂等落账一笔执行结果。
    ///
    /// # Arguments
    /// * `signal_id`: 归属信号。
    /// * `account_id`: 记账账户 (路由解析后的结果)。
    /// * `snapshot`: 从信号捕获的不可变快照。
    /// * `report`: Worker 上报的执行结果。
    ///
    /// # Returns
    /// * 落账后的 Trade 行 (插入或更新后的最新值)。
    async fn upsert(
        &self,
        signal_id: &SignalId,
        account_id: &AccountId,
        snapshot: &SignalSnapshot,
        report: &ExecutionReport,
        now: DateTime<Utc>,
    ) -> Result<Trade, QueueError>;

    /// # Summary
    /// 按票据读取成交记录。
    async fn get_by_ticket(&self, ticket: &ExecutionTicket) -> Result<Option<Trade>, QueueError>;

    /// # Summary
    /// 运维侧只读查询。
    async fn query_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, QueueError>;
}
