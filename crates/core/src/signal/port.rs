use super::entity::{AccountId, NewSignal, Signal, SignalId, SignalStatus};
use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 运维侧只读查询的过滤条件。所有字段均为可选，叠加为 AND 语义。
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub status: Option<SignalStatus>,
    pub account_id: Option<AccountId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// # Summary
/// 信号持久化端口，负责交易意图及其生命周期状态的落库与读取。
///
/// # Invariants
/// - 实现者必须保证 `alert_id` 唯一约束，重复摄入返回 `Conflict`。
/// - `transition` 必须以持久化的当前状态做比较再置换 (CAS)，
///   预期外的源状态返回 `Conflict`，绝不静默覆盖。
/// - 此接口必须是异步且线程安全的 (`Send + Sync`)。
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// # Summary
    /// 摄入一条新信号，初始状态 Pending。
    ///
    /// # Logic
    /// 1. 以 `alert_id` 唯一约束落库。
    /// 2. `next_poll_at` 置为 `now`，立即可被认领。
    ///
    /// # Arguments
    /// * `new`: 已通过 `NewSignal::validate` 的摄入请求。
    /// * `now`: 调用方提供的当前时间。
    ///
    /// # Returns
    /// * 成功返回完整的 `Signal`；重复 `alert_id` 返回 `QueueError::Conflict`。
    async fn insert(&self, new: &NewSignal, now: DateTime<Utc>) -> Result<Signal, QueueError>;

    /// # Summary
    /// 按 ID 读取信号。
    ///
    /// # Returns
    /// * 不存在返回 `QueueError::NotFound`。
    async fn get_signal(&self, id: &SignalId) -> Result<Signal, QueueError>;

    /// # Summary
    /// 对信号执行一次合法性校验过的状态迁移 (CAS)。
    ///
    /// # Logic
    /// 1. 读取当前状态；目标与当前相同时幂等成功，不触碰任何时间戳。
    /// 2. 按状态机校验合法性，非法迁移返回 `Conflict`。
    /// 3. 以 `WHERE status = <当前>` 条件置换，并发竞争失败返回 `Conflict`。
    /// 4. 同一事务内级联活动派发：→processing 置 processing，
    ///    →executed 置 completed，→failed/cancelled/pending 置 failed。
    ///
    /// # Arguments
    /// * `target`: 目标状态。
    /// * `reason`: 可选的迁移原因，落库在信号上。
    ///
    /// # Returns
    /// * 迁移后的信号快照。
    async fn transition(
        &self,
        id: &SignalId,
        target: SignalStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Signal, QueueError>;

    /// # Summary
    /// 运维侧只读查询。
    ///
    /// # Logic
    /// 按过滤条件查询，`created_at` 倒序，默认上限 100 条。
    async fn query_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, QueueError>;
}
