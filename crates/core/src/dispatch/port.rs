use super::entity::{Claim, Dispatch, DispatchId, DispatchStatus, Reclaimed};
use crate::error::QueueError;
use crate::signal::entity::{AccountId, SignalId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 派发历史查询过滤条件。
#[derive(Debug, Clone, Default)]
pub struct DispatchFilter {
    pub status: Option<DispatchStatus>,
    pub worker_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// # Summary
/// 派发台账端口：认领调度、心跳续租与租约回收的持久化抽象。
///
/// # Invariants
/// - `claim_next` 的"选中 + 置为 claimed"必须是一个原子步骤，
///   两个并发调用方绝不能拿到同一条信号；被并发抢走的候选应跳过而非阻塞等待。
/// - 所有回收路径的写操作必须带 CAS 守卫，保证多实例并发扫描安全
///   (对已被处理的行重复回收是 no-op)。
/// - 任何操作都不得无限阻塞：没有可认领信号时立即返回空。
#[async_trait]
pub trait DispatchLedger: Send + Sync {
    /// # Summary
    /// 为请求的 Worker 原子地认领下一条可执行信号。
    ///
    /// # Logic
    /// 1. 候选 = status=pending 且 next_poll_at <= now，
    ///    可选地限定 account 路由；排序 priority DESC, next_poll_at ASC, created_at ASC。
    /// 2. 原子置换信号为 claimed (acknowledged_at = last_heartbeat_at = now)，
    ///    竞争失败跳到下一候选。
    /// 3. 追加派发行：status=claimed，retry_count = max(历史)+1 (首次 0)。
    ///
    /// # Returns
    /// * 无可认领信号时返回 `Ok(None)`，退避轮询是调用方的职责。
    async fn claim_next(
        &self,
        worker_id: &str,
        account: Option<&AccountId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, QueueError>;

    /// # Summary
    /// 心跳续租：刷新派发与归属信号的 `last_heartbeat_at`。
    ///
    /// # Logic
    /// 1. 派发不存在返回 `NotFound`。
    /// 2. `worker_id` 不匹配返回 `LeaseExpired` (僵尸 Worker 防御)。
    /// 3. 派发已 completed (同 Worker) 视为迟到心跳，幂等成功。
    /// 4. 派发已 failed (租约已被回收) 返回 `LeaseExpired`，
    ///    调用方必须停止处理它已不再持有的信号。
    async fn heartbeat(
        &self,
        dispatch_id: &DispatchId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError>;

    /// # Summary
    /// 按 ID 读取派发记录。
    async fn get_dispatch(&self, dispatch_id: &DispatchId) -> Result<Dispatch, QueueError>;

    /// # Summary
    /// 回收所有租约过期的派发。租约监视器独立定时调用，与请求流量无关。
    ///
    /// # Logic
    /// 1. 过期 = status ∈ {claimed, processing} 且 last_heartbeat_at < deadline。
    /// 2. 逐条 CAS 置派发为 failed；归属信号若仍在 claimed/processing：
    ///    下一重试序号 <= max_retries 时重置为 pending (next_poll_at = now)，
    ///    否则落入终态 failed。
    /// 3. 任何 CAS 竞争失败 (并发扫描实例已处理) 直接跳过。
    ///
    /// # Returns
    /// * 本轮处理的回收明细列表。
    async fn reclaim_expired(
        &self,
        deadline: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reclaimed>, QueueError>;

    /// # Summary
    /// 列出某条信号的全部派发历史，按认领时间升序。
    async fn list_for_signal(&self, signal_id: &SignalId) -> Result<Vec<Dispatch>, QueueError>;

    /// # Summary
    /// 运维侧只读查询。
    async fn query_dispatches(&self, filter: &DispatchFilter) -> Result<Vec<Dispatch>, QueueError>;
}
