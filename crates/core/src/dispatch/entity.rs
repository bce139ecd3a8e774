use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::entity::{Signal, SignalId};

/// # Summary
/// 派发记录的系统内唯一标识。
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct DispatchId(pub String);

/// # Summary
/// 单次认领尝试的生命周期状态。
///
/// # Invariants
/// - 合法迁移: claimed → processing → {completed, failed}；
///   claimed → failed (Worker 未及上报 processing 即失联)。
/// - completed / failed 为终态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStatus {
    Claimed,
    Processing,
    Completed,
    Failed,
}

impl DispatchStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Completed | DispatchStatus::Failed)
    }

    /// 活动状态 = 持有有效租约
    pub fn is_active(&self) -> bool {
        matches!(self, DispatchStatus::Claimed | DispatchStatus::Processing)
    }

    /// 校验从当前状态迁移到 `target` 是否合法 (同状态由调用方按幂等处理)
    pub fn can_transition_to(&self, target: DispatchStatus) -> bool {
        use DispatchStatus::*;
        matches!(
            (*self, target),
            (Claimed, Processing) | (Claimed, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DispatchStatus::Claimed => "claimed",
            DispatchStatus::Processing => "processing",
            DispatchStatus::Completed => "completed",
            DispatchStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for DispatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claimed" => Ok(DispatchStatus::Claimed),
            "processing" => Ok(DispatchStatus::Processing),
            "completed" => Ok(DispatchStatus::Completed),
            "failed" => Ok(DispatchStatus::Failed),
            _ => Err(format!("Unknown DispatchStatus: {}", s)),
        }
    }
}

/// # Summary
/// `Dispatch` 记录：某个 Worker 对某条信号的一次执行尝试。
/// 每次认领追加一条，历史永不改写；一条信号跨越重试可累积多条。
///
/// # Invariants
/// - `retry_count` = 该信号此前所有派发的最大 retry_count + 1 (首次为 0)。
/// - 仅持有租约的 Worker 允许写自己的派发行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    /// 派发记录 ID
    pub id: DispatchId,
    /// 归属信号
    pub signal_id: SignalId,
    /// 持有租约的 Worker 标识
    pub worker_id: String,
    /// 生命周期状态
    pub status: DispatchStatus,
    /// 本次尝试的重试序号 (首次认领为 0)
    pub retry_count: i32,
    /// 认领时间
    pub claimed_at: DateTime<Utc>,
    /// 最近一次心跳续租时间
    pub last_heartbeat_at: DateTime<Utc>,
    /// 完成时间
    pub completed_at: Option<DateTime<Utc>>,
    /// 失败/回收时间
    pub failed_at: Option<DateTime<Utc>>,
    /// 附加元数据
    pub metadata: serde_json::Value,
}

/// # Summary
/// 一次成功认领的返回值：信号快照 + 新追加的派发记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub signal: Signal,
    pub dispatch: Dispatch,
}

/// # Summary
/// 租约回收扫描中单条过期派发的处置结果。
#[derive(Debug, Clone)]
pub struct Reclaimed {
    pub dispatch_id: DispatchId,
    pub signal_id: SignalId,
    /// 过期派发的重试序号
    pub retry_count: i32,
    /// true = 重试耗尽，信号已落入终态 failed；false = 已重新排队
    pub exhausted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_state_machine() {
        use DispatchStatus::*;

        assert!(Claimed.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        // 失联回收可直接从 claimed 落败
        assert!(Claimed.can_transition_to(Failed));

        assert!(!Claimed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Claimed));
    }
}
