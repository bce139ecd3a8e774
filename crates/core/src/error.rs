use thiserror::Error;

/// # Summary
/// 调度队列全域统一错误分类。
/// 信号、派发与成交三个领域的端口共享此枚举，保证调用方能按语义分支处理。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - `LeaseExpired` 仅对当前 Worker 的本次尝试致命，对系统整体无害
///   （租约监视器已经把对应信号重新排队）。
#[derive(Error, Debug)]
pub enum QueueError {
    /// 输入校验失败 (例如非法的 direction 取值)
    #[error("Validation error: {0}")]
    Validation(String),
    /// 幂等键冲突或非法状态迁移
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 引用的信号/派发/票据不存在
    #[error("Not found: {0}")]
    NotFound(String),
    /// 在一个已被回收重派的租约上继续操作
    #[error("Lease expired: {0}")]
    LeaseExpired(String),
    /// 底层存储操作失败
    #[error("Database error: {0}")]
    Database(String),
}
