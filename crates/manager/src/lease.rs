use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use shingo_core::common::TimeProvider;
use shingo_core::config::DispatchConfig;
use shingo_core::dispatch::entity::Reclaimed;
use shingo_core::dispatch::port::DispatchLedger;

use crate::dispatch::ManagerError;

/// # Summary
/// 租约监视器：独立于请求流量的定时扫描任务，系统的主要故障恢复机制。
/// 崩溃的 Worker 绝不能让信号被无限期搁置：过期租约的派发置为 failed，
/// 其信号在重试额度内重新排队，超出额度落入终态 failed。
///
/// # Invariants
/// - 扫描周期与租约阈值来自注入的 `DispatchConfig`，时间经由注入时钟获取，
///   测试可拨动虚拟时钟模拟过期而无需真实等待。
/// - 允许多实例并发运行：存储端口的回收路径全部带 CAS 守卫。
pub struct LeaseMonitor {
    // 派发台账端口
    dispatches: Arc<dyn DispatchLedger>,
    // 时间供给器
    clock: Arc<dyn TimeProvider>,
    // 调度参数
    config: DispatchConfig,
}

impl LeaseMonitor {
    pub fn new(
        dispatches: Arc<dyn DispatchLedger>,
        clock: Arc<dyn TimeProvider>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            dispatches,
            clock,
            config,
        })
    }

    /// # Summary
    /// 执行一轮回收扫描。
    ///
    /// # Logic
    /// 1. deadline = now - lease_timeout。
    /// 2. 委托存储端口回收所有心跳早于 deadline 的活动派发。
    /// 3. 按处置结果分级记录日志。
    ///
    /// # Returns
    /// * 本轮处理的回收明细。
    pub async fn sweep_once(&self) -> Result<Vec<Reclaimed>, ManagerError> {
        let now = self.clock.now();
        let lease = chrono::Duration::seconds(
            i64::try_from(self.config.lease_timeout_secs).unwrap_or(i64::MAX),
        );
        let deadline = now - lease;

        let reclaimed = self
            .dispatches
            .reclaim_expired(deadline, self.config.max_retries, now)
            .await?;

        for r in &reclaimed {
            if r.exhausted {
                warn!(
                    "Signal {} exhausted its retry budget after attempt {}, marked failed",
                    r.signal_id.0, r.retry_count
                );
            } else {
                info!(
                    "Lease on dispatch {} expired, signal {} requeued (attempt {} failed)",
                    r.dispatch_id.0, r.signal_id.0, r.retry_count
                );
            }
        }
        Ok(reclaimed)
    }

    /// # Summary
    /// 以固定周期启动后台扫描协程。
    ///
    /// # Logic
    /// 1. 按 `sweep_interval_secs` 建立 tokio 定时器。
    /// 2. 每个 tick 执行一轮 `sweep_once`，失败只记日志不退出，
    ///    单轮扫描失败不应终结故障恢复本身。
    ///
    /// # Returns
    /// * `AbortHandle` - 供应用关停时中止协程。
    pub fn spawn(self: &Arc<Self>) -> AbortHandle {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let period = std::time::Duration::from_secs(monitor.config.sweep_interval_secs);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // 首个 tick 立即完成，先空转一次避免启动即扫描
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = monitor.sweep_once().await {
                    error!("Lease sweep failed: {}", e);
                }
            }
        });
        handle.abort_handle()
    }
}
