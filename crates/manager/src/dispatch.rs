use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use shingo_core::common::TimeProvider;
use shingo_core::config::DispatchConfig;
use shingo_core::dispatch::entity::{Claim, Dispatch, DispatchId};
use shingo_core::dispatch::port::{DispatchFilter, DispatchLedger};
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{AccountId, NewSignal, Signal, SignalId, SignalStatus};
use shingo_core::signal::port::{SignalFilter, SignalStore};
use shingo_core::trade::entity::{ExecutionReport, SignalSnapshot, Trade};
use shingo_core::trade::port::{TradeFilter, TradeLedger};

/// # Summary
/// Manager 层的统一错误类型。
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// # Summary
/// 调度管理器，系统的应用服务层门面 (Facade)。
/// 生产者、Worker 与运维查询的所有写读路径都经由此处，
/// 编译期仅依赖 `shingo-core` 中的端口抽象，具体实现通过构造函数注入。
///
/// # Invariants
/// - 三个存储端口与时钟必须在构造时由外部提供，便于测试替换内存实现与虚拟时钟。
/// - 本层不持有任何可变状态；全部协调都托付给存储端口的原子性保证。
pub struct DispatchManager {
    // 信号持久化端口
    signals: Arc<dyn SignalStore>,
    // 派发台账端口
    dispatches: Arc<dyn DispatchLedger>,
    // 成交台账端口
    trades: Arc<dyn TradeLedger>,
    // 时间供给器
    clock: Arc<dyn TimeProvider>,
    // 调度参数
    config: DispatchConfig,
}

impl DispatchManager {
    /// # Summary
    /// 创建 DispatchManager 实例。
    ///
    /// # Arguments
    /// * `signals` / `dispatches` / `trades` - 存储端口的具体实现。
    /// * `clock` - 时间供给器。
    /// * `config` - 调度参数。
    ///
    /// # Returns
    /// * `Arc<Self>` - 可共享的管理器实例。
    pub fn new(
        signals: Arc<dyn SignalStore>,
        dispatches: Arc<dyn DispatchLedger>,
        trades: Arc<dyn TradeLedger>,
        clock: Arc<dyn TimeProvider>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            signals,
            dispatches,
            trades,
            clock,
            config,
        })
    }

    /// # Summary
    /// 生产者摄入一条新信号。
    ///
    /// # Logic
    /// 1. 基础校验。
    /// 2. 以 `alert_id` 幂等落库，重复提交返回 `Conflict`。
    ///
    /// # Returns
    /// * 落库后的 Pending 信号。
    pub async fn submit(&self, new: NewSignal) -> Result<Signal, ManagerError> {
        new.validate()?;
        let signal = self.signals.insert(&new, self.clock.now()).await?;
        info!(
            "Signal {} ingested (alert {}, {} {} prio {})",
            signal.id.0, signal.alert_id.0, signal.direction, signal.symbol, signal.priority
        );
        Ok(signal)
    }

    /// # Summary
    /// Worker 请求认领下一条可执行信号。
    ///
    /// # Logic
    /// 选中 + 置为 claimed + 追加派发行由存储端口原子完成；
    /// 无可认领信号立即返回 `None`，退避轮询由 Worker 自行负责。
    pub async fn claim(
        &self,
        worker_id: &str,
        account: Option<AccountId>,
    ) -> Result<Option<Claim>, ManagerError> {
        let claim = self
            .dispatches
            .claim_next(worker_id, account.as_ref(), self.clock.now())
            .await?;
        if let Some(c) = &claim {
            info!(
                "Signal {} claimed by {} (dispatch {}, retry {})",
                c.signal.id.0, worker_id, c.dispatch.id.0, c.dispatch.retry_count
            );
        }
        Ok(claim)
    }

    /// # Summary
    /// Worker 心跳续租。
    ///
    /// # Logic
    /// Worker 身份不符或租约已被回收时返回 `LeaseExpired`，
    /// 调用方必须立刻停止处理该信号。
    pub async fn heartbeat(
        &self,
        dispatch_id: &DispatchId,
        worker_id: &str,
    ) -> Result<(), ManagerError> {
        self.dispatches
            .heartbeat(dispatch_id, worker_id, self.clock.now())
            .await?;
        Ok(())
    }

    /// # Summary
    /// 对信号执行一次状态迁移，级联活动派发。
    ///
    /// # Logic
    /// 合法性与 CAS 均在存储端口内完成；重复迁移到当前状态幂等成功。
    pub async fn transition(
        &self,
        signal_id: &SignalId,
        target: SignalStatus,
        reason: Option<String>,
    ) -> Result<Signal, ManagerError> {
        let signal = self
            .signals
            .transition(signal_id, target, reason.as_deref(), self.clock.now())
            .await?;
        info!("Signal {} transitioned to {}", signal.id.0, signal.status);
        Ok(signal)
    }

    /// # Summary
    /// 对账一笔执行结果 (Trade Reconciler 入口)。
    ///
    /// # Logic
    /// 1. 信号必须存在，且至少被认领过一次 (acknowledged_at 非空)，否则拒绝。
    /// 2. 从信号捕获 symbol/direction/order_type 不可变快照。
    /// 3. 路由解析：信号无 account_id 时记账到配置的默认账户。
    /// 4. 以 execution_ticket 幂等落账，Worker 超时重试的重复回报是纯 no-op。
    pub async fn record_execution(
        &self,
        signal_id: &SignalId,
        report: ExecutionReport,
    ) -> Result<Trade, ManagerError> {
        let signal = self.signals.get_signal(signal_id).await?;

        if signal.acknowledged_at.is_none() {
            return Err(ManagerError::Queue(QueueError::Conflict(format!(
                "signal {} has never been claimed, refusing to reconcile",
                signal_id.0
            ))));
        }

        let snapshot = SignalSnapshot::capture(&signal);
        let account = signal
            .account_id
            .clone()
            .unwrap_or_else(|| AccountId(self.config.default_account.clone()));

        let trade = self
            .trades
            .upsert(signal_id, &account, &snapshot, &report, self.clock.now())
            .await?;
        info!(
            "Execution {} reconciled for signal {} ({} -> {})",
            trade.ticket.0, signal_id.0, trade.symbol, trade.status
        );
        Ok(trade)
    }

    /// # Summary
    /// 按 ID 读取信号。
    pub async fn get_signal(&self, signal_id: &SignalId) -> Result<Signal, ManagerError> {
        Ok(self.signals.get_signal(signal_id).await?)
    }

    /// # Summary
    /// 运维侧信号查询 (只读)。
    pub async fn query_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, ManagerError> {
        Ok(self.signals.query_signals(filter).await?)
    }

    /// # Summary
    /// 列出某条信号的全部派发历史。
    pub async fn list_dispatches(
        &self,
        signal_id: &SignalId,
    ) -> Result<Vec<Dispatch>, ManagerError> {
        Ok(self.dispatches.list_for_signal(signal_id).await?)
    }

    /// # Summary
    /// 运维侧派发查询 (只读)。
    pub async fn query_dispatches(
        &self,
        filter: &DispatchFilter,
    ) -> Result<Vec<Dispatch>, ManagerError> {
        Ok(self.dispatches.query_dispatches(filter).await?)
    }

    /// # Summary
    /// 运维侧成交查询 (只读)。
    pub async fn query_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, ManagerError> {
        Ok(self.trades.query_trades(filter).await?)
    }

    /// 当前生效的调度参数 (供网关回显与 Worker 对齐心跳节奏)
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

impl std::fmt::Debug for DispatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
