use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use shingo_core::dispatch::entity::{Claim, Dispatch, DispatchId, DispatchStatus, Reclaimed};
use shingo_core::dispatch::port::{DispatchFilter, DispatchLedger};
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{AccountId, NewSignal, Signal, SignalId, SignalStatus};
use shingo_core::signal::port::{SignalFilter, SignalStore};
use shingo_core::trade::entity::{
    ExecutionReport, ExecutionTicket, SignalSnapshot, Trade, TradeId, TradeStatus,
};
use shingo_core::trade::port::{TradeFilter, TradeLedger};

#[derive(Default)]
struct Inner {
    signals: HashMap<String, Signal>,
    // alert_id -> signal id，幂等摄入索引
    alert_index: HashMap<String, String>,
    dispatches: HashMap<String, Dispatch>,
    // execution_ticket -> trade id
    ticket_index: HashMap<String, String>,
    trades: HashMap<String, Trade>,
}

/// # Summary
/// 基于内存的队列存储实现，供测试与嵌入场景替换 SQLite。
///
/// # Invariants
/// - 单把 `Mutex` 把所有认领与状态置换串行化 (单一仲裁者语义)：
///   同一时刻只有一个调用方能挑选候选信号，天然满足认领的原子性要求。
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn limited(limit: Option<u32>) -> usize {
    usize::try_from(limit.unwrap_or(100)).unwrap_or(usize::MAX)
}

impl Inner {
    fn active_dispatch_id(&self, signal_id: &str) -> Option<String> {
        self.dispatches
            .values()
            .find(|d| d.signal_id.0 == signal_id && d.status.is_active())
            .map(|d| d.id.0.clone())
    }

    fn next_retry_count(&self, signal_id: &str) -> i32 {
        self.dispatches
            .values()
            .filter(|d| d.signal_id.0 == signal_id)
            .map(|d| d.retry_count)
            .max()
            .map_or(0, |max| max + 1)
    }
}

#[async_trait]
impl SignalStore for MemoryQueueStore {
    async fn insert(&self, new: &NewSignal, now: DateTime<Utc>) -> Result<Signal, QueueError> {
        new.validate()?;
        let mut inner = self.inner.lock().await;

        if inner.alert_index.contains_key(&new.alert_id.0) {
            return Err(QueueError::Conflict(format!(
                "duplicate alert_id: {}",
                new.alert_id.0
            )));
        }

        let id = Uuid::new_v4().to_string();
        let signal = Signal {
            id: SignalId(id.clone()),
            alert_id: new.alert_id.clone(),
            account_id: new.account_id.clone(),
            symbol: new.symbol.clone(),
            direction: new.direction,
            order_type: new.order_type,
            priority: new.priority,
            status: SignalStatus::Pending,
            next_poll_at: now,
            acknowledged_at: None,
            last_heartbeat_at: None,
            executed_at: None,
            cancelled_at: None,
            reason: None,
            payload: new.payload.clone(),
            created_at: now,
            updated_at: now,
        };

        inner.alert_index.insert(new.alert_id.0.clone(), id.clone());
        inner.signals.insert(id, signal.clone());
        Ok(signal)
    }

    async fn get_signal(&self, id: &SignalId) -> Result<Signal, QueueError> {
        let inner = self.inner.lock().await;
        inner
            .signals
            .get(&id.0)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(format!("signal {}", id.0)))
    }

    async fn transition(
        &self,
        id: &SignalId,
        target: SignalStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Signal, QueueError> {
        let mut inner = self.inner.lock().await;

        let current_status = inner
            .signals
            .get(&id.0)
            .map(|s| s.status)
            .ok_or_else(|| QueueError::NotFound(format!("signal {}", id.0)))?;

        // 幂等：目标即当前状态
        if current_status == target {
            return Ok(inner.signals[&id.0].clone());
        }
        if !current_status.can_transition_to(target) {
            return Err(QueueError::Conflict(format!(
                "illegal transition {} -> {} for signal {}",
                current_status, target, id.0
            )));
        }

        let active_id = inner.active_dispatch_id(&id.0);

        if let Some(signal) = inner.signals.get_mut(&id.0) {
            signal.status = target;
            signal.reason = reason.map(str::to_string);
            signal.updated_at = now;
            match target {
                SignalStatus::Executed => signal.executed_at = Some(now),
                SignalStatus::Cancelled => signal.cancelled_at = Some(now),
                SignalStatus::Pending => signal.next_poll_at = now,
                _ => {}
            }
        }

        // 级联活动派发
        if let Some(dispatch_id) = active_id {
            if let Some(dispatch) = inner.dispatches.get_mut(&dispatch_id) {
                match target {
                    SignalStatus::Processing => {
                        if dispatch.status == DispatchStatus::Claimed {
                            dispatch.status = DispatchStatus::Processing;
                        }
                    }
                    SignalStatus::Executed => {
                        dispatch.status = DispatchStatus::Completed;
                        dispatch.completed_at = Some(now);
                    }
                    SignalStatus::Failed | SignalStatus::Cancelled | SignalStatus::Pending => {
                        dispatch.status = DispatchStatus::Failed;
                        dispatch.failed_at = Some(now);
                    }
                    _ => {}
                }
            }
        }

        Ok(inner.signals[&id.0].clone())
    }

    async fn query_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, QueueError> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Signal> = inner
            .signals
            .values()
            .filter(|s| filter.status.is_none_or(|want| s.status == want))
            .filter(|s| {
                filter
                    .account_id
                    .as_ref()
                    .is_none_or(|want| s.account_id.as_ref() == Some(want))
            })
            .filter(|s| filter.from.is_none_or(|from| s.created_at >= from))
            .filter(|s| filter.to.is_none_or(|to| s.created_at <= to))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limited(filter.limit));
        Ok(result)
    }
}

#[async_trait]
impl DispatchLedger for MemoryQueueStore {
    async fn claim_next(
        &self,
        worker_id: &str,
        account: Option<&AccountId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, QueueError> {
        let mut inner = self.inner.lock().await;

        // 单锁之内挑选即独占，不存在竞争者可抢走候选
        let mut candidates: Vec<(String, i32, DateTime<Utc>, DateTime<Utc>)> = inner
            .signals
            .values()
            .filter(|s| s.status == SignalStatus::Pending && s.next_poll_at <= now)
            .filter(|s| account.is_none_or(|want| s.account_id.as_ref() == Some(want)))
            .map(|s| (s.id.0.clone(), s.priority, s.next_poll_at, s.created_at))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.3.cmp(&b.3)));

        let Some((signal_id, _, _, _)) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let retry_count = inner.next_retry_count(&signal_id);

        let signal = {
            let Some(signal) = inner.signals.get_mut(&signal_id) else {
                return Ok(None);
            };
            signal.status = SignalStatus::Claimed;
            signal.acknowledged_at = Some(now);
            signal.last_heartbeat_at = Some(now);
            signal.updated_at = now;
            signal.clone()
        };

        let dispatch = Dispatch {
            id: DispatchId(Uuid::new_v4().to_string()),
            signal_id: SignalId(signal_id),
            worker_id: worker_id.to_string(),
            status: DispatchStatus::Claimed,
            retry_count,
            claimed_at: now,
            last_heartbeat_at: now,
            completed_at: None,
            failed_at: None,
            metadata: serde_json::json!({}),
        };
        inner
            .dispatches
            .insert(dispatch.id.0.clone(), dispatch.clone());

        Ok(Some(Claim { signal, dispatch }))
    }

    async fn heartbeat(
        &self,
        dispatch_id: &DispatchId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;

        let (signal_id, status, owner) = inner
            .dispatches
            .get(&dispatch_id.0)
            .map(|d| (d.signal_id.0.clone(), d.status, d.worker_id.clone()))
            .ok_or_else(|| QueueError::NotFound(format!("dispatch {}", dispatch_id.0)))?;

        if owner != worker_id {
            return Err(QueueError::LeaseExpired(format!(
                "dispatch {} is owned by {}, not {}",
                dispatch_id.0, owner, worker_id
            )));
        }

        match status {
            DispatchStatus::Claimed | DispatchStatus::Processing => {}
            DispatchStatus::Completed => return Ok(()),
            DispatchStatus::Failed => {
                return Err(QueueError::LeaseExpired(format!(
                    "lease on dispatch {} was reclaimed",
                    dispatch_id.0
                )));
            }
        }

        if let Some(dispatch) = inner.dispatches.get_mut(&dispatch_id.0) {
            dispatch.last_heartbeat_at = now;
        }
        if let Some(signal) = inner.signals.get_mut(&signal_id) {
            signal.last_heartbeat_at = Some(now);
            signal.updated_at = now;
        }
        Ok(())
    }

    async fn get_dispatch(&self, dispatch_id: &DispatchId) -> Result<Dispatch, QueueError> {
        let inner = self.inner.lock().await;
        inner
            .dispatches
            .get(&dispatch_id.0)
            .cloned()
            .ok_or_else(|| QueueError::NotFound(format!("dispatch {}", dispatch_id.0)))
    }

    async fn reclaim_expired(
        &self,
        deadline: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reclaimed>, QueueError> {
        let mut inner = self.inner.lock().await;

        let expired: Vec<(String, String, i32)> = inner
            .dispatches
            .values()
            .filter(|d| d.status.is_active() && d.last_heartbeat_at < deadline)
            .map(|d| (d.id.0.clone(), d.signal_id.0.clone(), d.retry_count))
            .collect();

        let mut reclaimed = Vec::new();
        for (dispatch_id, signal_id, retry_count) in expired {
            if let Some(dispatch) = inner.dispatches.get_mut(&dispatch_id) {
                dispatch.status = DispatchStatus::Failed;
                dispatch.failed_at = Some(now);
            }

            let exhausted = retry_count + 1 > max_retries;
            if let Some(signal) = inner.signals.get_mut(&signal_id) {
                if !signal.status.is_terminal() {
                    if exhausted {
                        signal.status = SignalStatus::Failed;
                        signal.reason = Some(format!(
                            "retry limit exhausted after {} attempts",
                            retry_count + 1
                        ));
                    } else {
                        signal.status = SignalStatus::Pending;
                        signal.next_poll_at = now;
                        signal.reason = Some("lease expired".to_string());
                    }
                    signal.updated_at = now;
                }
            }

            reclaimed.push(Reclaimed {
                dispatch_id: DispatchId(dispatch_id),
                signal_id: SignalId(signal_id),
                retry_count,
                exhausted,
            });
        }

        Ok(reclaimed)
    }

    async fn list_for_signal(&self, signal_id: &SignalId) -> Result<Vec<Dispatch>, QueueError> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Dispatch> = inner
            .dispatches
            .values()
            .filter(|d| d.signal_id == *signal_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.claimed_at.cmp(&b.claimed_at));
        Ok(result)
    }

    async fn query_dispatches(&self, filter: &DispatchFilter) -> Result<Vec<Dispatch>, QueueError> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Dispatch> = inner
            .dispatches
            .values()
            .filter(|d| filter.status.is_none_or(|want| d.status == want))
            .filter(|d| {
                filter
                    .worker_id
                    .as_deref()
                    .is_none_or(|want| d.worker_id == want)
            })
            .filter(|d| filter.from.is_none_or(|from| d.claimed_at >= from))
            .filter(|d| filter.to.is_none_or(|to| d.claimed_at <= to))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.claimed_at.cmp(&a.claimed_at));
        result.truncate(limited(filter.limit));
        Ok(result)
    }
}

#[async_trait]
impl TradeLedger for MemoryQueueStore {
    async fn upsert(
        &self,
        signal_id: &SignalId,
        account_id: &AccountId,
        snapshot: &SignalSnapshot,
        report: &ExecutionReport,
        now: DateTime<Utc>,
    ) -> Result<Trade, QueueError> {
        let mut inner = self.inner.lock().await;

        if let Some(trade_id) = inner.ticket_index.get(&report.ticket.0).cloned() {
            let Some(trade) = inner.trades.get_mut(&trade_id) else {
                return Err(QueueError::Database(format!(
                    "ticket index points to missing trade {}",
                    trade_id
                )));
            };
            if trade.signal_id.as_ref() != Some(signal_id) {
                return Err(QueueError::Conflict(format!(
                    "execution ticket {} already recorded for another signal",
                    report.ticket.0
                )));
            }

            trade.status = report.status;
            if report.price.is_some() {
                trade.price = report.price;
            }
            if report.stop_loss.is_some() {
                trade.stop_loss = report.stop_loss;
            }
            if report.take_profit.is_some() {
                trade.take_profit = report.take_profit;
            }
            trade.payload = report.payload.clone();
            if report.status == TradeStatus::Filled && trade.filled_at.is_none() {
                trade.filled_at = Some(now);
            }
            if report.status == TradeStatus::Closed && trade.closed_at.is_none() {
                trade.closed_at = Some(now);
            }
            trade.updated_at = now;
            return Ok(trade.clone());
        }

        let trade = Trade {
            id: TradeId(Uuid::new_v4().to_string()),
            signal_id: Some(signal_id.clone()),
            account_id: account_id.clone(),
            ticket: report.ticket.clone(),
            status: report.status,
            symbol: snapshot.symbol.clone(),
            direction: snapshot.direction,
            order_type: snapshot.order_type,
            price: report.price,
            stop_loss: report.stop_loss,
            take_profit: report.take_profit,
            payload: report.payload.clone(),
            opened_at: now,
            filled_at: (report.status == TradeStatus::Filled).then_some(now),
            closed_at: (report.status == TradeStatus::Closed).then_some(now),
            updated_at: now,
        };
        inner
            .ticket_index
            .insert(report.ticket.0.clone(), trade.id.0.clone());
        inner.trades.insert(trade.id.0.clone(), trade.clone());
        Ok(trade)
    }

    async fn get_by_ticket(&self, ticket: &ExecutionTicket) -> Result<Option<Trade>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ticket_index
            .get(&ticket.0)
            .and_then(|id| inner.trades.get(id))
            .cloned())
    }

    async fn query_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, QueueError> {
        let inner = self.inner.lock().await;
        let mut result: Vec<Trade> = inner
            .trades
            .values()
            .filter(|t| filter.status.is_none_or(|want| t.status == want))
            .filter(|t| {
                filter
                    .account_id
                    .as_ref()
                    .is_none_or(|want| t.account_id == *want)
            })
            .filter(|t| filter.from.is_none_or(|from| t.opened_at >= from))
            .filter(|t| filter.to.is_none_or(|to| t.opened_at <= to))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.opened_at.cmp(&a.opened_at));
        result.truncate(limited(filter.limit));
        Ok(result)
    }
}
