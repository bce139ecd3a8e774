use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use shingo_core::dispatch::entity::{Claim, Dispatch, DispatchId, DispatchStatus, Reclaimed};
use shingo_core::dispatch::port::{DispatchFilter, DispatchLedger};
use shingo_core::error::QueueError;
use shingo_core::signal::entity::{AccountId, AlertId, NewSignal, Signal, SignalId, SignalStatus};
use shingo_core::signal::port::{SignalFilter, SignalStore};
use shingo_core::trade::entity::{
    ExecutionReport, ExecutionTicket, SignalSnapshot, Trade, TradeId, TradeStatus,
};
use shingo_core::trade::port::{TradeFilter, TradeLedger};

/// 认领时单轮扫描的候选条数上限
const CLAIM_CANDIDATE_BATCH: i64 = 8;

const SIGNAL_COLS: &str = "id, alert_id, account_id, symbol, direction, order_type, priority, \
     status, next_poll_at, acknowledged_at, last_heartbeat_at, executed_at, cancelled_at, \
     reason, payload, created_at, updated_at";

const DISPATCH_COLS: &str = "id, signal_id, worker_id, status, retry_count, claimed_at, \
     last_heartbeat_at, completed_at, failed_at, metadata";

const TRADE_COLS: &str = "id, signal_id, account_id, execution_ticket, status, symbol, \
     direction, order_type, price, stop_loss, take_profit, payload, opened_at, filled_at, \
     closed_at, updated_at";

/// # Summary
/// 调度队列的 SQLite 实现：单库三表 (signals / dispatches / trades)。
///
/// # Invariants
/// - 连接池限制为单连接 + WAL，写入天然串行化；所有状态置换仍带
///   `WHERE status = <预期>` 的 CAS 守卫，同一数据库文件被多进程共享时依旧安全。
/// - 认领的"选中 + 置为 claimed + 追加派发行"在同一事务内完成，
///   竞争失败的候选被跳过而不是阻塞等待。
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// # Summary
    /// 打开 (必要时创建) 队列数据库并建表。
    pub async fn new() -> Result<Self, QueueError> {
        let base_path = crate::config::get_root_dir().join("queue");
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)
                .map_err(|e| QueueError::Database(format!("Failed to create queue dir: {}", e)))?;
        }

        let db_path = base_path.join("queue.db");
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                alert_id TEXT NOT NULL UNIQUE,
                account_id TEXT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                order_type TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                next_poll_at DATETIME NOT NULL,
                acknowledged_at DATETIME,
                last_heartbeat_at DATETIME,
                executed_at DATETIME,
                cancelled_at DATETIME,
                reason TEXT,
                payload TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_signals_claimable
                ON signals (status, next_poll_at, priority);

            CREATE TABLE IF NOT EXISTS dispatches (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                worker_id TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL,
                claimed_at DATETIME NOT NULL,
                last_heartbeat_at DATETIME NOT NULL,
                completed_at DATETIME,
                failed_at DATETIME,
                metadata TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_dispatches_signal ON dispatches (signal_id);
            CREATE INDEX IF NOT EXISTS idx_dispatches_active
                ON dispatches (status, last_heartbeat_at);

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                signal_id TEXT,
                account_id TEXT NOT NULL,
                execution_ticket TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                order_type TEXT NOT NULL,
                price TEXT,
                stop_loss TEXT,
                take_profit TEXT,
                payload TEXT NOT NULL,
                opened_at DATETIME NOT NULL,
                filled_at DATETIME,
                closed_at DATETIME,
                updated_at DATETIME NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        info!("Queue store ready at {}", db_path.display());
        Ok(Self { pool })
    }

    async fn fetch_signal(&self, id: &SignalId) -> Result<Signal, QueueError> {
        let row = sqlx::query(&format!("SELECT {} FROM signals WHERE id = ?", SIGNAL_COLS))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| QueueError::NotFound(format!("signal {}", id.0)))?;
        row_to_signal(&row)
    }
}

fn db_err(e: sqlx::Error) -> QueueError {
    QueueError::Database(e.to_string())
}

fn parse_err(e: String) -> QueueError {
    QueueError::Database(e)
}

fn json_to_str(v: &serde_json::Value) -> String {
    v.to_string()
}

fn str_to_json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or(serde_json::Value::Null)
}

fn decimal_to_str(d: Option<Decimal>) -> Option<String> {
    d.map(|v| v.to_string())
}

fn str_to_decimal(s: Option<String>) -> Result<Option<Decimal>, QueueError> {
    match s {
        None => Ok(None),
        Some(raw) => Decimal::from_str(&raw)
            .map(Some)
            .map_err(|e| QueueError::Database(format!("bad decimal '{}': {}", raw, e))),
    }
}

fn row_to_signal(row: &SqliteRow) -> Result<Signal, QueueError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let direction: String = row.try_get("direction").map_err(db_err)?;
    let order_type: String = row.try_get("order_type").map_err(db_err)?;
    let payload: String = row.try_get("payload").map_err(db_err)?;
    let account: Option<String> = row.try_get("account_id").map_err(db_err)?;

    Ok(Signal {
        id: SignalId(row.try_get("id").map_err(db_err)?),
        alert_id: AlertId(row.try_get("alert_id").map_err(db_err)?),
        account_id: account.map(AccountId),
        symbol: row.try_get("symbol").map_err(db_err)?,
        direction: direction.parse().map_err(parse_err)?,
        order_type: order_type.parse().map_err(parse_err)?,
        priority: row.try_get("priority").map_err(db_err)?,
        status: status.parse().map_err(parse_err)?,
        next_poll_at: row.try_get("next_poll_at").map_err(db_err)?,
        acknowledged_at: row.try_get("acknowledged_at").map_err(db_err)?,
        last_heartbeat_at: row.try_get("last_heartbeat_at").map_err(db_err)?,
        executed_at: row.try_get("executed_at").map_err(db_err)?,
        cancelled_at: row.try_get("cancelled_at").map_err(db_err)?,
        reason: row.try_get("reason").map_err(db_err)?,
        payload: str_to_json(&payload),
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn row_to_dispatch(row: &SqliteRow) -> Result<Dispatch, QueueError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let metadata: String = row.try_get("metadata").map_err(db_err)?;

    Ok(Dispatch {
        id: DispatchId(row.try_get("id").map_err(db_err)?),
        signal_id: SignalId(row.try_get("signal_id").map_err(db_err)?),
        worker_id: row.try_get("worker_id").map_err(db_err)?,
        status: status.parse().map_err(parse_err)?,
        retry_count: row.try_get("retry_count").map_err(db_err)?,
        claimed_at: row.try_get("claimed_at").map_err(db_err)?,
        last_heartbeat_at: row.try_get("last_heartbeat_at").map_err(db_err)?,
        completed_at: row.try_get("completed_at").map_err(db_err)?,
        failed_at: row.try_get("failed_at").map_err(db_err)?,
        metadata: str_to_json(&metadata),
    })
}

fn row_to_trade(row: &SqliteRow) -> Result<Trade, QueueError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let direction: String = row.try_get("direction").map_err(db_err)?;
    let order_type: String = row.try_get("order_type").map_err(db_err)?;
    let payload: String = row.try_get("payload").map_err(db_err)?;
    let signal_id: Option<String> = row.try_get("signal_id").map_err(db_err)?;
    let price: Option<String> = row.try_get("price").map_err(db_err)?;
    let stop_loss: Option<String> = row.try_get("stop_loss").map_err(db_err)?;
    let take_profit: Option<String> = row.try_get("take_profit").map_err(db_err)?;

    Ok(Trade {
        id: TradeId(row.try_get("id").map_err(db_err)?),
        signal_id: signal_id.map(SignalId),
        account_id: AccountId(row.try_get("account_id").map_err(db_err)?),
        ticket: ExecutionTicket(row.try_get("execution_ticket").map_err(db_err)?),
        status: status.parse().map_err(parse_err)?,
        symbol: row.try_get("symbol").map_err(db_err)?,
        direction: direction.parse().map_err(parse_err)?,
        order_type: order_type.parse().map_err(parse_err)?,
        price: str_to_decimal(price)?,
        stop_loss: str_to_decimal(stop_loss)?,
        take_profit: str_to_decimal(take_profit)?,
        payload: str_to_json(&payload),
        opened_at: row.try_get("opened_at").map_err(db_err)?,
        filled_at: row.try_get("filled_at").map_err(db_err)?,
        closed_at: row.try_get("closed_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

#[async_trait]
impl SignalStore for SqliteQueueStore {
    async fn insert(&self, new: &NewSignal, now: DateTime<Utc>) -> Result<Signal, QueueError> {
        new.validate()?;
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO signals
                (id, alert_id, account_id, symbol, direction, order_type, priority,
                 status, next_poll_at, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&new.alert_id.0)
        .bind(new.account_id.as_ref().map(|a| a.0.clone()))
        .bind(&new.symbol)
        .bind(new.direction.to_string())
        .bind(new.order_type.to_string())
        .bind(new.priority)
        .bind(SignalStatus::Pending.to_string())
        .bind(now)
        .bind(json_to_str(&new.payload))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                QueueError::Conflict(format!("duplicate alert_id: {}", new.alert_id.0))
            }
            _ => db_err(e),
        })?;

        self.fetch_signal(&SignalId(id)).await
    }

    async fn get_signal(&self, id: &SignalId) -> Result<Signal, QueueError> {
        self.fetch_signal(id).await
    }

    async fn transition(
        &self,
        id: &SignalId,
        target: SignalStatus,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Signal, QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!("SELECT {} FROM signals WHERE id = ?", SIGNAL_COLS))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| QueueError::NotFound(format!("signal {}", id.0)))?;
        let current = row_to_signal(&row)?;

        // 幂等：目标即当前状态时直接成功，不触碰任何时间戳
        if current.status == target {
            return Ok(current);
        }

        if !current.status.can_transition_to(target) {
            return Err(QueueError::Conflict(format!(
                "illegal transition {} -> {} for signal {}",
                current.status, target, id.0
            )));
        }

        // CAS：以读取到的状态为置换前提，被并发迁移抢先则拒绝
        let result = match target {
            SignalStatus::Executed => {
                sqlx::query(
                    "UPDATE signals SET status = ?, executed_at = ?, reason = ?, updated_at = ? \
                     WHERE id = ? AND status = ?",
                )
                .bind(target.to_string())
                .bind(now)
                .bind(reason)
                .bind(now)
                .bind(&id.0)
                .bind(current.status.to_string())
                .execute(&mut *tx)
                .await
            }
            SignalStatus::Cancelled => {
                sqlx::query(
                    "UPDATE signals SET status = ?, cancelled_at = ?, reason = ?, updated_at = ? \
                     WHERE id = ? AND status = ?",
                )
                .bind(target.to_string())
                .bind(now)
                .bind(reason)
                .bind(now)
                .bind(&id.0)
                .bind(current.status.to_string())
                .execute(&mut *tx)
                .await
            }
            SignalStatus::Pending => {
                // 重排队：立即恢复可见
                sqlx::query(
                    "UPDATE signals SET status = ?, next_poll_at = ?, reason = ?, updated_at = ? \
                     WHERE id = ? AND status = ?",
                )
                .bind(target.to_string())
                .bind(now)
                .bind(reason)
                .bind(now)
                .bind(&id.0)
                .bind(current.status.to_string())
                .execute(&mut *tx)
                .await
            }
            _ => {
                sqlx::query(
                    "UPDATE signals SET status = ?, reason = ?, updated_at = ? \
                     WHERE id = ? AND status = ?",
                )
                .bind(target.to_string())
                .bind(reason)
                .bind(now)
                .bind(&id.0)
                .bind(current.status.to_string())
                .execute(&mut *tx)
                .await
            }
        }
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Conflict(format!(
                "signal {} was concurrently transitioned away from {}",
                id.0, current.status
            )));
        }

        // 同一事务内级联活动派发，保证信号与派发行的状态观感一致
        let dispatch_target = match target {
            SignalStatus::Processing => Some(DispatchStatus::Processing),
            SignalStatus::Executed => Some(DispatchStatus::Completed),
            SignalStatus::Failed | SignalStatus::Cancelled | SignalStatus::Pending => {
                Some(DispatchStatus::Failed)
            }
            _ => None,
        };

        if let Some(d_target) = dispatch_target {
            let active = sqlx::query(
                "SELECT id, status FROM dispatches \
                 WHERE signal_id = ? AND status IN ('claimed', 'processing') LIMIT 1",
            )
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            if let Some(active_row) = active {
                let dispatch_id: String = active_row.try_get("id").map_err(db_err)?;
                match d_target {
                    DispatchStatus::Processing => {
                        sqlx::query(
                            "UPDATE dispatches SET status = 'processing' \
                             WHERE id = ? AND status = 'claimed'",
                        )
                        .bind(&dispatch_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                    }
                    DispatchStatus::Completed => {
                        sqlx::query(
                            "UPDATE dispatches SET status = 'completed', completed_at = ? \
                             WHERE id = ? AND status IN ('claimed', 'processing')",
                        )
                        .bind(now)
                        .bind(&dispatch_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                    }
                    _ => {
                        sqlx::query(
                            "UPDATE dispatches SET status = 'failed', failed_at = ? \
                             WHERE id = ? AND status IN ('claimed', 'processing')",
                        )
                        .bind(now)
                        .bind(&dispatch_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(db_err)?;
                    }
                }
            }
        }

        let refreshed = sqlx::query(&format!("SELECT {} FROM signals WHERE id = ?", SIGNAL_COLS))
            .bind(&id.0)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let signal = row_to_signal(&refreshed)?;

        tx.commit().await.map_err(db_err)?;
        Ok(signal)
    }

    async fn query_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, QueueError> {
        let limit = i64::from(filter.limit.unwrap_or(100));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM signals \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR account_id = ?2) \
               AND (?3 IS NULL OR created_at >= ?3) \
               AND (?4 IS NULL OR created_at <= ?4) \
             ORDER BY created_at DESC LIMIT ?5",
            SIGNAL_COLS
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.account_id.as_ref().map(|a| a.0.clone()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_signal).collect()
    }
}

#[async_trait]
impl DispatchLedger for SqliteQueueStore {
    async fn claim_next(
        &self,
        worker_id: &str,
        account: Option<&AccountId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let candidates = sqlx::query(
            "SELECT id FROM signals \
             WHERE status = 'pending' AND next_poll_at <= ?1 \
               AND (?2 IS NULL OR account_id = ?2) \
             ORDER BY priority DESC, next_poll_at ASC, created_at ASC LIMIT ?3",
        )
        .bind(now)
        .bind(account.map(|a| a.0.clone()))
        .bind(CLAIM_CANDIDATE_BATCH)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        for candidate in &candidates {
            let signal_id: String = candidate.try_get("id").map_err(db_err)?;

            // 原子置换：竞争者已抢走该候选时影响行数为 0，跳到下一条而不是等待
            let marked = sqlx::query(
                "UPDATE signals \
                 SET status = 'claimed', acknowledged_at = ?, last_heartbeat_at = ?, updated_at = ? \
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(&signal_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if marked.rows_affected() == 0 {
                continue;
            }

            // retry_count = 该信号历史派发的最大序号 + 1，首次认领为 0
            let retry_count: i32 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(retry_count) + 1, 0) FROM dispatches WHERE signal_id = ?",
            )
            .bind(&signal_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            let dispatch_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO dispatches \
                     (id, signal_id, worker_id, status, retry_count, claimed_at, \
                      last_heartbeat_at, metadata) \
                 VALUES (?, ?, ?, 'claimed', ?, ?, ?, '{}')",
            )
            .bind(&dispatch_id)
            .bind(&signal_id)
            .bind(worker_id)
            .bind(retry_count)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            let signal_row =
                sqlx::query(&format!("SELECT {} FROM signals WHERE id = ?", SIGNAL_COLS))
                    .bind(&signal_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            let dispatch_row = sqlx::query(&format!(
                "SELECT {} FROM dispatches WHERE id = ?",
                DISPATCH_COLS
            ))
            .bind(&dispatch_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            let claim = Claim {
                signal: row_to_signal(&signal_row)?,
                dispatch: row_to_dispatch(&dispatch_row)?,
            };

            tx.commit().await.map_err(db_err)?;
            return Ok(Some(claim));
        }

        Ok(None)
    }

    async fn heartbeat(
        &self,
        dispatch_id: &DispatchId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM dispatches WHERE id = ?",
            DISPATCH_COLS
        ))
        .bind(&dispatch_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| QueueError::NotFound(format!("dispatch {}", dispatch_id.0)))?;
        let dispatch = row_to_dispatch(&row)?;

        if dispatch.worker_id != worker_id {
            // 僵尸 Worker 防御：派发已被重新分配给其他 Worker
            return Err(QueueError::LeaseExpired(format!(
                "dispatch {} is owned by {}, not {}",
                dispatch_id.0, dispatch.worker_id, worker_id
            )));
        }

        match dispatch.status {
            DispatchStatus::Claimed | DispatchStatus::Processing => {}
            // 自己完成后的迟到心跳无害，幂等成功
            DispatchStatus::Completed => return Ok(()),
            DispatchStatus::Failed => {
                return Err(QueueError::LeaseExpired(format!(
                    "lease on dispatch {} was reclaimed",
                    dispatch_id.0
                )));
            }
        }

        sqlx::query("UPDATE dispatches SET last_heartbeat_at = ? WHERE id = ?")
            .bind(now)
            .bind(&dispatch_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("UPDATE signals SET last_heartbeat_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(&dispatch.signal_id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_dispatch(&self, dispatch_id: &DispatchId) -> Result<Dispatch, QueueError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM dispatches WHERE id = ?",
            DISPATCH_COLS
        ))
        .bind(&dispatch_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| QueueError::NotFound(format!("dispatch {}", dispatch_id.0)))?;
        row_to_dispatch(&row)
    }

    async fn reclaim_expired(
        &self,
        deadline: DateTime<Utc>,
        max_retries: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reclaimed>, QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let expired = sqlx::query(
            "SELECT id, signal_id, retry_count FROM dispatches \
             WHERE status IN ('claimed', 'processing') AND last_heartbeat_at < ?",
        )
        .bind(deadline)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut reclaimed = Vec::new();

        for row in &expired {
            let dispatch_id: String = row.try_get("id").map_err(db_err)?;
            let signal_id: String = row.try_get("signal_id").map_err(db_err)?;
            let retry_count: i32 = row.try_get("retry_count").map_err(db_err)?;

            // CAS 守卫：并发扫描实例已处理过的行直接跳过
            let failed = sqlx::query(
                "UPDATE dispatches SET status = 'failed', failed_at = ? \
                 WHERE id = ? AND status IN ('claimed', 'processing')",
            )
            .bind(now)
            .bind(&dispatch_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            if failed.rows_affected() == 0 {
                continue;
            }

            let exhausted = retry_count + 1 > max_retries;
            if exhausted {
                // 重试耗尽：信号落入终态 failed 而不是继续循环
                sqlx::query(
                    "UPDATE signals SET status = 'failed', reason = ?, updated_at = ? \
                     WHERE id = ? AND status IN ('claimed', 'processing')",
                )
                .bind(format!("retry limit exhausted after {} attempts", retry_count + 1))
                .bind(now)
                .bind(&signal_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            } else {
                // 重新排队，立即恢复可认领
                sqlx::query(
                    "UPDATE signals \
                     SET status = 'pending', next_poll_at = ?, reason = 'lease expired', \
                         updated_at = ? \
                     WHERE id = ? AND status IN ('claimed', 'processing')",
                )
                .bind(now)
                .bind(now)
                .bind(&signal_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }

            reclaimed.push(Reclaimed {
                dispatch_id: DispatchId(dispatch_id),
                signal_id: SignalId(signal_id),
                retry_count,
                exhausted,
            });
        }

        tx.commit().await.map_err(db_err)?;

        if !reclaimed.is_empty() {
            warn!("Reclaimed {} expired lease(s)", reclaimed.len());
        }
        Ok(reclaimed)
    }

    async fn list_for_signal(&self, signal_id: &SignalId) -> Result<Vec<Dispatch>, QueueError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM dispatches WHERE signal_id = ? ORDER BY claimed_at ASC",
            DISPATCH_COLS
        ))
        .bind(&signal_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_dispatch).collect()
    }

    async fn query_dispatches(&self, filter: &DispatchFilter) -> Result<Vec<Dispatch>, QueueError> {
        let limit = i64::from(filter.limit.unwrap_or(100));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM dispatches \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR worker_id = ?2) \
               AND (?3 IS NULL OR claimed_at >= ?3) \
               AND (?4 IS NULL OR claimed_at <= ?4) \
             ORDER BY claimed_at DESC LIMIT ?5",
            DISPATCH_COLS
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.worker_id.clone())
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_dispatch).collect()
    }
}

#[async_trait]
impl TradeLedger for SqliteQueueStore {
    async fn upsert(
        &self,
        signal_id: &SignalId,
        account_id: &AccountId,
        snapshot: &SignalSnapshot,
        report: &ExecutionReport,
        now: DateTime<Utc>,
    ) -> Result<Trade, QueueError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let existing = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE execution_ticket = ?",
            TRADE_COLS
        ))
        .bind(&report.ticket.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let filled_at = (report.status == TradeStatus::Filled).then_some(now);
        let closed_at = (report.status == TradeStatus::Closed).then_some(now);

        let trade_id = match existing {
            Some(row) => {
                let current = row_to_trade(&row)?;
                // 同一票据被挂到另一条信号上属于票据冲突，拒绝而非覆盖
                if current.signal_id.as_ref() != Some(signal_id) {
                    return Err(QueueError::Conflict(format!(
                        "execution ticket {} already recorded for another signal",
                        report.ticket.0
                    )));
                }

                sqlx::query(
                    "UPDATE trades \
                     SET status = ?, price = COALESCE(?, price), \
                         stop_loss = COALESCE(?, stop_loss), \
                         take_profit = COALESCE(?, take_profit), payload = ?, \
                         filled_at = COALESCE(filled_at, ?), \
                         closed_at = COALESCE(closed_at, ?), updated_at = ? \
                     WHERE execution_ticket = ?",
                )
                .bind(report.status.to_string())
                .bind(decimal_to_str(report.price))
                .bind(decimal_to_str(report.stop_loss))
                .bind(decimal_to_str(report.take_profit))
                .bind(json_to_str(&report.payload))
                .bind(filled_at)
                .bind(closed_at)
                .bind(now)
                .bind(&report.ticket.0)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

                current.id.0
            }
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    "INSERT INTO trades \
                         (id, signal_id, account_id, execution_ticket, status, symbol, \
                          direction, order_type, price, stop_loss, take_profit, payload, \
                          opened_at, filled_at, closed_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&signal_id.0)
                .bind(&account_id.0)
                .bind(&report.ticket.0)
                .bind(report.status.to_string())
                .bind(&snapshot.symbol)
                .bind(snapshot.direction.to_string())
                .bind(snapshot.order_type.to_string())
                .bind(decimal_to_str(report.price))
                .bind(decimal_to_str(report.stop_loss))
                .bind(decimal_to_str(report.take_profit))
                .bind(json_to_str(&report.payload))
                .bind(now)
                .bind(filled_at)
                .bind(closed_at)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| match &e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => {
                        QueueError::Conflict(format!(
                            "execution ticket race on {}",
                            report.ticket.0
                        ))
                    }
                    _ => db_err(e),
                })?;
                id
            }
        };

        let refreshed = sqlx::query(&format!("SELECT {} FROM trades WHERE id = ?", TRADE_COLS))
            .bind(&trade_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let trade = row_to_trade(&refreshed)?;

        tx.commit().await.map_err(db_err)?;
        Ok(trade)
    }

    async fn get_by_ticket(&self, ticket: &ExecutionTicket) -> Result<Option<Trade>, QueueError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE execution_ticket = ?",
            TRADE_COLS
        ))
        .bind(&ticket.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(row_to_trade).transpose()
    }

    async fn query_trades(&self, filter: &TradeFilter) -> Result<Vec<Trade>, QueueError> {
        let limit = i64::from(filter.limit.unwrap_or(100));
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades \
             WHERE (?1 IS NULL OR status = ?1) \
               AND (?2 IS NULL OR account_id = ?2) \
               AND (?3 IS NULL OR opened_at >= ?3) \
               AND (?4 IS NULL OR opened_at <= ?4) \
             ORDER BY opened_at DESC LIMIT ?5",
            TRADE_COLS
        ))
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.account_id.as_ref().map(|a| a.0.clone()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_trade).collect()
    }
}
