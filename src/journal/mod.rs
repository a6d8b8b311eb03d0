use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::types::{
    Environment, ExitReason, NewTrade, Side, StrategyKey, TradeRecord, TradeStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
    Error,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "active",
            StrategyStatus::Paused => "paused",
            StrategyStatus::Stopped => "stopped",
            StrategyStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(StrategyStatus::Active),
            "paused" => Some(StrategyStatus::Paused),
            "stopped" => Some(StrategyStatus::Stopped),
            "error" => Some(StrategyStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastAction {
    ManualStart,
    ManualStop,
    AutoResume,
    AutoResumeSkipped,
    AutoResumeFailed,
}

impl LastAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LastAction::ManualStart => "manual_start",
            LastAction::ManualStop => "manual_stop",
            LastAction::AutoResume => "auto_resume",
            LastAction::AutoResumeSkipped => "auto_resume_skipped",
            LastAction::AutoResumeFailed => "auto_resume_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_start" => Some(LastAction::ManualStart),
            "manual_stop" => Some(LastAction::ManualStop),
            "auto_resume" => Some(LastAction::AutoResume),
            "auto_resume_skipped" => Some(LastAction::AutoResumeSkipped),
            "auto_resume_failed" => Some(LastAction::AutoResumeFailed),
            _ => None,
        }
    }
}

/// One row of the `user_strategies` table: persisted lifecycle state for a
/// strategy instance, the source of truth for auto-resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyStatusRow {
    pub key: StrategyKey,
    pub status: StrategyStatus,
    pub last_action: LastAction,
    pub config: serde_json::Value,
    pub auto_reconnect: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub error_count: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TradeFilter {
    pub user_id: Option<String>,
    pub instrument: Option<String>,
    pub status: Option<TradeStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Authoritative record of trades and strategy status. Shared by all
/// executors; every operation is a single short transaction.
pub struct TradeJournal {
    pool: SqlitePool,
}

impl TradeJournal {
    pub async fn new(db_url: &str) -> Result<Self> {
        info!("Initializing trade journal at: {}", db_url);

        let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let journal = Self { pool };
        journal.create_schema().await?;

        info!("Trade journal initialized");
        Ok(journal)
    }

    /// Single-connection in-memory journal for tests and ephemeral runs.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let journal = Self { pool };
        journal.create_schema().await?;
        Ok(journal)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                instrument TEXT NOT NULL,
                broker TEXT NOT NULL,
                environment TEXT NOT NULL,
                side TEXT NOT NULL,
                entry_order_id TEXT NOT NULL,
                sl_order_id TEXT,
                tp_order_id TEXT,
                entry_price TEXT NOT NULL,
                amount TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                status TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                closed_at TEXT,
                exit_price TEXT,
                exit_reason TEXT,
                pnl TEXT,
                pnl_percentage TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_owner
            ON trades(user_id, strategy_name, instrument, broker, environment)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_strategies (
                user_id TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                instrument TEXT NOT NULL,
                broker TEXT NOT NULL,
                environment TEXT NOT NULL,
                status TEXT NOT NULL,
                last_action TEXT NOT NULL,
                config TEXT NOT NULL,
                auto_reconnect INTEGER NOT NULL DEFAULT 1,
                connected_at TEXT,
                last_heartbeat TEXT,
                error_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                PRIMARY KEY (user_id, strategy_name, instrument, broker, environment)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_user_strategies_resume
            ON user_strategies(status, auto_reconnect)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -- trades ----------------------------------------------------------

    /// Inserts an `open` trade row and returns its id.
    pub async fn record_trade(&self, trade: &NewTrade) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, user_id, strategy_name, instrument, broker, environment,
                side, entry_order_id, sl_order_id, tp_order_id,
                entry_price, amount, stop_loss, take_profit,
                status, opened_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&trade.user_id)
        .bind(&trade.strategy_name)
        .bind(&trade.instrument)
        .bind(&trade.broker)
        .bind(trade.environment.as_str())
        .bind(trade.side.as_str())
        .bind(&trade.entry_order_id)
        .bind(trade.sl_order_id.as_deref())
        .bind(trade.tp_order_id.as_deref())
        .bind(trade.entry_price.to_string())
        .bind(trade.amount.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(TradeStatus::Open.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Closes an open trade. A second close of the same row is a no-op, so
    /// watcher and reconciliation passes can race safely.
    pub async fn close_trade(
        &self,
        trade_id: &str,
        exit_price: Decimal,
        exit_reason: ExitReason,
        pnl: Decimal,
        pnl_percentage: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET status = ?, closed_at = ?, exit_price = ?, exit_reason = ?,
                pnl = ?, pnl_percentage = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(TradeStatus::Closed.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(exit_price.to_string())
        .bind(exit_reason.as_str())
        .bind(pnl.to_string())
        .bind(pnl_percentage.to_string())
        .bind(trade_id)
        .bind(TradeStatus::Open.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rewrites protective order ids after a stop move.
    pub async fn update_order_ids(
        &self,
        trade_id: &str,
        sl_order_id: Option<&str>,
        tp_order_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET sl_order_id = COALESCE(?, sl_order_id),
                tp_order_id = COALESCE(?, tp_order_id)
            WHERE id = ?
            "#,
        )
        .bind(sl_order_id)
        .bind(tp_order_id)
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_stops(
        &self,
        trade_id: &str,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET stop_loss = COALESCE(?, stop_loss),
                take_profit = COALESCE(?, take_profit)
            WHERE id = ?
            "#,
        )
        .bind(stop_loss.map(|v| v.to_string()))
        .bind(take_profit.map(|v| v.to_string()))
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<TradeRecord>> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| trade_from_row(&r)).transpose()
    }

    /// Open trades for one strategy key, oldest first.
    pub async fn open_trades_for_key(&self, key: &StrategyKey) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trades
            WHERE user_id = ? AND strategy_name = ? AND instrument = ?
              AND broker = ? AND environment = ? AND status = ?
            ORDER BY opened_at ASC
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.strategy_name)
        .bind(&key.instrument)
        .bind(&key.broker)
        .bind(key.environment.as_str())
        .bind(TradeStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    pub async fn query_trades(&self, filter: &TradeFilter) -> Result<Vec<TradeRecord>> {
        let mut sql = String::from("SELECT * FROM trades WHERE 1 = 1");
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.instrument.is_some() {
            sql.push_str(" AND instrument = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY opened_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(instrument) = &filter.instrument {
            query = query.bind(instrument);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        query = query
            .bind(filter.limit.unwrap_or(100))
            .bind(filter.offset.unwrap_or(0));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(trade_from_row).collect()
    }

    // -- status rows -----------------------------------------------------

    /// Creates or replaces the status row for a key.
    pub async fn upsert_status(&self, row: &StrategyStatusRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_strategies (
                user_id, strategy_name, instrument, broker, environment,
                status, last_action, config, auto_reconnect,
                connected_at, last_heartbeat, error_count, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, strategy_name, instrument, broker, environment)
            DO UPDATE SET
                status = excluded.status,
                last_action = excluded.last_action,
                config = excluded.config,
                auto_reconnect = excluded.auto_reconnect,
                connected_at = excluded.connected_at,
                last_heartbeat = excluded.last_heartbeat,
                error_count = excluded.error_count,
                error_message = excluded.error_message
            "#,
        )
        .bind(&row.key.user_id)
        .bind(&row.key.strategy_name)
        .bind(&row.key.instrument)
        .bind(&row.key.broker)
        .bind(row.key.environment.as_str())
        .bind(row.status.as_str())
        .bind(row.last_action.as_str())
        .bind(row.config.to_string())
        .bind(row.auto_reconnect as i64)
        .bind(row.connected_at.map(|t| t.to_rfc3339()))
        .bind(row.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(row.error_count)
        .bind(row.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Moves a row to a new status/action without touching its config.
    pub async fn set_status(
        &self,
        key: &StrategyKey,
        status: StrategyStatus,
        last_action: LastAction,
        error_message: Option<&str>,
    ) -> Result<()> {
        let bump_errors = matches!(status, StrategyStatus::Error) as i64;
        sqlx::query(
            r#"
            UPDATE user_strategies
            SET status = ?, last_action = ?, error_message = ?,
                error_count = error_count + ?
            WHERE user_id = ? AND strategy_name = ? AND instrument = ?
              AND broker = ? AND environment = ?
            "#,
        )
        .bind(status.as_str())
        .bind(last_action.as_str())
        .bind(error_message)
        .bind(bump_errors)
        .bind(&key.user_id)
        .bind(&key.strategy_name)
        .bind(&key.instrument)
        .bind(&key.broker)
        .bind(key.environment.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks a resumed row healthy: active, connected now, zero errors.
    pub async fn mark_resumed(&self, key: &StrategyKey) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            UPDATE user_strategies
            SET status = ?, last_action = ?, connected_at = ?,
                last_heartbeat = ?, error_count = 0, error_message = NULL
            WHERE user_id = ? AND strategy_name = ? AND instrument = ?
              AND broker = ? AND environment = ?
            "#,
        )
        .bind(StrategyStatus::Active.as_str())
        .bind(LastAction::AutoResume.as_str())
        .bind(&now)
        .bind(&now)
        .bind(&key.user_id)
        .bind(&key.strategy_name)
        .bind(&key.instrument)
        .bind(&key.broker)
        .bind(key.environment.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Shutdown marker: the process is going away but the row stays
    /// `active` with `auto_reconnect` intact so the next boot resumes it.
    pub async fn mark_disconnected(&self, key: &StrategyKey) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_strategies
            SET connected_at = NULL
            WHERE user_id = ? AND strategy_name = ? AND instrument = ?
              AND broker = ? AND environment = ?
            "#,
        )
        .bind(&key.user_id)
        .bind(&key.strategy_name)
        .bind(&key.instrument)
        .bind(&key.broker)
        .bind(key.environment.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_heartbeat(&self, key: &StrategyKey) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_strategies
            SET last_heartbeat = ?
            WHERE user_id = ? AND strategy_name = ? AND instrument = ?
              AND broker = ? AND environment = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&key.user_id)
        .bind(&key.strategy_name)
        .bind(&key.instrument)
        .bind(&key.broker)
        .bind(key.environment.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Rows eligible for the startup auto-resume sweep.
    pub async fn find_all_strategies_to_resume(
        &self,
        broker: &str,
        environment: Environment,
    ) -> Result<Vec<StrategyStatusRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM user_strategies
            WHERE broker = ? AND environment = ?
              AND status = ? AND auto_reconnect = 1
            "#,
        )
        .bind(broker)
        .bind(environment.as_str())
        .bind(StrategyStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(status_from_row).collect()
    }

    pub async fn status_rows_for_user(&self, user_id: &str) -> Result<Vec<StrategyStatusRow>> {
        let rows = sqlx::query("SELECT * FROM user_strategies WHERE user_id = ?")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(status_from_row).collect()
    }

    pub async fn all_status_rows(&self) -> Result<Vec<StrategyStatusRow>> {
        let rows = sqlx::query("SELECT * FROM user_strategies")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(status_from_row).collect()
    }
}

fn trade_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradeRecord> {
    let environment = Environment::parse(row.get("environment"))
        .ok_or_else(|| anyhow::anyhow!("bad environment in trade row"))?;
    let side = Side::parse(row.get("side"))
        .ok_or_else(|| anyhow::anyhow!("bad side in trade row"))?;
    let status = TradeStatus::parse(row.get("status"))
        .ok_or_else(|| anyhow::anyhow!("bad status in trade row"))?;

    Ok(TradeRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        strategy_name: row.get("strategy_name"),
        instrument: row.get("instrument"),
        broker: row.get("broker"),
        environment,
        side,
        entry_order_id: row.get("entry_order_id"),
        sl_order_id: row.get("sl_order_id"),
        tp_order_id: row.get("tp_order_id"),
        entry_price: Decimal::from_str(row.get("entry_price"))?,
        amount: Decimal::from_str(row.get("amount"))?,
        stop_loss: Decimal::from_str(row.get("stop_loss"))?,
        take_profit: Decimal::from_str(row.get("take_profit"))?,
        status,
        opened_at: parse_timestamp(row.get("opened_at"))?,
        closed_at: row
            .get::<Option<String>, _>("closed_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        exit_price: row
            .get::<Option<String>, _>("exit_price")
            .and_then(|s| Decimal::from_str(&s).ok()),
        exit_reason: row
            .get::<Option<String>, _>("exit_reason")
            .and_then(|s| ExitReason::parse(&s)),
        pnl: row
            .get::<Option<String>, _>("pnl")
            .and_then(|s| Decimal::from_str(&s).ok()),
        pnl_percentage: row
            .get::<Option<String>, _>("pnl_percentage")
            .and_then(|s| Decimal::from_str(&s).ok()),
    })
}

fn status_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StrategyStatusRow> {
    let environment = Environment::parse(row.get("environment"))
        .ok_or_else(|| anyhow::anyhow!("bad environment in status row"))?;
    let status = StrategyStatus::parse(row.get("status"))
        .ok_or_else(|| anyhow::anyhow!("bad status in status row"))?;
    let last_action = LastAction::parse(row.get("last_action"))
        .ok_or_else(|| anyhow::anyhow!("bad last_action in status row"))?;

    Ok(StrategyStatusRow {
        key: StrategyKey {
            user_id: row.get("user_id"),
            strategy_name: row.get("strategy_name"),
            instrument: row.get("instrument"),
            broker: row.get("broker"),
            environment,
        },
        status,
        last_action,
        config: serde_json::from_str(row.get("config")).unwrap_or(serde_json::Value::Null),
        auto_reconnect: row.get::<i64, _>("auto_reconnect") != 0,
        connected_at: row
            .get::<Option<String>, _>("connected_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        last_heartbeat: row
            .get::<Option<String>, _>("last_heartbeat")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        error_count: row.get("error_count"),
        error_message: row.get("error_message"),
    })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
