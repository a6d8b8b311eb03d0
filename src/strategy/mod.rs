pub mod razor;

pub use razor::{RazorConfig, RazorExecutor};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::journal::TradeJournal;
use crate::orders::OrderLifecycle;
use crate::types::{Side, Signal, StrategyKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    Initializing,
    Analyzing,
    SignalDetected,
    PositionOpen,
    Stopped,
    Error,
}

impl ExecutorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorState::Initializing => "initializing",
            ExecutorState::Analyzing => "analyzing",
            ExecutorState::SignalDetected => "signal_detected",
            ExecutorState::PositionOpen => "position_open",
            ExecutorState::Stopped => "stopped",
            ExecutorState::Error => "error",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of an executor for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshot {
    pub state: ExecutorState,
    pub last_price: Option<Decimal>,
    pub signal: Option<Signal>,
    pub bars_collected: usize,
    pub daily_trades: u32,
    pub cooldown_until_ms: i64,
    pub updated_at: DateTime<Utc>,
}

/// Live-position view computed from broker state, cached for a few seconds.
#[derive(Debug, Clone, Serialize)]
pub struct PositionMetrics {
    pub instrument: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub unrealized_pnl_pct: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub risk_reward: Option<Decimal>,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

/// The contract every strategy implementation fulfils. One instance drives
/// one (user, strategy, instrument, broker, environment) key; the supervisor
/// serialises all calls through the instance's task.
#[async_trait]
pub trait StrategyExecutor: Send {
    fn metadata(&self) -> StrategyMetadata;

    fn state(&self) -> ExecutorState;

    /// Loads history, reconciles against broker ground truth and settles
    /// into the starting state. Idempotent within one instance lifetime.
    async fn initialize(&mut self) -> Result<()>;

    /// The hot path. Never propagates broker failures; a bad tick logs and
    /// leaves the executor subscribed.
    async fn on_ticker(&mut self, price: Option<Decimal>, now_ms: i64);

    fn analysis_snapshot(&self) -> AnalysisSnapshot;

    async fn position_metrics(&mut self, force_refresh: bool) -> Result<Option<PositionMetrics>>;

    /// Administrative escape hatch: drop position tracking and resume
    /// analysis after the cooldown.
    async fn force_resume(&mut self) -> Result<()>;

    /// Safe in any state; the executor accepts no further ticks after this.
    async fn cleanup(&mut self);
}

/// Collaborators injected into every executor at construction.
#[derive(Clone)]
pub struct ExecutorContext {
    pub broker: Arc<dyn BrokerClient>,
    pub journal: Arc<TradeJournal>,
    pub lifecycle: Arc<OrderLifecycle>,
}

/// Builds an executor for `strategy_name`, or reports it unknown.
pub fn create_executor(
    key: StrategyKey,
    config: &serde_json::Value,
    context: ExecutorContext,
) -> Result<Box<dyn StrategyExecutor>> {
    match key.strategy_name.as_str() {
        "razor" => {
            let config: RazorConfig = if config.is_null() {
                RazorConfig::default()
            } else {
                serde_json::from_value(config.clone())
                    .map_err(|e| anyhow::anyhow!("invalid razor config: {}", e))?
            };
            config
                .validate()
                .map_err(|errors| anyhow::anyhow!("invalid razor config: {}", errors.join("; ")))?;
            Ok(Box::new(RazorExecutor::new(key, config, context)))
        }
        other => Err(anyhow::anyhow!("unknown strategy: {}", other)),
    }
}

/// True when `create_executor` would accept the name.
pub fn is_known_strategy(name: &str) -> bool {
    matches!(name, "razor")
}
