use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{BrokerConnection, BrokerRegistry, TickReceiver};
use crate::journal::{LastAction, StrategyStatus, StrategyStatusRow, TradeJournal};
use crate::orders::OrderLifecycle;
use crate::strategy::{
    create_executor, is_known_strategy, AnalysisSnapshot, ExecutorContext, PositionMetrics,
    StrategyExecutor,
};
use crate::types::{Environment, StrategyKey, DEFAULT_BROKER};

const COMMAND_CAPACITY: usize = 32;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(1);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("strategy already running for this key")]
    AlreadyRunning,
    #[error("strategy is not running")]
    NotRunning,
    #[error("user has no live broker connection")]
    NotConnected,
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ControlError {
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::AlreadyRunning => "already_running",
            ControlError::NotRunning => "not_running",
            ControlError::NotConnected => "not_connected",
            ControlError::UnknownStrategy(_) => "unknown_strategy",
            ControlError::Validation(_) => "validation_failure",
            ControlError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub user_id: String,
    pub strategy_name: String,
    pub instrument: String,
    #[serde(default)]
    pub config: serde_json::Value,
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub user_id: String,
    pub strategy_name: String,
    pub instrument: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub user_id: String,
    pub strategy_name: Option<String>,
    pub instrument: Option<String>,
    pub environment: Option<Environment>,
}

/// A status row joined with the live executor view when one is running.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub row: StrategyStatusRow,
    pub analysis: Option<AnalysisSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            code: None,
        }
    }

    pub fn err(error: &ControlError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            code: Some(error.code()),
        }
    }
}

enum ExecutorCommand {
    Snapshot(oneshot::Sender<AnalysisSnapshot>),
    Metrics {
        force: bool,
        reply: oneshot::Sender<Result<Option<PositionMetrics>>>,
    },
    ForceResume(oneshot::Sender<Result<()>>),
    Stop,
}

struct RunningInstance {
    inbox: mpsc::Sender<ExecutorCommand>,
    executor_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

/// Owns the keyed executor map. The mutex guards pointer moves only; no
/// broker or journal I/O happens while it is held.
pub struct StrategySupervisor {
    journal: Arc<TradeJournal>,
    registry: Arc<BrokerRegistry>,
    instances: Mutex<HashMap<StrategyKey, RunningInstance>>,
}

impl StrategySupervisor {
    pub fn new(journal: Arc<TradeJournal>, registry: Arc<BrokerRegistry>) -> Self {
        Self {
            journal,
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a strategy instance for the key, rejecting duplicates and
    /// unusable requests with typed errors.
    pub async fn start(&self, request: StartRequest) -> Result<String, ControlError> {
        let key = StrategyKey::new(
            &request.user_id,
            &request.strategy_name,
            &request.instrument,
            request.environment,
        );

        if self.instances.lock().await.contains_key(&key) {
            return Err(ControlError::AlreadyRunning);
        }
        if !is_known_strategy(&request.strategy_name) {
            return Err(ControlError::UnknownStrategy(request.strategy_name.clone()));
        }

        let connection = self
            .registry
            .get(&request.user_id, request.environment)
            .await
            .ok_or(ControlError::NotConnected)?;
        if !connection.client.is_connected().await {
            return Err(ControlError::NotConnected);
        }

        let mut executor = self
            .build_executor(&key, &request.config, &connection)
            .map_err(|e| ControlError::Validation(e.to_string()))?;
        executor.initialize().await.map_err(ControlError::Internal)?;

        self.journal
            .upsert_status(&StrategyStatusRow {
                key: key.clone(),
                status: StrategyStatus::Active,
                last_action: LastAction::ManualStart,
                config: request.config.clone(),
                auto_reconnect: true,
                connected_at: Some(chrono::Utc::now()),
                last_heartbeat: Some(chrono::Utc::now()),
                error_count: 0,
                error_message: None,
            })
            .await
            .map_err(ControlError::Internal)?;

        self.install(key.clone(), executor, &connection).await?;
        info!("started strategy {}", key);
        Ok(format!("strategy started: {}", key))
    }

    /// Stops the instance for the key and marks its row paused.
    pub async fn stop(&self, request: StopRequest) -> Result<String, ControlError> {
        let key = StrategyKey::new(
            &request.user_id,
            &request.strategy_name,
            &request.instrument,
            request.environment,
        );

        let instance = self
            .instances
            .lock()
            .await
            .remove(&key)
            .ok_or(ControlError::NotRunning)?;
        self.teardown(instance).await;

        self.journal
            .set_status(&key, StrategyStatus::Paused, LastAction::ManualStop, None)
            .await
            .map_err(ControlError::Internal)?;

        info!("stopped strategy {}", key);
        Ok(format!("strategy stopped: {}", key))
    }

    /// Persisted rows for a user, each joined with the live snapshot where
    /// an executor is running.
    pub async fn status(&self, request: StatusRequest) -> Result<Vec<StatusView>> {
        let rows = self.journal.status_rows_for_user(&request.user_id).await?;
        let mut views = Vec::with_capacity(rows.len());

        for row in rows {
            if let Some(name) = &request.strategy_name {
                if &row.key.strategy_name != name {
                    continue;
                }
            }
            if let Some(instrument) = &request.instrument {
                if &row.key.instrument != instrument {
                    continue;
                }
            }
            if let Some(environment) = request.environment {
                if row.key.environment != environment {
                    continue;
                }
            }

            let analysis = self.snapshot_of(&row.key).await;
            views.push(StatusView { row, analysis });
        }

        Ok(views)
    }

    pub async fn force_resume(&self, key: &StrategyKey) -> Result<(), ControlError> {
        let inbox = self.inbox_of(key).await.ok_or(ControlError::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        inbox
            .send(ExecutorCommand::ForceResume(tx))
            .await
            .map_err(|_| ControlError::NotRunning)?;
        rx.await
            .map_err(|_| ControlError::NotRunning)?
            .map_err(ControlError::Internal)
    }

    pub async fn position_metrics(
        &self,
        key: &StrategyKey,
        force: bool,
    ) -> Result<Option<PositionMetrics>, ControlError> {
        let inbox = self.inbox_of(key).await.ok_or(ControlError::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        inbox
            .send(ExecutorCommand::Metrics { force, reply: tx })
            .await
            .map_err(|_| ControlError::NotRunning)?;
        rx.await
            .map_err(|_| ControlError::NotRunning)?
            .map_err(ControlError::Internal)
    }

    /// Startup auto-resume sweep: re-instantiates every persisted row with
    /// `status = active` and `auto_reconnect = true`.
    pub async fn initialize(&self) -> Result<()> {
        let mut resumed = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for environment in Environment::all() {
            let rows = self
                .journal
                .find_all_strategies_to_resume(DEFAULT_BROKER, environment)
                .await?;

            for row in rows {
                match self.resume_row(&row).await {
                    ResumeOutcome::Resumed => resumed += 1,
                    ResumeOutcome::Skipped => skipped += 1,
                    ResumeOutcome::Failed => failed += 1,
                }
            }
        }

        info!(
            "auto-resume sweep complete: {} resumed, {} skipped, {} failed",
            resumed, skipped, failed
        );
        Ok(())
    }

    /// Stops every executor, preserving `auto_reconnect` so the next boot
    /// resumes them.
    pub async fn shutdown(&self) {
        let drained: Vec<(StrategyKey, RunningInstance)> =
            self.instances.lock().await.drain().collect();
        info!("shutting down {} strategy instances", drained.len());

        for (key, instance) in drained {
            self.teardown(instance).await;
            if let Err(err) = self.journal.mark_disconnected(&key).await {
                warn!("{}: disconnect mark failed during shutdown: {}", key, err);
            }
        }
    }

    pub async fn running_count(&self) -> usize {
        self.instances.lock().await.len()
    }

    // -- internals -------------------------------------------------------

    fn build_executor(
        &self,
        key: &StrategyKey,
        config: &serde_json::Value,
        connection: &BrokerConnection,
    ) -> Result<Box<dyn StrategyExecutor>> {
        let lifecycle = Arc::new(OrderLifecycle::new(
            Arc::clone(&connection.client),
            Arc::clone(&self.journal),
        ));
        create_executor(
            key.clone(),
            config,
            ExecutorContext {
                broker: Arc::clone(&connection.client),
                journal: Arc::clone(&self.journal),
                lifecycle,
            },
        )
    }

    async fn resume_row(&self, row: &StrategyStatusRow) -> ResumeOutcome {
        let key = &row.key;

        let Some(connection) = self.registry.get(&key.user_id, key.environment).await else {
            debug!("{}: no broker connection, skipping resume", key);
            let _ = self
                .journal
                .set_status(key, StrategyStatus::Paused, LastAction::AutoResumeSkipped, None)
                .await;
            return ResumeOutcome::Skipped;
        };

        if !is_known_strategy(&key.strategy_name) {
            let message = format!("unknown strategy: {}", key.strategy_name);
            let _ = self
                .journal
                .set_status(
                    key,
                    StrategyStatus::Error,
                    LastAction::AutoResumeFailed,
                    Some(&message),
                )
                .await;
            return ResumeOutcome::Failed;
        }

        let executor = match self.build_executor(key, &row.config, &connection) {
            Ok(executor) => executor,
            Err(err) => {
                let _ = self
                    .journal
                    .set_status(
                        key,
                        StrategyStatus::Error,
                        LastAction::AutoResumeFailed,
                        Some(&err.to_string()),
                    )
                    .await;
                return ResumeOutcome::Failed;
            }
        };

        let mut executor = executor;
        if let Err(err) = executor.initialize().await {
            warn!("{}: auto-resume initialize failed: {}", key, err);
            let _ = self
                .journal
                .set_status(
                    key,
                    StrategyStatus::Error,
                    LastAction::AutoResumeFailed,
                    Some(&err.to_string()),
                )
                .await;
            return ResumeOutcome::Failed;
        }

        if let Err(err) = self.install(key.clone(), executor, &connection).await {
            warn!("{}: auto-resume install failed: {}", key, err);
            return ResumeOutcome::Failed;
        }
        let _ = self.journal.mark_resumed(key).await;
        info!("auto-resumed strategy {}", key);
        ResumeOutcome::Resumed
    }

    /// Wires an initialized executor into its tasks and the instance map.
    async fn install(
        &self,
        key: StrategyKey,
        executor: Box<dyn StrategyExecutor>,
        connection: &BrokerConnection,
    ) -> Result<(), ControlError> {
        let (inbox_tx, inbox_rx) = mpsc::channel(COMMAND_CAPACITY);

        // The subscription channel is the executor's tick inbox: bounded,
        // oldest-evicting, consumed by the one executor task.
        let ticks = connection.ticker.subscribe(&key.instrument).await;
        let executor_task = tokio::spawn(run_executor(executor, inbox_rx, ticks));
        let heartbeat_task = tokio::spawn(heartbeat(key.clone(), Arc::clone(&self.journal)));

        let instance = RunningInstance {
            inbox: inbox_tx,
            executor_task,
            heartbeat_task,
        };

        let mut map = self.instances.lock().await;
        if map.contains_key(&key) {
            // Lost a start race; unwind the tasks we just spawned.
            drop(map);
            self.teardown(instance).await;
            return Err(ControlError::AlreadyRunning);
        }
        map.insert(key, instance);
        Ok(())
    }

    async fn teardown(&self, instance: RunningInstance) {
        instance.heartbeat_task.abort();

        if instance.inbox.send(ExecutorCommand::Stop).await.is_err() {
            instance.executor_task.abort();
            return;
        }
        if tokio::time::timeout(STOP_TIMEOUT, instance.executor_task)
            .await
            .is_err()
        {
            warn!("executor did not stop within {:?}", STOP_TIMEOUT);
        }
    }

    async fn inbox_of(&self, key: &StrategyKey) -> Option<mpsc::Sender<ExecutorCommand>> {
        self.instances.lock().await.get(key).map(|i| i.inbox.clone())
    }

    async fn snapshot_of(&self, key: &StrategyKey) -> Option<AnalysisSnapshot> {
        let inbox = self.inbox_of(key).await?;
        let (tx, rx) = oneshot::channel();
        inbox.send(ExecutorCommand::Snapshot(tx)).await.ok()?;
        tokio::time::timeout(SNAPSHOT_TIMEOUT, rx).await.ok()?.ok()
    }
}

enum ResumeOutcome {
    Resumed,
    Skipped,
    Failed,
}

/// The executor's single task: all mutable state is touched here only.
/// Ticks arrive on the oldest-evicting ring channel; control commands on
/// their own small mpsc.
async fn run_executor(
    mut executor: Box<dyn StrategyExecutor>,
    mut inbox: mpsc::Receiver<ExecutorCommand>,
    mut ticks: TickReceiver,
) {
    let mut feed_live = true;
    loop {
        tokio::select! {
            command = inbox.recv() => match command {
                Some(ExecutorCommand::Snapshot(reply)) => {
                    let _ = reply.send(executor.analysis_snapshot());
                }
                Some(ExecutorCommand::Metrics { force, reply }) => {
                    let _ = reply.send(executor.position_metrics(force).await);
                }
                Some(ExecutorCommand::ForceResume(reply)) => {
                    let _ = reply.send(executor.force_resume().await);
                }
                Some(ExecutorCommand::Stop) | None => {
                    executor.cleanup().await;
                    break;
                }
            },
            update = ticks.recv(), if feed_live => match update {
                Some(update) => {
                    executor
                        .on_ticker(Some(update.last_price), update.timestamp_ms)
                        .await;
                }
                None => {
                    // Feed ended (reconnect churn); keep serving commands.
                    feed_live = false;
                }
            },
        }
    }
}

async fn heartbeat(key: StrategyKey, journal: Arc<TradeJournal>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so heartbeats trail start.
    interval.tick().await;

    loop {
        interval.tick().await;
        if let Err(err) = journal.update_heartbeat(&key).await {
            debug!("{}: heartbeat update failed: {}", key, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{tick_channel, MockBrokerClient, TickSender, TickerSource};
    use crate::types::Candle;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    /// Test ticker source: hands out channels and keeps the senders so the
    /// test can push ticks.
    #[derive(Default)]
    struct ManualTicker {
        senders: Mutex<Vec<TickSender>>,
    }

    #[async_trait]
    impl TickerSource for ManualTicker {
        async fn subscribe(&self, _instrument: &str) -> TickReceiver {
            let (tx, rx) = tick_channel(64);
            self.senders.lock().await.push(tx);
            rx
        }
    }

    fn flat_history() -> Vec<Candle> {
        (0..200)
            .map(|i| Candle {
                timestamp: 1_700_000_000_000 + i * 60_000,
                open: dec!(100),
                high: dec!(100),
                low: dec!(100),
                close: dec!(100),
                volume: Decimal::ONE,
            })
            .collect()
    }

    fn connected_mock() -> MockBrokerClient {
        let mut broker = MockBrokerClient::new();
        broker.expect_is_connected().returning(|| true);
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(flat_history()));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));
        broker
    }

    async fn registry_with(broker: MockBrokerClient) -> Arc<BrokerRegistry> {
        let registry = Arc::new(BrokerRegistry::new());
        registry
            .register(
                "u1",
                Environment::Testnet,
                BrokerConnection {
                    client: Arc::new(broker),
                    ticker: Arc::new(ManualTicker::default()),
                },
            )
            .await;
        registry
    }

    fn start_request() -> StartRequest {
        StartRequest {
            user_id: "u1".into(),
            strategy_name: "razor".into(),
            instrument: "BTC-PERPETUAL".into(),
            config: serde_json::json!({}),
            environment: Environment::Testnet,
        }
    }

    #[tokio::test]
    async fn start_creates_instance_and_status_row() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        supervisor.start(start_request()).await.unwrap();
        assert_eq!(supervisor.running_count().await, 1);

        let rows = journal.status_rows_for_user("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, StrategyStatus::Active);
        assert_eq!(rows[0].last_action, LastAction::ManualStart);
        assert!(rows[0].auto_reconnect);
    }

    #[tokio::test]
    async fn duplicate_start_is_rejected_without_side_effects() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        supervisor.start(start_request()).await.unwrap();
        let err = supervisor.start(start_request()).await.unwrap_err();
        assert!(matches!(err, ControlError::AlreadyRunning));
        assert_eq!(err.code(), "already_running");
        assert_eq!(supervisor.running_count().await, 1);
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(journal, registry);

        let err = supervisor
            .start(StartRequest {
                strategy_name: "katana".into(),
                ..start_request()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::UnknownStrategy(_)));
        assert_eq!(err.code(), "unknown_strategy");
    }

    #[tokio::test]
    async fn missing_connection_is_rejected() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = Arc::new(BrokerRegistry::new());
        let supervisor = StrategySupervisor::new(journal, registry);

        let err = supervisor.start(start_request()).await.unwrap_err();
        assert!(matches!(err, ControlError::NotConnected));
    }

    #[tokio::test]
    async fn stop_marks_row_paused_and_rejects_second_stop() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        supervisor.start(start_request()).await.unwrap();
        let stop = StopRequest {
            user_id: "u1".into(),
            strategy_name: "razor".into(),
            instrument: "BTC-PERPETUAL".into(),
            environment: Environment::Testnet,
        };
        supervisor.stop(stop.clone()).await.unwrap();
        assert_eq!(supervisor.running_count().await, 0);

        let rows = journal.status_rows_for_user("u1").await.unwrap();
        assert_eq!(rows[0].status, StrategyStatus::Paused);
        assert_eq!(rows[0].last_action, LastAction::ManualStop);

        let err = supervisor.stop(stop).await.unwrap_err();
        assert!(matches!(err, ControlError::NotRunning));
    }

    #[tokio::test]
    async fn status_joins_live_snapshot() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        supervisor.start(start_request()).await.unwrap();
        let views = supervisor
            .status(StatusRequest {
                user_id: "u1".into(),
                strategy_name: None,
                instrument: None,
                environment: None,
            })
            .await
            .unwrap();

        assert_eq!(views.len(), 1);
        let analysis = views[0].analysis.as_ref().expect("live snapshot");
        assert_eq!(
            analysis.state,
            crate::strategy::ExecutorState::Analyzing
        );
    }

    #[tokio::test]
    async fn auto_resume_sweep_restarts_active_rows() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        let key = StrategyKey::new("u1", "razor", "BTC-PERPETUAL", Environment::Testnet);
        journal
            .upsert_status(&StrategyStatusRow {
                key: key.clone(),
                status: StrategyStatus::Active,
                last_action: LastAction::ManualStart,
                config: serde_json::json!({}),
                auto_reconnect: true,
                connected_at: None,
                last_heartbeat: None,
                error_count: 0,
                error_message: None,
            })
            .await
            .unwrap();

        supervisor.initialize().await.unwrap();
        assert_eq!(supervisor.running_count().await, 1);

        let rows = journal.status_rows_for_user("u1").await.unwrap();
        assert_eq!(rows[0].last_action, LastAction::AutoResume);
        assert_eq!(rows[0].error_count, 0);
        assert!(rows[0].connected_at.is_some());
    }

    #[tokio::test]
    async fn auto_resume_skips_users_without_connection() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        // Registry only knows u1; the row belongs to u2.
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        let key = StrategyKey::new("u2", "razor", "BTC-PERPETUAL", Environment::Testnet);
        journal
            .upsert_status(&StrategyStatusRow {
                key,
                status: StrategyStatus::Active,
                last_action: LastAction::ManualStart,
                config: serde_json::json!({}),
                auto_reconnect: true,
                connected_at: None,
                last_heartbeat: None,
                error_count: 0,
                error_message: None,
            })
            .await
            .unwrap();

        supervisor.initialize().await.unwrap();
        assert_eq!(supervisor.running_count().await, 0);

        let rows = journal.status_rows_for_user("u2").await.unwrap();
        assert_eq!(rows[0].status, StrategyStatus::Paused);
        assert_eq!(rows[0].last_action, LastAction::AutoResumeSkipped);
    }

    #[tokio::test]
    async fn auto_resume_marks_unknown_strategy_failed() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        let key = StrategyKey::new("u1", "katana", "BTC-PERPETUAL", Environment::Testnet);
        journal
            .upsert_status(&StrategyStatusRow {
                key,
                status: StrategyStatus::Active,
                last_action: LastAction::ManualStart,
                config: serde_json::json!({}),
                auto_reconnect: true,
                connected_at: None,
                last_heartbeat: None,
                error_count: 0,
                error_message: None,
            })
            .await
            .unwrap();

        supervisor.initialize().await.unwrap();
        assert_eq!(supervisor.running_count().await, 0);

        let rows = journal.status_rows_for_user("u1").await.unwrap();
        assert_eq!(rows[0].status, StrategyStatus::Error);
        assert_eq!(rows[0].last_action, LastAction::AutoResumeFailed);
        assert_eq!(rows[0].error_count, 1);
    }

    #[tokio::test]
    async fn shutdown_preserves_auto_reconnect() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let registry = registry_with(connected_mock()).await;
        let supervisor = StrategySupervisor::new(Arc::clone(&journal), registry);

        supervisor.start(start_request()).await.unwrap();
        supervisor.shutdown().await;
        assert_eq!(supervisor.running_count().await, 0);

        let rows = journal.status_rows_for_user("u1").await.unwrap();
        // Still active + auto_reconnect so the next boot resumes it.
        assert_eq!(rows[0].status, StrategyStatus::Active);
        assert!(rows[0].auto_reconnect);
        assert!(rows[0].connected_at.is_none());
    }
}
