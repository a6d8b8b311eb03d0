mod config;
mod entry;
mod recon;
mod scoring;
mod watcher;

pub use config::RazorConfig;
pub use scoring::{compute_snapshot, score_signal, IndicatorSnapshot};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::{
    AnalysisSnapshot, ExecutorContext, ExecutorState, PositionMetrics, StrategyExecutor,
    StrategyMetadata,
};
use crate::broker::{settlement_currency, InstrumentInfo};
use crate::market::CandleAggregator;
use crate::types::{Candle, Signal, StrategyKey};

/// Bars needed before signals are trusted at full accuracy.
const REQUIRED_DATA_POINTS: usize = 15;
/// Below this many bars the executor stays in warm-up.
const MIN_WARMUP_BARS: usize = 5;
/// Execution floor; the scoring threshold sits above it as a safety margin.
const EXECUTION_MIN_STRENGTH: Decimal = dec!(55);
/// History request size at initialize.
const HISTORY_BARS: usize = 200;

const DAY_MS: i64 = 86_400_000;
const ERROR_COOLDOWN_MS: i64 = 60_000;
const COOLDOWN_LOG_INTERVAL_MS: i64 = 30_000;
pub(crate) const STOP_ADJUST_THROTTLE_MS: i64 = 2_000;
pub(crate) const METRICS_CACHE_TTL_MS: i64 = 5_000;

pub(crate) struct MetricsCache {
    pub data: Option<PositionMetrics>,
    pub expires_at_ms: i64,
}

/// One Razor instance: confluence-scored mean-reversion scalper over
/// 1m bars with OTOCO brackets and dynamic stop management.
pub struct RazorExecutor {
    pub(crate) key: StrategyKey,
    pub(crate) config: RazorConfig,
    pub(crate) context: ExecutorContext,

    pub(crate) aggregator: CandleAggregator,
    pub(crate) state: ExecutorState,
    pub(crate) initialized: bool,

    pub(crate) last_price: Option<Decimal>,
    pub(crate) last_signal: Option<Signal>,
    pub(crate) last_snapshot: Option<IndicatorSnapshot>,
    pub(crate) instrument_info: Option<InstrumentInfo>,

    pub(crate) daily_trades: u32,
    pub(crate) daily_reset_ms: i64,
    pub(crate) cooldown_until_ms: i64,
    pub(crate) last_cooldown_log_ms: i64,

    pub(crate) current_trade_id: Option<String>,
    pub(crate) be_moved_for_trade: bool,
    pub(crate) last_stop_check_ms: i64,
    pub(crate) last_position_poll_ms: i64,
    pub(crate) metrics_cache: Option<MetricsCache>,

    pub(crate) updated_at: chrono::DateTime<Utc>,
}

impl RazorExecutor {
    pub fn new(key: StrategyKey, config: RazorConfig, context: ExecutorContext) -> Self {
        Self {
            key,
            config,
            context,
            aggregator: CandleAggregator::new(),
            state: ExecutorState::Initializing,
            initialized: false,
            last_price: None,
            last_signal: None,
            last_snapshot: None,
            instrument_info: None,
            daily_trades: 0,
            daily_reset_ms: Utc::now().timestamp_millis(),
            cooldown_until_ms: 0,
            last_cooldown_log_ms: 0,
            current_trade_id: None,
            be_moved_for_trade: false,
            last_stop_check_ms: 0,
            last_position_poll_ms: 0,
            metrics_cache: None,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn currency(&self) -> &str {
        settlement_currency(&self.key.instrument)
    }

    pub(crate) async fn instrument_info(&mut self) -> Result<InstrumentInfo> {
        if let Some(info) = &self.instrument_info {
            return Ok(info.clone());
        }
        let info = self.context.broker.get_instrument(&self.key.instrument).await?;
        self.instrument_info = Some(info.clone());
        Ok(info)
    }

    pub(crate) fn arm_cooldown(&mut self, now_ms: i64) {
        self.cooldown_until_ms = now_ms + self.config.cooldown_ms();
    }

    pub(crate) fn clear_metrics_cache(&mut self) {
        self.metrics_cache = None;
    }

    /// Loads warm-up candles, falling back to synthetic flat history when
    /// the broker cannot serve any. The downgrade is logged so operators
    /// can tell real warm-up from mocked warm-up.
    async fn load_history(&mut self) {
        match self
            .context
            .broker
            .get_candles(&self.key.instrument, 1, HISTORY_BARS)
            .await
        {
            Ok(candles) if !candles.is_empty() => {
                debug!(
                    "{}: seeded {} historical candles",
                    self.key, candles.len()
                );
                self.aggregator.seed_history(&candles);
            }
            Ok(_) | Err(_) => {
                let base = match self.context.broker.get_ticker(&self.key.instrument).await {
                    Ok(ticker) => ticker.last_price,
                    Err(_) => dec!(100),
                };
                warn!(
                    "{}: no historical candles from broker, seeding synthetic flat history at {}",
                    self.key, base
                );
                let now = Utc::now().timestamp_millis();
                let start = now - (HISTORY_BARS as i64) * 60_000;
                let candles: Vec<Candle> = (0..HISTORY_BARS)
                    .map(|i| {
                        // Small deterministic wobble so indicators see a
                        // non-degenerate series.
                        let wobble = Decimal::from((i % 5) as i64 - 2) * dec!(0.0002) * base;
                        let close = base + wobble;
                        Candle {
                            timestamp: start + i as i64 * 60_000,
                            open: close,
                            high: close + base * dec!(0.0001),
                            low: close - base * dec!(0.0001),
                            close,
                            volume: Decimal::ONE,
                        }
                    })
                    .collect();
                self.aggregator.seed_history(&candles);
            }
        }
    }

    async fn resolve_price(&mut self, price: Option<Decimal>) -> Option<Decimal> {
        match price {
            Some(p) => Some(p),
            None => match self.context.broker.get_ticker(&self.key.instrument).await {
                Ok(ticker) => Some(ticker.last_price),
                Err(err) => {
                    debug!("{}: ticker fetch failed on empty tick: {}", self.key, err);
                    None
                }
            },
        }
    }

    async fn analyze_tick(&mut self, price: Decimal, now_ms: i64) {
        let bar_closed = self.aggregator.ingest(price, now_ms);
        self.last_price = Some(price);
        self.updated_at = Utc::now();

        // Daily counter rolls on a 24h clock, not calendar midnight.
        if now_ms - self.daily_reset_ms >= DAY_MS {
            self.daily_trades = 0;
            self.daily_reset_ms = now_ms;
            info!("{}: daily trade counter reset", self.key);
        }

        if now_ms < self.cooldown_until_ms {
            if now_ms - self.last_cooldown_log_ms >= COOLDOWN_LOG_INTERVAL_MS {
                self.last_cooldown_log_ms = now_ms;
                debug!(
                    "{}: cooling down for {}s more",
                    self.key,
                    (self.cooldown_until_ms - now_ms) / 1000
                );
            }
            return;
        }

        let bars = self.aggregator.bars_collected();
        if bars < MIN_WARMUP_BARS {
            self.state = ExecutorState::Initializing;
            return;
        }
        if self.state == ExecutorState::Initializing {
            self.state = ExecutorState::Analyzing;
        }

        let snapshot = compute_snapshot(&self.aggregator, &self.config);
        let daily_limit_reached = self.daily_trades >= self.config.max_daily_trades;
        let signal = score_signal(&self.config, &snapshot, &self.aggregator, daily_limit_reached);
        self.last_snapshot = Some(snapshot);

        let sufficient_data = bars >= REQUIRED_DATA_POINTS;
        let should_execute = bar_closed
            && sufficient_data
            && signal.direction.is_actionable()
            && signal.strength >= EXECUTION_MIN_STRENGTH
            && self.state == ExecutorState::Analyzing;

        self.last_signal = Some(signal.clone());

        if !should_execute {
            return;
        }

        self.state = ExecutorState::SignalDetected;
        info!(
            "{}: {} signal, strength {:.0}, executing",
            self.key, signal.direction, signal.strength
        );

        match self.execute_entry(signal.direction, now_ms).await {
            Ok(trade_id) => {
                self.current_trade_id = trade_id;
                self.state = ExecutorState::PositionOpen;
                self.daily_trades += 1;
                self.be_moved_for_trade = false;
                self.arm_cooldown(now_ms);
                self.clear_metrics_cache();
            }
            Err(err) => {
                warn!("{}: entry failed: {}", self.key, err);
                self.state = ExecutorState::Analyzing;
                self.cooldown_until_ms = now_ms + ERROR_COOLDOWN_MS;
            }
        }
    }
}

#[async_trait]
impl StrategyExecutor for RazorExecutor {
    fn metadata(&self) -> StrategyMetadata {
        StrategyMetadata {
            name: "razor",
            display_name: "Razor",
            description: "Confluence-scored 1m mean-reversion scalper with OTOCO brackets",
        }
    }

    fn state(&self) -> ExecutorState {
        self.state
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.load_history().await;
        self.reconcile().await;
        self.initialized = true;
        info!("{}: initialized in state {}", self.key, self.state);
        Ok(())
    }

    async fn on_ticker(&mut self, price: Option<Decimal>, now_ms: i64) {
        match self.state {
            ExecutorState::Stopped | ExecutorState::Error => {}
            ExecutorState::PositionOpen => {
                if let Some(p) = price {
                    self.last_price = Some(p);
                }
                self.updated_at = Utc::now();
                self.watch_position(now_ms).await;
            }
            _ => {
                let Some(price) = self.resolve_price(price).await else {
                    return;
                };
                self.analyze_tick(price, now_ms).await;
            }
        }
    }

    fn analysis_snapshot(&self) -> AnalysisSnapshot {
        AnalysisSnapshot {
            state: self.state,
            last_price: self.last_price,
            signal: self.last_signal.clone(),
            bars_collected: self.aggregator.bars_collected(),
            daily_trades: self.daily_trades,
            cooldown_until_ms: self.cooldown_until_ms,
            updated_at: self.updated_at,
        }
    }

    async fn position_metrics(&mut self, force_refresh: bool) -> Result<Option<PositionMetrics>> {
        self.fetch_position_metrics(force_refresh).await
    }

    async fn force_resume(&mut self) -> Result<()> {
        info!("{}: force resume requested", self.key);
        self.current_trade_id = None;
        self.clear_metrics_cache();
        self.be_moved_for_trade = false;
        if self.state == ExecutorState::PositionOpen {
            self.state = ExecutorState::Analyzing;
        }
        self.arm_cooldown(Utc::now().timestamp_millis());
        Ok(())
    }

    async fn cleanup(&mut self) {
        self.state = ExecutorState::Stopped;
        self.clear_metrics_cache();
        debug!("{}: cleaned up", self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{
        AccountSummary, BrokerClient, BrokerOrder, BrokerPosition, InstrumentInfo,
        MockBrokerClient, OrderResult, OrderType, Ticker,
    };
    use crate::journal::TradeJournal;
    use crate::orders::OrderLifecycle;
    use crate::strategy::ExecutorContext;
    use crate::types::{
        Direction, Environment, ExitReason, NewTrade, Side, TradeStatus, AUTO_RESUME_ORDER_ID,
    };
    use mockall::Sequence;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_400_000;
    const MINUTE: i64 = 60_000;

    fn test_key() -> StrategyKey {
        StrategyKey::new("u1", "razor", "BTC-PERPETUAL", Environment::Testnet)
    }

    fn test_instrument() -> InstrumentInfo {
        InstrumentInfo {
            instrument: "BTC-PERPETUAL".into(),
            tick_size: dec!(0.5),
            min_trade_amount: dec!(0.001),
            max_leverage: dec!(50),
            contract_size: Decimal::ONE,
        }
    }

    fn test_ticker(price: Decimal) -> Ticker {
        Ticker {
            instrument: "BTC-PERPETUAL".into(),
            last_price: price,
            mark_price: price,
            bid: price - dec!(0.5),
            ask: price + dec!(0.5),
            timestamp: Utc::now(),
        }
    }

    fn rich_account() -> AccountSummary {
        AccountSummary {
            currency: "BTC".into(),
            equity: dec!(10000),
            available_funds: dec!(10000),
        }
    }

    fn flat_history(bars: usize, price: Decimal) -> Vec<Candle> {
        (0..bars)
            .map(|i| Candle {
                timestamp: T0 - (bars as i64 - i as i64) * MINUTE,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: Decimal::ONE,
            })
            .collect()
    }

    /// Alternating closes around 100: RSI near 50, volatility in the sweet
    /// spot, ATR workable. With a generous rsiOversold the long side scores
    /// well past the execution floor.
    fn wavy_history(bars: usize) -> Vec<Candle> {
        (0..bars)
            .map(|i| {
                let close = if i % 2 == 0 { dec!(100) } else { dec!(100.15) };
                Candle {
                    timestamp: T0 - (bars as i64 - i as i64) * MINUTE,
                    open: close,
                    high: close + dec!(0.1),
                    low: close - dec!(0.1),
                    close,
                    volume: Decimal::ONE,
                }
            })
            .collect()
    }

    async fn build_executor(
        broker: MockBrokerClient,
        config: RazorConfig,
    ) -> (RazorExecutor, Arc<TradeJournal>) {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let broker: Arc<dyn BrokerClient> = Arc::new(broker);
        let lifecycle = Arc::new(OrderLifecycle::new(
            Arc::clone(&broker),
            Arc::clone(&journal),
        ));
        let executor = RazorExecutor::new(
            test_key(),
            config,
            ExecutorContext {
                broker,
                journal: Arc::clone(&journal),
                lifecycle,
            },
        );
        (executor, journal)
    }

    fn seed_open_trade(side: Side) -> NewTrade {
        let key = test_key();
        NewTrade {
            user_id: key.user_id,
            strategy_name: key.strategy_name,
            instrument: key.instrument,
            broker: key.broker,
            environment: key.environment,
            side,
            entry_order_id: "entry-1".into(),
            sl_order_id: Some("sl-1".into()),
            tp_order_id: Some("tp-1".into()),
            entry_price: dec!(1000),
            amount: dec!(0.1),
            stop_loss: dec!(995),
            take_profit: dec!(1006.5),
        }
    }

    // Scenario: clean start on flat data produces no signal and no trades.
    #[tokio::test]
    async fn clean_start_flat_market_stays_analyzing() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(flat_history(200, dec!(100))));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));
        broker.expect_place_buy_order().times(0);
        broker.expect_place_sell_order().times(0);

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        executor.initialize().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::Analyzing);

        for i in 1..=15 {
            executor
                .on_ticker(Some(dec!(100)), T0 + i * MINUTE)
                .await;
        }

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        assert_eq!(executor.daily_trades, 0);
        let signal = executor.last_signal.as_ref().unwrap();
        assert_eq!(signal.direction, Direction::None);
        assert!(signal.strength <= dec!(58));
        assert!(journal
            .open_trades_for_key(&test_key())
            .await
            .unwrap()
            .is_empty());
    }

    // Scenario: a qualifying confluence signal at bar close places the full
    // OTOCO bracket and journals the trade.
    #[tokio::test]
    async fn qualifying_signal_places_bracket_and_opens_position() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(wavy_history(40)));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));
        broker
            .expect_get_instrument()
            .returning(|_| Ok(test_instrument()));
        broker
            .expect_get_ticker()
            .returning(|_| Ok(test_ticker(dec!(1000))));
        broker
            .expect_get_account_summary()
            .returning(|_| Ok(rich_account()));

        broker
            .expect_place_buy_order()
            .times(1)
            .withf(|req| {
                req.order_type == OrderType::Market && req.amount == dec!(0.1) && !req.reduce_only
            })
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "entry-1".into(),
                })
            });
        // Stop leg then TP leg, both reduce-only sells at tick-rounded
        // bracket prices.
        let mut seq = Sequence::new();
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.order_type == OrderType::StopMarket
                    && req.reduce_only
                    && req.trigger_price == Some(dec!(995))
            })
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "sl-1".into(),
                })
            });
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.order_type == OrderType::Limit
                    && req.reduce_only
                    && req.price == Some(dec!(1006.5))
            })
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "tp-1".into(),
                })
            });

        let config = RazorConfig {
            rsi_oversold: dec!(80),
            rsi_overbought: dec!(90),
            adaptive_risk_enabled: false,
            ..RazorConfig::default()
        };
        let (mut executor, journal) = build_executor(broker, config).await;
        executor.initialize().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::Analyzing);

        // First tick opens the live bar, second closes it and executes.
        executor.on_ticker(Some(dec!(100.05)), T0 + MINUTE).await;
        executor
            .on_ticker(Some(dec!(100.05)), T0 + 2 * MINUTE + 1)
            .await;

        assert_eq!(executor.state(), ExecutorState::PositionOpen);
        assert_eq!(executor.daily_trades, 1);
        assert!(executor.cooldown_until_ms > T0 + 2 * MINUTE);
        assert!(!executor.be_moved_for_trade);

        let open = journal.open_trades_for_key(&test_key()).await.unwrap();
        assert_eq!(open.len(), 1);
        let trade = &open[0];
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.entry_order_id, "entry-1");
        assert_eq!(trade.sl_order_id.as_deref(), Some("sl-1"));
        assert_eq!(trade.tp_order_id.as_deref(), Some("tp-1"));
        assert_eq!(trade.entry_price, dec!(1000));
        assert_eq!(trade.stop_loss, dec!(995));
        assert_eq!(trade.take_profit, dec!(1006.5));
        assert_eq!(executor.current_trade_id.as_deref(), Some(trade.id.as_str()));
    }

    // A failing take-profit leg must cancel the already-placed stop and
    // roll the executor back to analyzing with an error cooldown.
    #[tokio::test]
    async fn tp_failure_rolls_back_stop_and_cools_down() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(wavy_history(40)));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));
        broker
            .expect_get_instrument()
            .returning(|_| Ok(test_instrument()));
        broker
            .expect_get_ticker()
            .returning(|_| Ok(test_ticker(dec!(1000))));
        broker
            .expect_get_account_summary()
            .returning(|_| Ok(rich_account()));
        broker.expect_place_buy_order().returning(|_| {
            Ok(OrderResult {
                order_id: "entry-1".into(),
            })
        });

        let mut seq = Sequence::new();
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.order_type == OrderType::StopMarket)
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "sl-1".into(),
                })
            });
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| req.order_type == OrderType::Limit)
            .returning(|_| Err(anyhow::anyhow!("rejected")));
        broker
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|id| id == "sl-1")
            .returning(|_| Ok(()));

        let config = RazorConfig {
            rsi_oversold: dec!(80),
            rsi_overbought: dec!(90),
            adaptive_risk_enabled: false,
            ..RazorConfig::default()
        };
        let (mut executor, journal) = build_executor(broker, config).await;
        executor.initialize().await.unwrap();

        executor.on_ticker(Some(dec!(100.05)), T0 + MINUTE).await;
        let now = T0 + 2 * MINUTE + 1;
        executor.on_ticker(Some(dec!(100.05)), now).await;

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        assert_eq!(executor.daily_trades, 0);
        assert_eq!(executor.cooldown_until_ms, now + 60_000);
        assert!(journal
            .open_trades_for_key(&test_key())
            .await
            .unwrap()
            .is_empty());
    }

    // Scenario: break-even move. The new stop is placed and confirmed
    // before the old one is cancelled, and the journal is updated.
    #[tokio::test]
    async fn break_even_moves_stop_new_before_cancel() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_positions().returning(|_| {
            Ok(vec![BrokerPosition {
                instrument: "BTC-PERPETUAL".into(),
                size: dec!(0.1),
                average_price: dec!(1000),
            }])
        });
        broker
            .expect_get_instrument()
            .returning(|_| Ok(test_instrument()));

        let mut seq = Sequence::new();
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.order_type == OrderType::StopMarket
                    && req.reduce_only
                    && req.trigger_price == Some(dec!(1000.5))
            })
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "sl-2".into(),
                })
            });
        broker
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|id| id == "sl-1")
            .returning(|_| Ok(()));

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        let trade_id = journal.record_trade(&seed_open_trade(Side::Buy)).await.unwrap();
        executor.current_trade_id = Some(trade_id.clone());
        executor.state = ExecutorState::PositionOpen;

        executor.on_ticker(Some(dec!(1003.25)), T0).await;

        assert!(executor.be_moved_for_trade);
        let trade = journal.get_trade(&trade_id).await.unwrap().unwrap();
        assert_eq!(trade.sl_order_id.as_deref(), Some("sl-2"));
        assert_eq!(trade.stop_loss, dec!(1000.5));
        // TP leg untouched.
        assert_eq!(trade.tp_order_id.as_deref(), Some("tp-1"));
    }

    // Below the trigger price nothing moves.
    #[tokio::test]
    async fn break_even_waits_for_trigger() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_positions().returning(|_| {
            Ok(vec![BrokerPosition {
                instrument: "BTC-PERPETUAL".into(),
                size: dec!(0.1),
                average_price: dec!(1000),
            }])
        });
        broker
            .expect_get_instrument()
            .returning(|_| Ok(test_instrument()));
        broker.expect_place_sell_order().times(0);
        broker.expect_cancel_order().times(0);

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        let trade_id = journal.record_trade(&seed_open_trade(Side::Buy)).await.unwrap();
        executor.current_trade_id = Some(trade_id);
        executor.state = ExecutorState::PositionOpen;

        // Trigger is 1003.25; a tick just under must not move the stop.
        executor.on_ticker(Some(dec!(1003.0)), T0).await;
        assert!(!executor.be_moved_for_trade);
    }

    // Scenario: TP exit detected by the watcher. The journal row closes
    // with tp_hit, the cooldown arms, and no entries happen inside it.
    #[tokio::test]
    async fn tp_exit_closes_journal_and_resumes_after_cooldown() {
        let mut broker = MockBrokerClient::new();
        // Watcher poll and protective sweep both see a flat book.
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));
        // TP order is gone, SL still resting: that pins the exit reason.
        broker.expect_get_open_orders().returning(|_| {
            Ok(vec![BrokerOrder {
                order_id: "sl-1".into(),
                order_type: OrderType::StopMarket,
                amount: dec!(0.1),
                price: None,
                trigger_price: Some(dec!(995)),
                reduce_only: true,
                label: None,
            }])
        });
        broker
            .expect_cancel_order()
            .withf(|id| id == "sl-1")
            .returning(|_| Ok(()));
        broker.expect_place_buy_order().times(0);
        broker.expect_place_sell_order().times(0);

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        let trade_id = journal.record_trade(&seed_open_trade(Side::Buy)).await.unwrap();
        executor.current_trade_id = Some(trade_id.clone());
        executor.state = ExecutorState::PositionOpen;
        executor.last_price = Some(dec!(1006.5));

        executor.on_ticker(Some(dec!(1006.5)), T0).await;

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        assert!(executor.current_trade_id.is_none());
        assert_eq!(executor.cooldown_until_ms, T0 + 3 * MINUTE);

        let trade = journal.get_trade(&trade_id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_reason, Some(ExitReason::TpHit));
        assert_eq!(trade.exit_price, Some(dec!(1006.5)));
        // (1006.5 - 1000) * 0.1
        assert_eq!(trade.pnl, Some(dec!(0.65)));

        // Ticks inside the cooldown window never reach execution.
        executor.on_ticker(Some(dec!(1006.5)), T0 + MINUTE).await;
        assert_eq!(executor.state(), ExecutorState::Analyzing);
    }

    // Scenario: ghost cleanup at startup.
    #[tokio::test]
    async fn ghost_trade_closed_at_entry_with_zero_pnl() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(flat_history(200, dec!(100))));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        let trade_id = journal.record_trade(&seed_open_trade(Side::Buy)).await.unwrap();

        executor.initialize().await.unwrap();

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        let trade = journal.get_trade(&trade_id).await.unwrap().unwrap();
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_reason, Some(ExitReason::Manual));
        assert_eq!(trade.exit_price, Some(dec!(1000)));
        assert_eq!(trade.pnl, Some(Decimal::ZERO));
    }

    // Scenario: orphan adoption at startup.
    #[tokio::test]
    async fn orphan_position_adopted_with_auto_resume_marker() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(flat_history(200, dec!(1000))));
        broker.expect_get_positions().returning(|_| {
            Ok(vec![BrokerPosition {
                instrument: "BTC-PERPETUAL".into(),
                size: dec!(0.1),
                average_price: dec!(1000),
            }])
        });
        broker.expect_get_open_orders().returning(|_| {
            Ok(vec![
                BrokerOrder {
                    order_id: "sl-x".into(),
                    order_type: OrderType::StopMarket,
                    amount: dec!(0.1),
                    price: None,
                    trigger_price: Some(dec!(995)),
                    reduce_only: true,
                    label: None,
                },
                BrokerOrder {
                    order_id: "tp-x".into(),
                    order_type: OrderType::Limit,
                    amount: dec!(0.1),
                    price: Some(dec!(1010)),
                    trigger_price: None,
                    reduce_only: true,
                    label: None,
                },
            ])
        });

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        executor.initialize().await.unwrap();

        assert_eq!(executor.state(), ExecutorState::PositionOpen);
        let open = journal.open_trades_for_key(&test_key()).await.unwrap();
        assert_eq!(open.len(), 1);
        let trade = &open[0];
        assert_eq!(trade.entry_order_id, AUTO_RESUME_ORDER_ID);
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.entry_price, dec!(1000));
        assert_eq!(trade.amount, dec!(0.1));
        assert_eq!(trade.stop_loss, dec!(995));
        assert_eq!(trade.take_profit, dec!(1010));
        assert_eq!(executor.current_trade_id.as_deref(), Some(trade.id.as_str()));
    }

    // Consistent open trade + broker position resumes tracking directly.
    #[tokio::test]
    async fn consistent_state_resumes_position_open() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Ok(flat_history(200, dec!(1000))));
        broker.expect_get_positions().returning(|_| {
            Ok(vec![BrokerPosition {
                instrument: "BTC-PERPETUAL".into(),
                size: dec!(0.1),
                average_price: dec!(1000),
            }])
        });

        let (mut executor, journal) = build_executor(broker, RazorConfig::default()).await;
        let trade_id = journal.record_trade(&seed_open_trade(Side::Buy)).await.unwrap();

        executor.initialize().await.unwrap();
        assert_eq!(executor.state(), ExecutorState::PositionOpen);
        assert_eq!(executor.current_trade_id.as_deref(), Some(trade_id.as_str()));
    }

    // Synthetic history keeps the executor alive when the broker has no
    // candle data.
    #[tokio::test]
    async fn missing_history_falls_back_to_synthetic_seed() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_candles()
            .returning(|_, _, _| Err(anyhow::anyhow!("history unavailable")));
        broker
            .expect_get_ticker()
            .returning(|_| Ok(test_ticker(dec!(250))));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));

        let (mut executor, _journal) = build_executor(broker, RazorConfig::default()).await;
        executor.initialize().await.unwrap();

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        assert_eq!(executor.aggregator.bars_collected(), 200);
    }

    // Warm-up gate: below five bars the executor reports initializing.
    #[tokio::test]
    async fn warmup_below_five_bars_stays_initializing() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_candles().returning(|_, _, _| Ok(Vec::new()));
        broker
            .expect_get_ticker()
            .returning(|_| Ok(test_ticker(dec!(100))));
        broker.expect_get_positions().returning(|_| Ok(Vec::new()));

        let (mut executor, _journal) = build_executor(broker, RazorConfig::default()).await;
        // Skip initialize's seeding entirely: drive a fresh aggregator.
        executor.initialized = true;
        executor.state = ExecutorState::Initializing;

        executor.on_ticker(Some(dec!(100)), T0).await;
        executor.on_ticker(Some(dec!(100)), T0 + MINUTE).await;
        assert_eq!(executor.state(), ExecutorState::Initializing);
    }

    #[tokio::test]
    async fn force_resume_clears_tracking_and_arms_cooldown() {
        let broker = MockBrokerClient::new();
        let (mut executor, _journal) = build_executor(broker, RazorConfig::default()).await;
        executor.state = ExecutorState::PositionOpen;
        executor.current_trade_id = Some("t1".into());
        executor.be_moved_for_trade = true;

        executor.force_resume().await.unwrap();

        assert_eq!(executor.state(), ExecutorState::Analyzing);
        assert!(executor.current_trade_id.is_none());
        assert!(!executor.be_moved_for_trade);
        assert!(executor.cooldown_until_ms > 0);
    }

    #[tokio::test]
    async fn cleanup_stops_processing() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_positions().times(0);

        let (mut executor, _journal) = build_executor(broker, RazorConfig::default()).await;
        executor.state = ExecutorState::Analyzing;
        executor.cleanup().await;
        assert_eq!(executor.state(), ExecutorState::Stopped);

        // Ticks after cleanup are ignored entirely.
        executor.on_ticker(Some(dec!(100)), T0).await;
        assert_eq!(executor.state(), ExecutorState::Stopped);
    }

    #[tokio::test]
    async fn daily_counter_resets_after_24h() {
        let broker = MockBrokerClient::new();
        let (mut executor, _journal) = build_executor(broker, RazorConfig::default()).await;
        executor.initialized = true;
        executor.state = ExecutorState::Analyzing;
        executor.daily_trades = 7;
        executor.daily_reset_ms = T0 - 86_400_000 - 1;

        executor.on_ticker(Some(dec!(100)), T0).await;
        assert_eq!(executor.daily_trades, 0);
    }
}
