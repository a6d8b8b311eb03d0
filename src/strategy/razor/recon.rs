use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use super::RazorExecutor;
use crate::broker::{BrokerPosition, OrderType};
use crate::strategy::ExecutorState;
use crate::types::{ExitReason, NewTrade, Side, AUTO_RESUME_ORDER_ID};

impl RazorExecutor {
    /// One-shot startup reconciliation against broker ground truth.
    ///
    /// Journal and broker can disagree after crashes or missed fills; this
    /// settles the executor into the safest state that matches reality.
    /// Failures here never abort startup; the executor defaults to
    /// `analyzing`.
    pub(crate) async fn reconcile(&mut self) {
        let open_trades = match self.context.journal.open_trades_for_key(&self.key).await {
            Ok(trades) => trades,
            Err(err) => {
                warn!("{}: journal read failed during reconcile: {}", self.key, err);
                self.state = ExecutorState::Analyzing;
                return;
            }
        };

        let currency = self.currency().to_string();
        let position = match self.context.broker.get_positions(&currency).await {
            Ok(positions) => positions
                .into_iter()
                .find(|p| p.instrument == self.key.instrument && p.is_open()),
            Err(err) => {
                warn!("{}: position fetch failed during reconcile: {}", self.key, err);
                self.state = ExecutorState::Analyzing;
                return;
            }
        };

        match (open_trades.is_empty(), position) {
            (true, None) => {
                self.state = ExecutorState::Analyzing;
            }
            (false, None) => {
                // Ghost trades: journal says open, broker says flat.
                for trade in &open_trades {
                    info!("{}: closing ghost trade {}", self.key, trade.id);
                    if let Err(err) = self
                        .context
                        .journal
                        .close_trade(
                            &trade.id,
                            trade.entry_price,
                            ExitReason::Manual,
                            Decimal::ZERO,
                            Decimal::ZERO,
                        )
                        .await
                    {
                        warn!("{}: ghost cleanup failed for {}: {}", self.key, trade.id, err);
                    }
                }
                self.state = ExecutorState::Analyzing;
            }
            (true, Some(position)) => {
                // Orphan position: broker says open, journal has nothing.
                self.adopt_orphan(&position).await;
                self.state = ExecutorState::PositionOpen;
            }
            (false, Some(_)) => {
                // Consistent: resume tracking the oldest open row.
                self.current_trade_id = Some(open_trades[0].id.clone());
                info!(
                    "{}: resumed tracking open trade {}",
                    self.key, open_trades[0].id
                );
                self.state = ExecutorState::PositionOpen;
            }
        }
    }

    /// Inserts a journal row for a position this process never opened,
    /// reading protective levels off the book where possible and estimating
    /// them otherwise.
    async fn adopt_orphan(&mut self, position: &BrokerPosition) {
        let side = position.side();
        let entry = position.average_price;

        let open_orders = self
            .context
            .broker
            .get_open_orders(&self.key.instrument)
            .await
            .unwrap_or_default();

        let stop_order = open_orders
            .iter()
            .find(|o| o.reduce_only && o.order_type == OrderType::StopMarket);
        let tp_order = open_orders
            .iter()
            .find(|o| o.reduce_only && o.order_type == OrderType::Limit);

        let (est_sl, est_tp) = match side {
            Side::Buy => (entry * dec!(0.995), entry * dec!(1.01)),
            Side::Sell => (entry * dec!(1.005), entry * dec!(0.99)),
        };
        let stop_loss = stop_order.and_then(|o| o.effective_price()).unwrap_or(est_sl);
        let take_profit = tp_order.and_then(|o| o.effective_price()).unwrap_or(est_tp);

        let new_trade = NewTrade {
            user_id: self.key.user_id.clone(),
            strategy_name: self.key.strategy_name.clone(),
            instrument: self.key.instrument.clone(),
            broker: self.key.broker.clone(),
            environment: self.key.environment,
            side,
            entry_order_id: AUTO_RESUME_ORDER_ID.to_string(),
            sl_order_id: stop_order.map(|o| o.order_id.clone()),
            tp_order_id: tp_order.map(|o| o.order_id.clone()),
            entry_price: entry,
            amount: position.size.abs(),
            stop_loss,
            take_profit,
        };

        match self.context.journal.record_trade(&new_trade).await {
            Ok(trade_id) => {
                info!(
                    "{}: adopted orphan position as trade {} (sl {}, tp {})",
                    self.key, trade_id, stop_loss, take_profit
                );
                self.current_trade_id = Some(trade_id);
            }
            Err(err) => {
                // Position stays guarded by the executor even without a row;
                // the next reconcile pass can retry the insert.
                warn!("{}: orphan adoption write failed: {}", self.key, err);
            }
        }
    }
}
