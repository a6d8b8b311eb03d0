use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tracing::{info, warn};

use super::RazorExecutor;
use crate::broker::OrderRequest;
use crate::sizing::{clamp_to_leverage, round_to_step, round_to_tick};
use crate::types::{Direction, NewTrade, Side};

/// Pause between the market entry and protective-leg placement, giving the
/// venue time to report the fill.
const ENTRY_CONFIRM_DELAY: Duration = Duration::from_millis(500);

impl RazorExecutor {
    /// The full entry pipeline: pre-flight, sizing, adaptive bracket,
    /// market entry, both protective legs, journal insert.
    ///
    /// A protective-leg failure after the entry cancels any leg that did
    /// make it to the venue before the error is returned. A journal failure
    /// is logged and tolerated; reconciliation adopts the position later.
    pub(crate) async fn execute_entry(
        &mut self,
        direction: Direction,
        now_ms: i64,
    ) -> Result<Option<String>> {
        let side = match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
            Direction::None => return Err(anyhow!("no direction to execute")),
        };
        let instrument = self.key.instrument.clone();

        // Pre-flight: the single-position guard, checked against the venue
        // rather than our own state.
        let positions = self.context.broker.get_positions(self.currency()).await?;
        if positions.iter().any(|p| p.instrument == instrument && p.is_open()) {
            return Err(anyhow!("position already open on {}", instrument));
        }

        let info = self.instrument_info().await?;
        let ticker = self.context.broker.get_ticker(&instrument).await?;
        let price = ticker.last_price;
        if price <= Decimal::ZERO {
            return Err(anyhow!("bad ticker price {}", price));
        }

        let mut amount = round_to_step(self.config.trade_size / price, info.min_trade_amount)
            .max(info.min_trade_amount);
        let account = self.context.broker.get_account_summary(self.currency()).await?;
        amount = clamp_to_leverage(amount, price, &info, &account)?;

        let (sl_pct, tp_pct) = self.adaptive_bracket_percents(price);

        let hundred = dec!(100);
        let (stop_loss, take_profit) = match side {
            Side::Buy => (
                price * (Decimal::ONE - sl_pct / hundred),
                price * (Decimal::ONE + tp_pct / hundred),
            ),
            Side::Sell => (
                price * (Decimal::ONE + sl_pct / hundred),
                price * (Decimal::ONE - tp_pct / hundred),
            ),
        };
        let stop_loss = round_to_tick(stop_loss, info.tick_size);
        let take_profit = round_to_tick(take_profit, info.tick_size);

        let label = format!("razor_{}_{}", direction, now_ms);

        // Entry.
        let entry_request = OrderRequest::market(&instrument, amount, &label);
        let entry = match side {
            Side::Buy => self.context.broker.place_buy_order(&entry_request).await?,
            Side::Sell => self.context.broker.place_sell_order(&entry_request).await?,
        };
        info!(
            "{}: entry {} {} @ ~{} ({})",
            self.key, side, amount, price, entry.order_id
        );
        tokio::time::sleep(ENTRY_CONFIRM_DELAY).await;

        // Protective stop.
        let sl_request =
            OrderRequest::stop_market(&instrument, amount, stop_loss, &format!("{}_sl", label))
                .reduce_only();
        let sl = match side {
            Side::Buy => self.context.broker.place_sell_order(&sl_request).await,
            Side::Sell => self.context.broker.place_buy_order(&sl_request).await,
        }
        .map_err(|e| anyhow!("stop-loss placement failed: {}", e))?;

        // Take profit; roll the stop back if this leg cannot be placed.
        let tp_request =
            OrderRequest::limit(&instrument, amount, take_profit, &format!("{}_tp", label))
                .reduce_only();
        let tp_result = match side {
            Side::Buy => self.context.broker.place_sell_order(&tp_request).await,
            Side::Sell => self.context.broker.place_buy_order(&tp_request).await,
        };
        let tp = match tp_result {
            Ok(tp) => tp,
            Err(err) => {
                warn!(
                    "{}: take-profit placement failed, cancelling stop {}: {}",
                    self.key, sl.order_id, err
                );
                if let Err(cancel_err) = self.context.broker.cancel_order(&sl.order_id).await {
                    warn!("{}: stop rollback failed: {}", self.key, cancel_err);
                }
                return Err(anyhow!("take-profit placement failed: {}", err));
            }
        };

        // Journal. The live position is real regardless of this write.
        let new_trade = NewTrade {
            user_id: self.key.user_id.clone(),
            strategy_name: self.key.strategy_name.clone(),
            instrument: instrument.clone(),
            broker: self.key.broker.clone(),
            environment: self.key.environment,
            side,
            entry_order_id: entry.order_id.clone(),
            sl_order_id: Some(sl.order_id.clone()),
            tp_order_id: Some(tp.order_id.clone()),
            entry_price: price,
            amount,
            stop_loss,
            take_profit,
        };
        match self.context.journal.record_trade(&new_trade).await {
            Ok(trade_id) => {
                info!(
                    "{}: trade {} journaled (sl {}, tp {})",
                    self.key, trade_id, stop_loss, take_profit
                );
                Ok(Some(trade_id))
            }
            Err(err) => {
                warn!(
                    "{}: journal write failed, position live without a row: {}",
                    self.key, err
                );
                Ok(None)
            }
        }
    }

    /// Stop/TP percentages with the adaptive-risk adjustments applied.
    fn adaptive_bracket_percents(&self, price: Decimal) -> (Decimal, Decimal) {
        let mut sl_pct = self.config.stop_loss_percent;
        let mut tp_pct = self.config.take_profit_percent;
        if !self.config.adaptive_risk_enabled {
            return (sl_pct, tp_pct);
        }

        let snapshot = match &self.last_snapshot {
            Some(s) => s,
            None => return (sl_pct, tp_pct),
        };

        if let Some(atr_value) = snapshot.atr14 {
            if !price.is_zero() {
                let atr_pct = atr_value / price * dec!(100);
                if atr_pct < dec!(0.05) {
                    // Chop: keep losers tight.
                    sl_pct *= dec!(0.85);
                } else if atr_pct > dec!(0.4) {
                    // Wide regime: let winners breathe.
                    tp_pct *= dec!(1.15);
                }
            }
        }

        if snapshot.trend_score.abs() >= 2 {
            tp_pct *= dec!(1.05);
        }

        (sl_pct, tp_pct)
    }
}
