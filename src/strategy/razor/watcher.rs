use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info, warn};

use super::{MetricsCache, RazorExecutor, METRICS_CACHE_TTL_MS, STOP_ADJUST_THROTTLE_MS};
use crate::broker::BrokerPosition;
use crate::sizing::round_to_tick;
use crate::strategy::{ExecutorState, PositionMetrics};
use crate::types::{realized_pnl, ExitReason, Side, TradeRecord};

impl RazorExecutor {
    /// Per-tick position watch, throttled so position polling and stop
    /// management never exceed one pass per two seconds.
    pub(crate) async fn watch_position(&mut self, now_ms: i64) {
        if now_ms - self.last_position_poll_ms < STOP_ADJUST_THROTTLE_MS {
            return;
        }
        self.last_position_poll_ms = now_ms;

        let currency = self.currency().to_string();
        let positions = match self.context.broker.get_positions(&currency).await {
            Ok(positions) => positions,
            Err(err) => {
                debug!("{}: position poll failed: {}", self.key, err);
                return;
            }
        };

        let open = positions
            .into_iter()
            .find(|p| p.instrument == self.key.instrument && p.is_open());

        match open {
            Some(position) => self.manage_stops(&position, now_ms).await,
            None => self.handle_position_closed(now_ms).await,
        }
    }

    /// Break-even and trailing stop management for the live position.
    async fn manage_stops(&mut self, _position: &BrokerPosition, now_ms: i64) {
        if now_ms - self.last_stop_check_ms < STOP_ADJUST_THROTTLE_MS {
            return;
        }
        self.last_stop_check_ms = now_ms;

        let Some(trade_id) = self.current_trade_id.clone() else {
            return;
        };
        let trade = match self.context.journal.get_trade(&trade_id).await {
            Ok(Some(trade)) => trade,
            Ok(None) => return,
            Err(err) => {
                debug!("{}: trade lookup failed: {}", self.key, err);
                return;
            }
        };
        let Some(last_price) = self.last_price else {
            return;
        };
        let tick_size = match self.instrument_info().await {
            Ok(info) => info.tick_size,
            Err(err) => {
                debug!("{}: instrument lookup failed: {}", self.key, err);
                return;
            }
        };

        if self.config.break_even_enabled && !self.be_moved_for_trade {
            if let Some(be_price) = self.break_even_target(&trade, last_price, tick_size) {
                match self
                    .context
                    .lifecycle
                    .move_protective_stop(&trade, be_price, tick_size)
                    .await
                {
                    Ok(order_id) => {
                        self.be_moved_for_trade = true;
                        info!(
                            "{}: break-even stop set at {} (order {})",
                            self.key, be_price, order_id
                        );
                        return;
                    }
                    Err(err) => {
                        warn!("{}: break-even move failed: {}", self.key, err);
                        return;
                    }
                }
            }
        }

        if self.config.trailing_stop_enabled {
            if let Some(new_stop) = self.trailing_target(&trade, last_price, tick_size) {
                match self
                    .context
                    .lifecycle
                    .move_protective_stop(&trade, new_stop, tick_size)
                    .await
                {
                    Ok(_) => debug!("{}: stop trailed to {}", self.key, new_stop),
                    Err(err) => warn!("{}: trailing move failed: {}", self.key, err),
                }
            }
        }
    }

    /// Break-even price when the trigger has been reached and the stop has
    /// not yet been moved past it.
    fn break_even_target(
        &self,
        trade: &TradeRecord,
        last_price: Decimal,
        tick_size: Decimal,
    ) -> Option<Decimal> {
        let entry = trade.entry_price;
        let offset = Decimal::from(self.config.break_even_offset_ticks) * tick_size;

        match trade.side {
            Side::Buy => {
                let trigger = entry + (trade.take_profit - entry) * self.config.break_even_trigger_to_tp;
                let be_price = round_to_tick(entry + offset, tick_size);
                (last_price >= trigger && trade.stop_loss < be_price).then_some(be_price)
            }
            Side::Sell => {
                let trigger = entry - (entry - trade.take_profit) * self.config.break_even_trigger_to_tp;
                let be_price = round_to_tick(entry - offset, tick_size);
                (last_price <= trigger && trade.stop_loss > be_price).then_some(be_price)
            }
        }
    }

    /// Trailed stop price once activation profit is reached and the new
    /// level improves on the current stop by at least one tick.
    fn trailing_target(
        &self,
        trade: &TradeRecord,
        last_price: Decimal,
        tick_size: Decimal,
    ) -> Option<Decimal> {
        let entry = trade.entry_price;
        if entry.is_zero() {
            return None;
        }
        let hundred = dec!(100);
        let profit_pct = match trade.side {
            Side::Buy => (last_price - entry) / entry * hundred,
            Side::Sell => (entry - last_price) / entry * hundred,
        };
        if profit_pct < self.config.trailing_stop_activation_percent {
            return None;
        }

        let distance = self.config.trailing_stop_distance / hundred;
        match trade.side {
            Side::Buy => {
                let target = round_to_tick(last_price * (Decimal::ONE - distance), tick_size);
                (target >= trade.stop_loss + tick_size).then_some(target)
            }
            Side::Sell => {
                let target = round_to_tick(last_price * (Decimal::ONE + distance), tick_size);
                (target <= trade.stop_loss - tick_size).then_some(target)
            }
        }
    }

    /// The broker shows no position: derive the exit, close the journal
    /// row, sweep leftovers and resume analysis after the cooldown.
    async fn handle_position_closed(&mut self, now_ms: i64) {
        if let Some(trade_id) = self.current_trade_id.clone() {
            match self.context.journal.get_trade(&trade_id).await {
                Ok(Some(trade)) => {
                    let (exit_price, exit_reason) = self.derive_exit(&trade).await;
                    let (pnl, pnl_pct) =
                        realized_pnl(trade.side, trade.entry_price, exit_price, trade.amount);
                    if let Err(err) = self
                        .context
                        .journal
                        .close_trade(&trade_id, exit_price, exit_reason, pnl, pnl_pct)
                        .await
                    {
                        warn!("{}: journal close failed: {}", self.key, err);
                    } else {
                        info!(
                            "{}: position closed ({:?}) exit {} pnl {:.4}",
                            self.key, exit_reason, exit_price, pnl
                        );
                    }
                }
                Ok(None) => warn!("{}: current trade {} missing from journal", self.key, trade_id),
                Err(err) => warn!("{}: trade lookup failed on close: {}", self.key, err),
            }
        }

        // Cancel whichever protective leg survived the exit.
        if let Err(err) = self
            .context
            .lifecycle
            .sweep_protective_orders(&self.key.instrument)
            .await
        {
            debug!("{}: protective sweep failed: {}", self.key, err);
        }

        self.current_trade_id = None;
        self.be_moved_for_trade = false;
        self.clear_metrics_cache();
        self.state = ExecutorState::Analyzing;
        self.arm_cooldown(now_ms);
    }

    /// Pins the exit to whichever protective leg disappeared from the book.
    /// When order ids are untraceable the stored stop prices decide whether
    /// the P&L sign is meaningful; otherwise the close is `manual`.
    async fn derive_exit(&self, trade: &TradeRecord) -> (Decimal, ExitReason) {
        let open_orders = self
            .context
            .broker
            .get_open_orders(&self.key.instrument)
            .await
            .unwrap_or_default();
        let order_is_open = |id: &Option<String>| {
            id.as_ref()
                .map(|id| open_orders.iter().any(|o| &o.order_id == id))
                .unwrap_or(false)
        };

        let sl_open = order_is_open(&trade.sl_order_id);
        let tp_open = order_is_open(&trade.tp_order_id);

        if trade.sl_order_id.is_some() && !sl_open && tp_open {
            return (trade.stop_loss, ExitReason::SlHit);
        }
        if trade.tp_order_id.is_some() && !tp_open && sl_open {
            return (trade.take_profit, ExitReason::TpHit);
        }

        let last = self.last_price.unwrap_or(trade.entry_price);
        if trade.stop_loss.is_zero() && trade.take_profit.is_zero() {
            let (pnl, _) = realized_pnl(trade.side, trade.entry_price, last, trade.amount);
            let reason = if pnl >= Decimal::ZERO {
                ExitReason::TpHit
            } else {
                ExitReason::SlHit
            };
            return (last, reason);
        }
        (last, ExitReason::Manual)
    }

    /// Broker-derived live position view with a 5-second cache.
    pub(crate) async fn fetch_position_metrics(
        &mut self,
        force_refresh: bool,
    ) -> Result<Option<PositionMetrics>> {
        let now_ms = Utc::now().timestamp_millis();
        if !force_refresh {
            if let Some(cache) = &self.metrics_cache {
                if now_ms < cache.expires_at_ms {
                    return Ok(cache.data.clone());
                }
            }
        }

        let positions = self.context.broker.get_positions(self.currency()).await?;
        let position = positions
            .into_iter()
            .find(|p| p.instrument == self.key.instrument && p.is_open());

        let data = match position {
            None => None,
            Some(position) => {
                let side = position.side();
                let size = position.size.abs();
                let entry = position.average_price;
                let current = self.last_price.unwrap_or(entry);
                let (pnl, pnl_pct) = realized_pnl(side, entry, current, size);

                let (stop_loss, take_profit, opened_at) = match &self.current_trade_id {
                    Some(id) => match self.context.journal.get_trade(id).await? {
                        Some(trade) => (
                            Some(trade.stop_loss),
                            Some(trade.take_profit),
                            Some(trade.opened_at),
                        ),
                        None => (None, None, None),
                    },
                    None => (None, None, None),
                };

                let risk_reward = match (stop_loss, take_profit) {
                    (Some(sl), Some(tp)) => {
                        let risk = (entry - sl).abs();
                        let reward = (tp - entry).abs();
                        (!risk.is_zero()).then(|| reward / risk)
                    }
                    _ => None,
                };

                Some(PositionMetrics {
                    instrument: self.key.instrument.clone(),
                    side,
                    size,
                    entry_price: entry,
                    current_price: current,
                    unrealized_pnl: pnl,
                    unrealized_pnl_pct: pnl_pct,
                    stop_loss,
                    take_profit,
                    risk_reward,
                    duration_secs: opened_at
                        .map(|t| (Utc::now() - t).num_seconds().max(0))
                        .unwrap_or(0),
                })
            }
        };

        self.metrics_cache = Some(MetricsCache {
            data: data.clone(),
            expires_at_ms: now_ms + METRICS_CACHE_TTL_MS,
        });
        Ok(data)
    }
}
