use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::broker::{settlement_currency, BrokerClient, OrderRequest};
use crate::journal::TradeJournal;
use crate::sizing::round_to_tick;
use crate::types::{Side, TradeRecord};

/// Protective-order edits shared by every executor.
///
/// The one rule here: a live position is never left without a reduce-only
/// stop. Replacement stops go in before the old stop comes out.
pub struct OrderLifecycle {
    broker: Arc<dyn BrokerClient>,
    journal: Arc<TradeJournal>,
}

impl OrderLifecycle {
    pub fn new(broker: Arc<dyn BrokerClient>, journal: Arc<TradeJournal>) -> Self {
        Self { broker, journal }
    }

    /// Moves a trade's stop-loss to `new_stop` (break-even or trailing).
    ///
    /// Places the replacement stop first and waits for its id, persists the
    /// new id and price, then cancels the previous stop. If placement fails
    /// the old stop stays untouched. Returns the new stop order id.
    pub async fn move_protective_stop(
        &self,
        trade: &TradeRecord,
        new_stop: Decimal,
        tick_size: Decimal,
    ) -> Result<String> {
        let stop_price = round_to_tick(new_stop, tick_size);
        let label = format!("razor_stop_{}", Utc::now().timestamp_millis());
        let request = OrderRequest::stop_market(&trade.instrument, trade.amount, stop_price, &label)
            .reduce_only();

        let result = match trade.side {
            Side::Buy => self.broker.place_sell_order(&request).await,
            Side::Sell => self.broker.place_buy_order(&request).await,
        }
        .context("replacement stop placement failed, old stop left in place")?;

        self.journal
            .update_order_ids(&trade.id, Some(&result.order_id), None)
            .await?;
        self.journal
            .update_stops(&trade.id, Some(stop_price), None)
            .await?;

        if let Some(old_id) = trade.sl_order_id.as_deref() {
            if let Err(err) = self.broker.cancel_order(old_id).await {
                // Already filled or cancelled on the venue side.
                debug!("old stop {} cancel failed: {}", old_id, err);
            }
        }

        info!(
            "stop moved for trade {}: {} -> {} (order {})",
            trade.id, trade.stop_loss, stop_price, result.order_id
        );
        Ok(result.order_id)
    }

    /// Cancels reduce-only orders on `instrument` that no longer guard an
    /// open position. Returns how many cancels were issued.
    pub async fn sweep_protective_orders(&self, instrument: &str) -> Result<usize> {
        let positions = self
            .broker
            .get_positions(settlement_currency(instrument))
            .await?;
        if positions
            .iter()
            .any(|p| p.instrument == instrument && p.is_open())
        {
            return Ok(0);
        }

        let orders = self.broker.get_open_orders(instrument).await?;
        let mut cancelled = 0;
        for order in orders.iter().filter(|o| o.reduce_only) {
            match self.broker.cancel_order(&order.order_id).await {
                Ok(()) => cancelled += 1,
                Err(err) => {
                    // Racing against a fill; the venue already removed it.
                    warn!("orphan order {} cancel failed: {}", order.order_id, err);
                }
            }
        }

        if cancelled > 0 {
            info!("swept {} orphan protective orders on {}", cancelled, instrument);
        }
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerOrder, BrokerPosition, MockBrokerClient, OrderResult, OrderType};
    use crate::journal::TradeJournal;
    use crate::types::{Environment, NewTrade, StrategyKey};
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    async fn seeded_trade(journal: &TradeJournal) -> TradeRecord {
        let key = StrategyKey::new("u1", "razor", "BTC-PERPETUAL", Environment::Testnet);
        let id = journal
            .record_trade(&NewTrade {
                user_id: key.user_id.clone(),
                strategy_name: key.strategy_name.clone(),
                instrument: key.instrument.clone(),
                broker: key.broker.clone(),
                environment: key.environment,
                side: Side::Buy,
                entry_order_id: "entry-1".into(),
                sl_order_id: Some("sl-old".into()),
                tp_order_id: Some("tp-1".into()),
                entry_price: dec!(1000),
                amount: dec!(0.1),
                stop_loss: dec!(995),
                take_profit: dec!(1006.5),
            })
            .await
            .unwrap();
        journal.get_trade(&id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn stop_move_places_before_cancelling() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let trade = seeded_trade(&journal).await;

        let mut broker = MockBrokerClient::new();
        let mut seq = Sequence::new();
        broker
            .expect_place_sell_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|req| {
                req.reduce_only
                    && req.order_type == OrderType::StopMarket
                    && req.trigger_price == Some(dec!(1000.5))
            })
            .returning(|_| {
                Ok(OrderResult {
                    order_id: "sl-new".into(),
                })
            });
        broker
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|id| id == "sl-old")
            .returning(|_| Ok(()));

        let lifecycle = OrderLifecycle::new(Arc::new(broker), Arc::clone(&journal));
        let new_id = lifecycle
            .move_protective_stop(&trade, dec!(1000.5), dec!(0.5))
            .await
            .unwrap();
        assert_eq!(new_id, "sl-new");

        let updated = journal.get_trade(&trade.id).await.unwrap().unwrap();
        assert_eq!(updated.sl_order_id.as_deref(), Some("sl-new"));
        assert_eq!(updated.stop_loss, dec!(1000.5));
    }

    #[tokio::test]
    async fn failed_placement_keeps_old_stop() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());
        let trade = seeded_trade(&journal).await;

        let mut broker = MockBrokerClient::new();
        broker
            .expect_place_sell_order()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("rejected")));
        // Cancel must never run when placement fails.
        broker.expect_cancel_order().times(0);

        let lifecycle = OrderLifecycle::new(Arc::new(broker), Arc::clone(&journal));
        assert!(lifecycle
            .move_protective_stop(&trade, dec!(1000.5), dec!(0.5))
            .await
            .is_err());

        let unchanged = journal.get_trade(&trade.id).await.unwrap().unwrap();
        assert_eq!(unchanged.sl_order_id.as_deref(), Some("sl-old"));
        assert_eq!(unchanged.stop_loss, dec!(995));
    }

    #[tokio::test]
    async fn sweep_cancels_only_unmatched_reduce_only_orders() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());

        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_positions()
            .returning(|_| Ok(Vec::<BrokerPosition>::new()));
        broker.expect_get_open_orders().returning(|_| {
            Ok(vec![
                BrokerOrder {
                    order_id: "sl-orphan".into(),
                    order_type: OrderType::StopMarket,
                    amount: dec!(0.1),
                    price: None,
                    trigger_price: Some(dec!(995)),
                    reduce_only: true,
                    label: Some("razor_long_1_sl".into()),
                },
                BrokerOrder {
                    order_id: "entry-resting".into(),
                    order_type: OrderType::Limit,
                    amount: dec!(0.1),
                    price: Some(dec!(990)),
                    trigger_price: None,
                    reduce_only: false,
                    label: None,
                },
            ])
        });
        broker
            .expect_cancel_order()
            .times(1)
            .withf(|id| id == "sl-orphan")
            .returning(|_| Ok(()));

        let lifecycle = OrderLifecycle::new(Arc::new(broker), journal);
        let swept = lifecycle
            .sweep_protective_orders("BTC-PERPETUAL")
            .await
            .unwrap();
        assert_eq!(swept, 1);
    }

    #[tokio::test]
    async fn sweep_skips_when_position_is_live() {
        let journal = Arc::new(TradeJournal::in_memory().await.unwrap());

        let mut broker = MockBrokerClient::new();
        broker.expect_get_positions().returning(|_| {
            Ok(vec![BrokerPosition {
                instrument: "BTC-PERPETUAL".into(),
                size: dec!(0.1),
                average_price: dec!(1000),
            }])
        });
        broker.expect_get_open_orders().times(0);
        broker.expect_cancel_order().times(0);

        let lifecycle = OrderLifecycle::new(Arc::new(broker), journal);
        let swept = lifecycle
            .sweep_protective_orders("BTC-PERPETUAL")
            .await
            .unwrap();
        assert_eq!(swept, 0);
    }
}
