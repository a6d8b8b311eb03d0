pub mod deribit;
pub mod ws;

pub use deribit::*;
pub use ws::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Candle, Environment, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::StopMarket => "stop_market",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub instrument: String,
    pub last_price: Decimal,
    pub mark_price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub instrument: String,
    pub tick_size: Decimal,
    pub min_trade_amount: Decimal,
    pub max_leverage: Decimal,
    pub contract_size: Decimal,
}

/// A broker-side position. `size` is signed: positive long, negative short.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub instrument: String,
    pub size: Decimal,
    pub average_price: Decimal,
}

impl BrokerPosition {
    pub fn side(&self) -> Side {
        if self.size >= Decimal::ZERO {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub order_type: OrderType,
    pub amount: Decimal,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub reduce_only: bool,
    pub label: Option<String>,
}

impl BrokerOrder {
    /// The price a protective order would fill around: trigger for stops,
    /// limit price otherwise.
    pub fn effective_price(&self) -> Option<Decimal> {
        self.trigger_price.or(self.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub currency: String,
    pub equity: Decimal,
    pub available_funds: Decimal,
}

/// Parameters for one order placement; direction comes from which trait
/// method is called.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub instrument: String,
    pub amount: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub label: String,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(instrument: &str, amount: Decimal, label: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            amount,
            order_type: OrderType::Market,
            price: None,
            trigger_price: None,
            label: label.to_string(),
            reduce_only: false,
        }
    }

    pub fn limit(instrument: &str, amount: Decimal, price: Decimal, label: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            amount,
            order_type: OrderType::Limit,
            price: Some(price),
            trigger_price: None,
            label: label.to_string(),
            reduce_only: false,
        }
    }

    pub fn stop_market(instrument: &str, amount: Decimal, trigger: Decimal, label: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            amount,
            order_type: OrderType::StopMarket,
            price: None,
            trigger_price: Some(trigger),
            label: label.to_string(),
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// The broker surface the execution core consumes. Implemented by
/// `DeribitClient`; mocked in executor tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn is_connected(&self) -> bool;

    async fn get_ticker(&self, instrument: &str) -> anyhow::Result<Ticker>;

    /// Historical candles at `resolution_minutes`, oldest first.
    async fn get_candles(
        &self,
        instrument: &str,
        resolution_minutes: u32,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    async fn get_instrument(&self, instrument: &str) -> anyhow::Result<InstrumentInfo>;

    async fn get_positions(&self, currency: &str) -> anyhow::Result<Vec<BrokerPosition>>;

    async fn get_open_orders(&self, instrument: &str) -> anyhow::Result<Vec<BrokerOrder>>;

    async fn place_buy_order(&self, request: &OrderRequest) -> anyhow::Result<OrderResult>;

    async fn place_sell_order(&self, request: &OrderRequest) -> anyhow::Result<OrderResult>;

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<()>;

    async fn get_account_summary(&self, currency: &str) -> anyhow::Result<AccountSummary>;
}

/// One user's connected broker: REST client plus its ticker feed.
#[derive(Clone)]
pub struct BrokerConnection {
    pub client: std::sync::Arc<dyn BrokerClient>,
    pub ticker: std::sync::Arc<dyn TickerSource>,
}

/// Connected brokers by (user, environment). Built at boot from configured
/// credentials; the supervisor consults it for start-time validation and
/// auto-resume decisions.
#[derive(Default)]
pub struct BrokerRegistry {
    connections: tokio::sync::RwLock<std::collections::HashMap<(String, Environment), BrokerConnection>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        user_id: &str,
        environment: Environment,
        connection: BrokerConnection,
    ) {
        self.connections
            .write()
            .await
            .insert((user_id.to_string(), environment), connection);
    }

    pub async fn get(&self, user_id: &str, environment: Environment) -> Option<BrokerConnection> {
        self.connections
            .read()
            .await
            .get(&(user_id.to_string(), environment))
            .cloned()
    }
}

/// Settlement currency of an instrument name like `BTC_USDC-PERPETUAL` or
/// `BTC-PERPETUAL` (inverse contracts settle in the base currency).
pub fn settlement_currency(instrument: &str) -> &str {
    let base = instrument.split('-').next().unwrap_or(instrument);
    match base.split('_').nth(1) {
        Some(quote) => quote,
        None => base.split('_').next().unwrap_or(base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn position_side_follows_sign() {
        let long = BrokerPosition {
            instrument: "BTC-PERPETUAL".into(),
            size: dec!(0.5),
            average_price: dec!(50000),
        };
        assert_eq!(long.side(), Side::Buy);
        assert!(long.is_open());

        let short = BrokerPosition {
            size: dec!(-0.5),
            ..long.clone()
        };
        assert_eq!(short.side(), Side::Sell);

        let flat = BrokerPosition {
            size: Decimal::ZERO,
            ..long
        };
        assert!(!flat.is_open());
    }

    #[test]
    fn effective_price_prefers_trigger() {
        let order = BrokerOrder {
            order_id: "1".into(),
            order_type: OrderType::StopMarket,
            amount: dec!(1),
            price: None,
            trigger_price: Some(dec!(995)),
            reduce_only: true,
            label: None,
        };
        assert_eq!(order.effective_price(), Some(dec!(995)));
    }

    #[test]
    fn settlement_currency_from_instrument_name() {
        assert_eq!(settlement_currency("BTC-PERPETUAL"), "BTC");
        assert_eq!(settlement_currency("BTC_USDC-PERPETUAL"), "USDC");
        assert_eq!(settlement_currency("ETH_USDC-PERPETUAL"), "USDC");
    }
}
