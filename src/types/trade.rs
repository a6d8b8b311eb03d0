use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Environment;

/// Entry order id recorded for positions adopted from the broker rather than
/// opened by an executor.
pub const AUTO_RESUME_ORDER_ID: &str = "auto_resume";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" | "long" => Some(Side::Buy),
            "sell" | "short" => Some(Side::Sell),
            _ => None,
        }
    }

}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TradeStatus::Open),
            "closed" => Some(TradeStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    SlHit,
    TpHit,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SlHit => "sl_hit",
            ExitReason::TpHit => "tp_hit",
            ExitReason::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sl_hit" => Some(ExitReason::SlHit),
            "tp_hit" => Some(ExitReason::TpHit),
            "manual" => Some(ExitReason::Manual),
            _ => None,
        }
    }
}

/// Journal row for one trade. Open rows have all exit fields unset; closed
/// rows have them all set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub strategy_name: String,
    pub instrument: String,
    pub broker: String,
    pub environment: Environment,
    pub side: Side,
    pub entry_order_id: String,
    pub sl_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub entry_price: Decimal,
    pub amount: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: TradeStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub pnl: Option<Decimal>,
    pub pnl_percentage: Option<Decimal>,
}

impl TradeRecord {
    pub fn is_adopted(&self) -> bool {
        self.entry_order_id == AUTO_RESUME_ORDER_ID
    }
}

/// Input for `TradeJournal::record_trade`; the journal assigns id, status and
/// opened_at.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub user_id: String,
    pub strategy_name: String,
    pub instrument: String,
    pub broker: String,
    pub environment: Environment,
    pub side: Side,
    pub entry_order_id: String,
    pub sl_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub entry_price: Decimal,
    pub amount: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Realised P&L for a linear perpetual: price change applied to the contract
/// amount, sign flipped for shorts. Returns `(pnl, pnl_percentage)`.
pub fn realized_pnl(
    side: Side,
    entry_price: Decimal,
    exit_price: Decimal,
    amount: Decimal,
) -> (Decimal, Decimal) {
    if entry_price.is_zero() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    let price_change_pct = (exit_price - entry_price) / entry_price;
    let signed_pct = match side {
        Side::Buy => price_change_pct,
        Side::Sell => -price_change_pct,
    };
    let pnl = signed_pct * entry_price * amount;
    (pnl, signed_pct * Decimal::from(100))
}
