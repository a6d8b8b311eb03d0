#![allow(dead_code)]
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLC bar. `timestamp` is the bar's open time in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn change_percentage(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        ((self.close - self.open) / self.open) * Decimal::from(100)
    }
}

/// Bounded price series; oldest values are evicted once `max_size` is hit.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    values: Vec<Decimal>,
    max_size: usize,
}

impl PriceSeries {
    pub fn new(max_size: usize) -> Self {
        Self {
            values: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, value: Decimal) {
        if self.values.len() >= self.max_size {
            self.values.remove(0);
        }
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<Decimal> {
        self.values.last().copied()
    }

    pub fn as_slice(&self) -> &[Decimal] {
        &self.values
    }

    pub fn last_n(&self, n: usize) -> &[Decimal] {
        let len = self.values.len();
        if n >= len {
            &self.values[..]
        } else {
            &self.values[len - n..]
        }
    }
}
