use rust_decimal::Decimal;

use crate::types::{Candle, PriceSeries};

const MINUTE_MS: i64 = 60_000;
const FIVE_MIN_MS: i64 = 300_000;
const FIFTEEN_MIN_MS: i64 = 900_000;

/// 1m buffers hold enough history for every indicator period in use.
const ONE_MIN_CAP: usize = 200;
const HIGHER_TF_CAP: usize = 100;

/// The 1-minute bar currently under construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveBar {
    pub start_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl LiveBar {
    fn new(start_ms: i64, price: Decimal) -> Self {
        Self {
            start_ms,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// Builds 1-minute bars from the raw tick stream and rolls closed bars up
/// into boundary-aligned 5m and 15m close series.
///
/// All buffers are bounded; replaying an identical tick stream reproduces
/// identical series.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    bar: Option<LiveBar>,
    closes_1m: PriceSeries,
    highs_1m: PriceSeries,
    lows_1m: PriceSeries,
    closes_5m: PriceSeries,
    closes_15m: PriceSeries,
    last_5m_boundary: i64,
    last_15m_boundary: i64,
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self {
            bar: None,
            closes_1m: PriceSeries::new(ONE_MIN_CAP),
            highs_1m: PriceSeries::new(ONE_MIN_CAP),
            lows_1m: PriceSeries::new(ONE_MIN_CAP),
            closes_5m: PriceSeries::new(HIGHER_TF_CAP),
            closes_15m: PriceSeries::new(HIGHER_TF_CAP),
            last_5m_boundary: 0,
            last_15m_boundary: 0,
        }
    }

    /// Seeds the 1m buffers from historical candles, oldest first. Does not
    /// open a live bar; the first tick after seeding does that.
    pub fn seed_history(&mut self, candles: &[Candle]) {
        for candle in candles {
            self.closes_1m.push(candle.close);
            self.highs_1m.push(candle.high);
            self.lows_1m.push(candle.low);
        }
        if let Some(last) = candles.last() {
            self.last_5m_boundary = floor_to(last.timestamp, FIVE_MIN_MS);
            self.last_15m_boundary = floor_to(last.timestamp, FIFTEEN_MIN_MS);
        }
    }

    /// Advances the aggregator with one tick. Returns `true` when a 1-minute
    /// bar closed on this tick.
    pub fn ingest(&mut self, price: Decimal, now_ms: i64) -> bool {
        let minute_start = floor_to(now_ms, MINUTE_MS);

        let bar = match self.bar {
            None => {
                self.bar = Some(LiveBar::new(minute_start, price));
                return false;
            }
            Some(ref mut bar) => bar,
        };

        if now_ms - bar.start_ms < MINUTE_MS {
            bar.high = bar.high.max(price);
            bar.low = bar.low.min(price);
            bar.close = price;
            return false;
        }

        let closed = *bar;
        self.closes_1m.push(closed.close);
        self.highs_1m.push(closed.high);
        self.lows_1m.push(closed.low);
        self.roll_up(now_ms);
        self.bar = Some(LiveBar::new(minute_start, price));
        true
    }

    /// Appends the latest 1m close as a higher-timeframe close whenever the
    /// clock has moved into a new boundary bucket and enough 1m history
    /// exists to make the value meaningful.
    fn roll_up(&mut self, now_ms: i64) {
        let last_close = match self.closes_1m.last() {
            Some(close) => close,
            None => return,
        };

        let boundary_5m = floor_to(now_ms, FIVE_MIN_MS);
        if boundary_5m > self.last_5m_boundary && self.closes_1m.len() >= 5 {
            self.closes_5m.push(last_close);
            self.last_5m_boundary = boundary_5m;
        }

        let boundary_15m = floor_to(now_ms, FIFTEEN_MIN_MS);
        if boundary_15m > self.last_15m_boundary && self.closes_1m.len() >= 15 {
            self.closes_15m.push(last_close);
            self.last_15m_boundary = boundary_15m;
        }
    }

    pub fn current_bar(&self) -> Option<LiveBar> {
        self.bar
    }

    pub fn closes_1m(&self) -> &[Decimal] {
        self.closes_1m.as_slice()
    }

    pub fn highs_1m(&self) -> &[Decimal] {
        self.highs_1m.as_slice()
    }

    pub fn lows_1m(&self) -> &[Decimal] {
        self.lows_1m.as_slice()
    }

    pub fn closes_5m(&self) -> &[Decimal] {
        self.closes_5m.as_slice()
    }

    pub fn closes_15m(&self) -> &[Decimal] {
        self.closes_15m.as_slice()
    }

    pub fn bars_collected(&self) -> usize {
        self.closes_1m.len()
    }
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn floor_to(timestamp_ms: i64, period_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(period_ms)
}
