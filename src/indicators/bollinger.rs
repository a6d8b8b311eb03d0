use rust_decimal::Decimal;
use serde::Serialize;

use super::{sma, stddev};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: Decimal,
    pub middle: Decimal,
    pub lower: Decimal,
}

/// Bollinger bands: SMA ± `std_dev_multiplier` standard deviations over the
/// last `period` values. `None` until `period` values exist.
pub fn bollinger(
    series: &[Decimal],
    period: usize,
    std_dev_multiplier: Decimal,
) -> Option<BollingerBands> {
    let middle = sma(series, period)?;
    let deviation = stddev(series, period)? * std_dev_multiplier;
    Some(BollingerBands {
        upper: middle + deviation,
        middle,
        lower: middle - deviation,
    })
}
