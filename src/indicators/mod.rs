pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod pullback;
pub mod rsi;
pub mod volatility;

pub use atr::*;
pub use bollinger::*;
pub use ema::*;
pub use pullback::*;
pub use rsi::*;
pub use volatility::*;

use rust_decimal::Decimal;

/// Simple moving average over the last `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.is_empty() || period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u64))
}

/// Population standard deviation over the last `period` values.
pub fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period || period == 0 {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u64);
    Some(sqrt_decimal(variance))
}

/// Newton-iteration square root; Decimal has no built-in sqrt.
pub(crate) fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = value;
    }
    let epsilon = Decimal::new(1, 10);

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}

/// Sum of the signs of (fast − slow) EMA gaps across timeframes.
///
/// Each pair contributes +1, −1 or 0; with the 1m/5m/15m pairs the result is
/// in [-3, +3]. Pairs with missing values contribute 0.
pub fn trend_score(pairs: &[(Option<Decimal>, Option<Decimal>)]) -> i32 {
    pairs
        .iter()
        .map(|(fast, slow)| match (fast, slow) {
            (Some(f), Some(s)) if f > s => 1,
            (Some(f), Some(s)) if f < s => -1,
            _ => 0,
        })
        .sum()
}
