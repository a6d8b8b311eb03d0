use rust_decimal::Decimal;

/// Exponential moving average of `series`.
///
/// With fewer than `period` points the arithmetic mean of what is available
/// is returned instead, so callers always get a value once the series is
/// non-empty. Otherwise the EMA is seeded with the SMA of the first `period`
/// points and iterated over the remainder.
pub fn ema(series: &[Decimal], period: usize) -> Option<Decimal> {
    if series.is_empty() || period == 0 {
        return None;
    }

    if series.len() < period {
        let sum: Decimal = series.iter().sum();
        return Some(sum / Decimal::from(series.len() as u64));
    }

    let seed: Decimal = series[..period].iter().sum::<Decimal>() / Decimal::from(period as u64);
    let multiplier = Decimal::from(2) / Decimal::from(period as u64 + 1);

    let mut value = seed;
    for price in &series[period..] {
        value = (*price - value) * multiplier + value;
    }
    Some(value)
}
