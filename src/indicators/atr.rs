use rust_decimal::Decimal;

/// Average true range over aligned high/low/close series.
///
/// Returns `None` only when fewer than two bars exist. The true-range series
/// is averaged simply while `len <= period` and Wilder-smoothed beyond that.
pub fn atr(highs: &[Decimal], lows: &[Decimal], closes: &[Decimal], period: usize) -> Option<Decimal> {
    let len = highs.len().min(lows.len()).min(closes.len());
    if len < 2 || period == 0 {
        return None;
    }

    let mut true_ranges = Vec::with_capacity(len - 1);
    for i in 1..len {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }

    if true_ranges.len() <= period {
        let sum: Decimal = true_ranges.iter().sum();
        return Some(sum / Decimal::from(true_ranges.len() as u64));
    }

    let p = Decimal::from(period as u64);
    let mut value: Decimal = true_ranges[..period].iter().sum::<Decimal>() / p;
    for tr in &true_ranges[period..] {
        value = (value * (p - Decimal::ONE) + *tr) / p;
    }
    Some(value)
}
