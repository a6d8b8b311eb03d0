use rust_decimal::Decimal;

const PULLBACK_WINDOW: usize = 10;

/// Detects whether price has retraced enough of its recent impulse to offer
/// a mean-reversion entry.
///
/// Looks at the last 10 closes: the move from the window's first to last
/// close must be at least 0.1% of the start to count as an impulse. For an
/// up impulse the retrace is measured from the window's highest high back to
/// the last close; for a down impulse from the lowest low up to it. `None`
/// means no impulse (or not enough history); the caller treats that as
/// unknown rather than a veto.
pub fn pullback_ready(
    closes: &[Decimal],
    highs: &[Decimal],
    lows: &[Decimal],
    pullback_pct: Decimal,
) -> Option<bool> {
    if closes.len() < PULLBACK_WINDOW || highs.len() < PULLBACK_WINDOW || lows.len() < PULLBACK_WINDOW
    {
        return None;
    }

    let closes = &closes[closes.len() - PULLBACK_WINDOW..];
    let highs = &highs[highs.len() - PULLBACK_WINDOW..];
    let lows = &lows[lows.len() - PULLBACK_WINDOW..];

    let start = closes[0];
    let last = closes[PULLBACK_WINDOW - 1];
    if start.is_zero() {
        return None;
    }

    let impulse = last - start;
    let min_impulse = start.abs() * Decimal::new(1, 3); // 0.1% of start
    if impulse.abs() < min_impulse {
        return None;
    }

    let required = impulse.abs() * pullback_pct;
    if impulse > Decimal::ZERO {
        let peak = highs.iter().max().copied()?;
        Some(peak - last >= required)
    } else {
        let trough = lows.iter().min().copied()?;
        Some(last - trough >= required)
    }
}
