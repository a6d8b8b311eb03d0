use rust_decimal::Decimal;

/// Relative strength index, Wilder's formulation.
///
/// Short series degrade instead of failing: fewer than 3 points returns the
/// neutral 50, and below `period + 1` points the averages run over the
/// `max(2, len − 1)` changes that exist. Zero average loss returns 100.
pub fn rsi(series: &[Decimal], period: usize) -> Decimal {
    let fifty = Decimal::from(50);
    if series.len() < 3 || period == 0 {
        return fifty;
    }

    let changes: Vec<Decimal> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: &Decimal| {
        if *c > Decimal::ZERO {
            *c
        } else {
            Decimal::ZERO
        }
    };
    let loss = |c: &Decimal| {
        if *c < Decimal::ZERO {
            c.abs()
        } else {
            Decimal::ZERO
        }
    };

    let (avg_gain, avg_loss) = if changes.len() <= period {
        let n = Decimal::from(changes.len() as u64);
        let gains: Decimal = changes.iter().map(gain).sum();
        let losses: Decimal = changes.iter().map(loss).sum();
        (gains / n, losses / n)
    } else {
        // Seed with the simple average of the first `period` changes, then
        // Wilder-smooth across the rest.
        let p = Decimal::from(period as u64);
        let mut avg_gain: Decimal = changes[..period].iter().map(gain).sum::<Decimal>() / p;
        let mut avg_loss: Decimal = changes[..period].iter().map(loss).sum::<Decimal>() / p;
        for change in &changes[period..] {
            avg_gain = (avg_gain * (p - Decimal::ONE) + gain(change)) / p;
            avg_loss = (avg_loss * (p - Decimal::ONE) + loss(change)) / p;
        }
        (avg_gain, avg_loss)
    };

    if avg_loss.is_zero() {
        return Decimal::from(100);
    }

    let rs = avg_gain / avg_loss;
    Decimal::from(100) - (Decimal::from(100) / (Decimal::ONE + rs))
}
