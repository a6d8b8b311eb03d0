use rust_decimal::Decimal;

use super::{sqrt_decimal, sma};

/// Realised volatility of `series` as a percentage of its mean.
///
/// Takes the larger of the standard-deviation measure and the high-low range
/// measure so that both choppy and trending windows register, and floors the
/// result at 0.01% so a flat series still reports a usable number rather
/// than zero.
pub fn volatility(series: &[Decimal]) -> Decimal {
    let floor = Decimal::new(1, 2); // 0.01%
    if series.len() < 2 {
        return floor;
    }

    let mean = match sma(series, series.len()) {
        Some(m) if !m.is_zero() => m,
        _ => return floor,
    };

    let variance: Decimal = series
        .iter()
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(series.len() as u64);
    let stdev_pct = sqrt_decimal(variance) / mean * Decimal::from(100);

    let high = series.iter().max().copied().unwrap_or(mean);
    let low = series.iter().min().copied().unwrap_or(mean);
    let range_pct = (high - low) / mean * Decimal::from(100);

    stdev_pct.max(range_pct).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn flat_series_hits_floor() {
        let series = [dec!(100); 20];
        assert_eq!(volatility(&series), dec!(0.01));
    }

    #[test]
    fn short_series_hits_floor() {
        assert_eq!(volatility(&[dec!(100)]), dec!(0.01));
        assert_eq!(volatility(&[]), dec!(0.01));
    }

    #[test]
    fn range_component_dominates_single_spike() {
        let mut series = vec![dec!(100); 19];
        series.push(dec!(102));
        let vol = volatility(&series);
        // Range is 2% of ~100 mean; stdev of one outlier is far smaller.
        assert!(vol > dec!(1.9));
        assert!(vol < dec!(2.1));
    }

    #[test]
    fn wider_swings_mean_higher_volatility() {
        let narrow: Vec<Decimal> = (0..20)
            .map(|i| if i % 2 == 0 { dec!(100) } else { dec!(100.2) })
            .collect();
        let wide: Vec<Decimal> = (0..20)
            .map(|i| if i % 2 == 0 { dec!(100) } else { dec!(103) })
            .collect();
        assert!(volatility(&wide) > volatility(&narrow));
    }
}
