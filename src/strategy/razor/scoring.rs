use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use super::RazorConfig;
use crate::indicators::{
    atr, bollinger, ema, pullback_ready, rsi, trend_score, volatility, BollingerBands,
};
use crate::market::CandleAggregator;
use crate::types::{Direction, Signal};

pub const EMA_1M_FAST: usize = 9;
pub const EMA_1M_SLOW: usize = 21;
const RSI_PERIOD: usize = 14;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_STD_DEV: Decimal = dec!(2);

/// Latest indicator values, recomputed at each closed 1-minute bar.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSnapshot {
    pub ema_fast_1m: Option<Decimal>,
    pub ema_slow_1m: Option<Decimal>,
    pub ema_fast_5m: Option<Decimal>,
    pub ema_slow_5m: Option<Decimal>,
    pub ema_fast_15m: Option<Decimal>,
    pub ema_slow_15m: Option<Decimal>,
    pub rsi14: Decimal,
    pub volatility_pct: Decimal,
    pub atr14: Option<Decimal>,
    pub trend_score: i32,
    pub pullback_ready: Option<bool>,
    pub bollinger: Option<BollingerBands>,
}

/// Computes the full multi-timeframe snapshot from aggregator state.
pub fn compute_snapshot(aggregator: &CandleAggregator, config: &RazorConfig) -> IndicatorSnapshot {
    let closes_1m = aggregator.closes_1m();
    let closes_5m = aggregator.closes_5m();
    let closes_15m = aggregator.closes_15m();

    let ema_fast_1m = ema(closes_1m, EMA_1M_FAST);
    let ema_slow_1m = ema(closes_1m, EMA_1M_SLOW);
    let ema_fast_5m = ema(closes_5m, config.ema5m_fast);
    let ema_slow_5m = ema(closes_5m, config.ema5m_slow);
    let ema_fast_15m = ema(closes_15m, config.ema15m_fast);
    let ema_slow_15m = ema(closes_15m, config.ema15m_slow);

    let trend = if config.use_trend_filter {
        trend_score(&[
            (ema_fast_1m, ema_slow_1m),
            (ema_fast_5m, ema_slow_5m),
            (ema_fast_15m, ema_slow_15m),
        ])
    } else {
        0
    };

    IndicatorSnapshot {
        ema_fast_1m,
        ema_slow_1m,
        ema_fast_5m,
        ema_slow_5m,
        ema_fast_15m,
        ema_slow_15m,
        rsi14: rsi(closes_1m, RSI_PERIOD),
        volatility_pct: volatility(last_n(closes_1m, 30)),
        atr14: atr(
            aggregator.highs_1m(),
            aggregator.lows_1m(),
            closes_1m,
            config.atr_period,
        ),
        trend_score: trend,
        pullback_ready: pullback_ready(
            closes_1m,
            aggregator.highs_1m(),
            aggregator.lows_1m(),
            config.pullback_percent,
        ),
        bollinger: bollinger(closes_1m, BOLLINGER_PERIOD, BOLLINGER_STD_DEV),
    }
}

/// The weighted confluence rubric. Builds long and short scores from the
/// snapshot and picks a direction only when the winner clears
/// `minConfluenceScore`.
pub fn score_signal(
    config: &RazorConfig,
    snapshot: &IndicatorSnapshot,
    aggregator: &CandleAggregator,
    daily_limit_reached: bool,
) -> Signal {
    if daily_limit_reached {
        return Signal::none("daily trade limit reached");
    }

    let vol = snapshot.volatility_pct;
    if vol < config.min_volatility || vol > config.max_volatility {
        return Signal::none(format!(
            "volatility {:.3}% outside [{}, {}]",
            vol, config.min_volatility, config.max_volatility
        ));
    }

    let closes = aggregator.closes_1m();
    let mut long = Decimal::ZERO;
    let mut short = Decimal::ZERO;
    let mut reasons = Vec::new();

    // Volatility sweet spot for one-minute scalps.
    if vol >= dec!(0.08) && vol <= dec!(0.60) {
        long += dec!(8);
        short += dec!(8);
        reasons.push(format!("volatility {:.3}% in sweet spot", vol));
    }

    // RSI excursions, weighted deeper the further they stretch.
    let rsi_cap = dec!(35) + config.rsi_extreme_threshold;
    if snapshot.rsi14 < config.rsi_oversold {
        let bonus = (dec!(35) + (config.rsi_oversold - snapshot.rsi14)).min(rsi_cap);
        long += bonus;
        reasons.push(format!("rsi {:.1} oversold (+{})", snapshot.rsi14, bonus));
    }
    if snapshot.rsi14 > config.rsi_overbought {
        let bonus = (dec!(35) + (snapshot.rsi14 - config.rsi_overbought)).min(rsi_cap);
        short += bonus;
        reasons.push(format!("rsi {:.1} overbought (+{})", snapshot.rsi14, bonus));
    }

    // 1m EMA alignment: confirmation is worth 20, disagreement still 5.
    if let (Some(fast), Some(slow)) = (snapshot.ema_fast_1m, snapshot.ema_slow_1m) {
        if fast > slow {
            long += dec!(20);
            short += dec!(5);
            reasons.push("1m ema trend up".to_string());
        } else if fast < slow {
            short += dec!(20);
            long += dec!(5);
            reasons.push("1m ema trend down".to_string());
        } else {
            long += dec!(5);
            short += dec!(5);
        }
    }

    // Five-bar momentum.
    if closes.len() >= 6 {
        let base = closes[closes.len() - 6];
        if !base.is_zero() {
            let momentum = (closes[closes.len() - 1] - base) / base * dec!(100);
            if momentum > dec!(0.05) {
                long += dec!(15);
                reasons.push(format!("momentum +{:.3}%", momentum));
            } else if momentum < dec!(-0.05) {
                short += dec!(15);
                reasons.push(format!("momentum {:.3}%", momentum));
            }
        }
    }

    // ATR regime check.
    if let (Some(atr_value), Some(last)) = (snapshot.atr14, closes.last()) {
        if !last.is_zero() {
            let atr_pct = atr_value / *last * dec!(100);
            if atr_pct >= dec!(0.03) && atr_pct <= dec!(0.8) {
                long += dec!(6);
                short += dec!(6);
                reasons.push(format!("atr {:.3}% workable", atr_pct));
            }
        }
    }

    // Multi-timeframe trend agreement.
    match snapshot.trend_score {
        3 => {
            long += dec!(10);
            reasons.push("mtf trend strongly up".to_string());
        }
        -3 => {
            short += dec!(10);
            reasons.push("mtf trend strongly down".to_string());
        }
        2 => {
            long += dec!(6);
            reasons.push("mtf trend up".to_string());
        }
        -2 => {
            short += dec!(6);
            reasons.push("mtf trend down".to_string());
        }
        _ => {}
    }

    // Pullback gate: rewarded when present, lightly penalised when price is
    // still extended.
    match snapshot.pullback_ready {
        Some(true) => {
            long += dec!(5);
            short += dec!(5);
            reasons.push("pullback ready".to_string());
        }
        Some(false) => {
            long -= dec!(5);
            short -= dec!(5);
            reasons.push("no pullback yet".to_string());
        }
        None => {}
    }

    // Range compression: the latest bar's range against the recent average.
    if let Some(ratio) = compression_ratio(aggregator) {
        if ratio < dec!(0.6) {
            long += dec!(4);
            short += dec!(4);
            reasons.push("range compressed".to_string());
        }
    }

    long = long.max(Decimal::ZERO);
    short = short.max(Decimal::ZERO);

    // Fresh EMA crossover only matters when nothing else fired yet.
    if long < dec!(20) && short < dec!(20) {
        match crossover_direction(closes) {
            Some(Direction::Long) => {
                long += dec!(25);
                reasons.push("fresh ema crossover up".to_string());
            }
            Some(Direction::Short) => {
                short += dec!(25);
                reasons.push("fresh ema crossover down".to_string());
            }
            _ => {}
        }
    }

    long = long.min(dec!(100));
    short = short.min(dec!(100));

    let (direction, winner, loser) = if long > short {
        (Direction::Long, long, short)
    } else if short > long {
        (Direction::Short, short, long)
    } else {
        (Direction::None, long, short)
    };

    let mut confidence = (winner - loser / dec!(2)).clamp(Decimal::ZERO, dec!(100));

    if direction == Direction::None || winner < config.min_confluence_score {
        return Signal {
            direction: Direction::None,
            strength: winner,
            confidence,
            reasons,
        };
    }

    // Band-edge entries carry extra conviction: a long taken at the lower
    // band (short at the upper) is the cleanest mean-reversion shape.
    if let (Some(bands), Some(last)) = (snapshot.bollinger, closes.last()) {
        match direction {
            Direction::Long if *last <= bands.lower => {
                confidence = (confidence + dec!(10)).min(dec!(100));
                reasons.push("price at lower band".to_string());
            }
            Direction::Short if *last >= bands.upper => {
                confidence = (confidence + dec!(10)).min(dec!(100));
                reasons.push("price at upper band".to_string());
            }
            _ => {}
        }
    }

    Signal {
        direction,
        strength: winner,
        confidence,
        reasons,
    }
}

/// Latest 1m bar range relative to the average of the 12 ranges before it.
fn compression_ratio(aggregator: &CandleAggregator) -> Option<Decimal> {
    let highs = aggregator.highs_1m();
    let lows = aggregator.lows_1m();
    let len = highs.len().min(lows.len());
    if len < 13 {
        return None;
    }

    let last_range = highs[len - 1] - lows[len - 1];
    let mut sum = Decimal::ZERO;
    for i in len - 13..len - 1 {
        sum += highs[i] - lows[i];
    }
    let avg = sum / dec!(12);
    if avg.is_zero() {
        return None;
    }
    Some(last_range / avg)
}

/// A crossover on the just-closed bar: the fast/slow relation flipped and
/// the new gap exceeds 0.02% of the slow EMA.
fn crossover_direction(closes: &[Decimal]) -> Option<Direction> {
    if closes.len() < EMA_1M_SLOW + 2 {
        return None;
    }

    let fast = ema(closes, EMA_1M_FAST)?;
    let slow = ema(closes, EMA_1M_SLOW)?;
    let prev = &closes[..closes.len() - 1];
    let prev_fast = ema(prev, EMA_1M_FAST)?;
    let prev_slow = ema(prev, EMA_1M_SLOW)?;

    if slow.is_zero() {
        return None;
    }
    let gap_pct = (fast - slow).abs() / slow * dec!(100);
    if gap_pct <= dec!(0.02) {
        return None;
    }

    if prev_fast <= prev_slow && fast > slow {
        Some(Direction::Long)
    } else if prev_fast >= prev_slow && fast < slow {
        Some(Direction::Short)
    } else {
        None
    }
}

fn last_n(values: &[Decimal], n: usize) -> &[Decimal] {
    if values.len() <= n {
        values
    } else {
        &values[values.len() - n..]
    }
}
