use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Razor strategy parameters. Serialised camelCase so UI payloads and the
/// persisted config blob share one shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RazorConfig {
    /// Notional USD committed per entry; divided by price to size contracts.
    pub trade_size: Decimal,
    pub stop_loss_percent: Decimal,
    pub take_profit_percent: Decimal,
    /// Recognised for forward compatibility; the executor enforces 1.
    pub max_concurrent_trades: u32,
    pub max_daily_trades: u32,
    pub cooldown_minutes: i64,

    pub break_even_enabled: bool,
    /// Fraction of the entry-to-TP distance that arms the break-even move.
    #[serde(rename = "breakEvenTriggerToTP")]
    pub break_even_trigger_to_tp: Decimal,
    pub break_even_offset_ticks: u32,

    pub trailing_stop_enabled: bool,
    pub trailing_stop_activation_percent: Decimal,
    /// Percent distance the trailed stop keeps behind price.
    pub trailing_stop_distance: Decimal,

    pub use_trend_filter: bool,
    pub ema5m_fast: usize,
    pub ema5m_slow: usize,
    pub ema15m_fast: usize,
    pub ema15m_slow: usize,

    pub min_volatility: Decimal,
    pub max_volatility: Decimal,
    pub rsi_oversold: Decimal,
    pub rsi_overbought: Decimal,
    /// Extra confluence points a deep RSI excursion can add on top of the
    /// base oversold/overbought weight.
    pub rsi_extreme_threshold: Decimal,

    pub adaptive_risk_enabled: bool,
    pub atr_period: usize,
    /// Fraction of the impulse that must retrace before an entry is
    /// considered pulled back.
    pub pullback_percent: Decimal,

    pub min_confluence_score: Decimal,
}

impl Default for RazorConfig {
    fn default() -> Self {
        Self {
            trade_size: dec!(100),
            stop_loss_percent: dec!(0.5),
            take_profit_percent: dec!(0.65),
            max_concurrent_trades: 1,
            max_daily_trades: 20,
            cooldown_minutes: 3,
            break_even_enabled: true,
            break_even_trigger_to_tp: dec!(0.5),
            break_even_offset_ticks: 1,
            trailing_stop_enabled: false,
            trailing_stop_activation_percent: dec!(0.4),
            trailing_stop_distance: dec!(0.25),
            use_trend_filter: true,
            ema5m_fast: 9,
            ema5m_slow: 21,
            ema15m_fast: 9,
            ema15m_slow: 21,
            min_volatility: dec!(0.02),
            max_volatility: dec!(3),
            rsi_oversold: dec!(35),
            rsi_overbought: dec!(65),
            rsi_extreme_threshold: dec!(13),
            adaptive_risk_enabled: true,
            atr_period: 14,
            pullback_percent: dec!(0.3),
            min_confluence_score: dec!(58),
        }
    }
}

impl RazorConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.trade_size <= Decimal::ZERO {
            errors.push("tradeSize must be > 0".to_string());
        }
        if self.stop_loss_percent <= Decimal::ZERO {
            errors.push("stopLossPercent must be > 0".to_string());
        }
        if self.take_profit_percent <= Decimal::ZERO {
            errors.push("takeProfitPercent must be > 0".to_string());
        }
        if self.break_even_trigger_to_tp <= Decimal::ZERO
            || self.break_even_trigger_to_tp >= Decimal::ONE
        {
            errors.push("breakEvenTriggerToTP must be in (0, 1)".to_string());
        }
        if self.min_volatility >= self.max_volatility {
            errors.push("minVolatility must be < maxVolatility".to_string());
        }
        if self.rsi_oversold >= self.rsi_overbought {
            errors.push("rsiOversold must be < rsiOverbought".to_string());
        }
        if self.ema5m_fast >= self.ema5m_slow {
            errors.push("ema5mFast must be < ema5mSlow".to_string());
        }
        if self.ema15m_fast >= self.ema15m_slow {
            errors.push("ema15mFast must be < ema15mSlow".to_string());
        }
        if self.cooldown_minutes < 0 {
            errors.push("cooldownMinutes must be >= 0".to_string());
        }
        if self.pullback_percent < Decimal::ZERO || self.pullback_percent > Decimal::ONE {
            errors.push("pullbackPercent must be in [0, 1]".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_minutes * 60_000
    }
}
