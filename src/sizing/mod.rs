use rust_decimal::Decimal;
use thiserror::Error;

use crate::broker::{AccountSummary, InstrumentInfo};

/// Exchange-wide ceiling; per-instrument `max_leverage` can only lower it.
pub const HARD_LEVERAGE_CAP: u32 = 50;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingError {
    #[error("insufficient margin: required {required}, available {available}")]
    InsufficientMargin {
        required: Decimal,
        available: Decimal,
    },
    #[error("leverage cap {leverage_cap}x cannot be met at the minimum trade amount")]
    LeverageExceeded { leverage_cap: Decimal },
    #[error("computed amount {computed} is below the minimum trade amount {minimum}")]
    AmountTooSmall { computed: Decimal, minimum: Decimal },
}

/// Rounds to the nearest multiple of `step`, normalised to 8 decimals to
/// keep float-drift out of order payloads.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value.round_dp(8);
    }
    ((value / step).round() * step).round_dp(8)
}

/// Rounds down to a multiple of `step`; used when downsizing to a cap.
pub fn round_down_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value.round_dp(8);
    }
    ((value / step).floor() * step).round_dp(8)
}

/// Rounds a price to the instrument tick.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    round_to_step(price, tick_size)
}

/// Converts a notional USD size into a contract amount.
///
/// The raw amount is rounded to the instrument step; a request that rounds
/// to nothing is rejected rather than silently inflated to the venue
/// minimum. The result is then downsized to the leverage cap (hard ceiling
/// 50x) and checked against available margin.
pub fn size_order(
    notional: Decimal,
    price: Decimal,
    instrument: &InstrumentInfo,
    account: &AccountSummary,
) -> Result<Decimal, SizingError> {
    let step = instrument.min_trade_amount;
    if notional <= Decimal::ZERO || price <= Decimal::ZERO {
        return Err(SizingError::AmountTooSmall {
            computed: Decimal::ZERO,
            minimum: step,
        });
    }

    let raw = notional / price;
    let amount = round_to_step(raw, step);
    if amount < step {
        return Err(SizingError::AmountTooSmall {
            computed: raw,
            minimum: step,
        });
    }

    clamp_to_leverage(amount, price, instrument, account)
}

/// Downsizes `amount` to the leverage cap and verifies margin. Used both by
/// `size_order` and by the entry pipeline after its own step rounding.
pub fn clamp_to_leverage(
    amount: Decimal,
    price: Decimal,
    instrument: &InstrumentInfo,
    account: &AccountSummary,
) -> Result<Decimal, SizingError> {
    let step = instrument.min_trade_amount;
    let leverage_cap = instrument
        .max_leverage
        .min(Decimal::from(HARD_LEVERAGE_CAP))
        .max(Decimal::ONE);

    let max_notional = leverage_cap * account.equity;
    let mut sized = amount;
    if sized * price > max_notional {
        sized = round_down_to_step(max_notional / price, step);
        if sized < step {
            return Err(SizingError::LeverageExceeded { leverage_cap });
        }
    }

    let required_margin = sized * price / leverage_cap;
    if required_margin > account.available_funds {
        return Err(SizingError::InsufficientMargin {
            required: required_margin,
            available: account.available_funds,
        });
    }

    Ok(sized)
}
