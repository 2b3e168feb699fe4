//! Cost calculation from token counts and unit prices.
//!
//! Pure and deterministic: the same (token counts, price entry) always
//! yields the same cost. Rounding is half-up to [`COST_DECIMAL_PLACES`]
//! decimal places, applied once to the final sum, not per-term.

use crate::config::{Currency, PriceEntry};

/// Decimal places kept on a computed cost.
pub const COST_DECIMAL_PLACES: u32 = 6;

/// A computed monetary cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cost {
    pub amount: f64,
    pub currency: Currency,
}

impl std::fmt::Display for Cost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6} {}", self.amount, self.currency)
    }
}

/// Maps token counts to monetary cost using a per-model price entry.
///
/// Stateless; exists as a type so callers can hold it at the seam where a
/// different pricing strategy could be swapped in.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostCalculator;

impl CostCalculator {
    /// Compute the cost of a completed call.
    ///
    /// `cost = input_tokens/1000 * input_price + output_tokens/1000 * output_price`,
    /// rounded half-up to six decimal places at the end. The currency is the
    /// price entry's currency.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(input_tokens: u64, output_tokens: u64, price: &PriceEntry) -> Cost {
        let amount = (input_tokens as f64 / 1000.0) * price.input_price_per_1k
            + (output_tokens as f64 / 1000.0) * price.output_price_per_1k;

        Cost {
            amount: round_half_up(amount, COST_DECIMAL_PLACES),
            currency: price.currency,
        }
    }
}

/// Round half-up to `places` decimal places.
#[must_use]
fn round_half_up(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places.try_into().unwrap_or(i32::MAX));
    (value * factor + 0.5).floor() / factor
}
