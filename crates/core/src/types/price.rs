//! Type-safe price representation using decimal arithmetic.
//!
//! Prices are never stored as floating point. On the wire a price may arrive
//! either as a JSON string (`"19.99"`) or a JSON number (`19.99`); both decode
//! to the same exact decimal. Prices always serialize as strings.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::quantity::Quantity;

/// A unit or line price in the store currency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    /// A zero price.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Get the decimal amount.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Price multiplied by a quantity (a cart line total).
    #[must_use]
    pub fn times(self, quantity: Quantity) -> Self {
        Self(self.0 * Decimal::from(quantity.get()))
    }
}

impl From<Decimal> for Price {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<i64> for Price {
    fn from(amount: i64) -> Self {
        Self(Decimal::from(amount))
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sum for Price {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_accepts_string_and_number() {
        let from_str: Price = serde_json::from_str("\"19.99\"").unwrap();
        let from_num: Price = serde_json::from_str("19.99").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(from_str.amount(), Decimal::new(1999, 2));
    }

    #[test]
    fn test_price_times_quantity() {
        let price = Price::from(450);
        assert_eq!(price.times(Quantity::clamp(3)), Price::from(1350));
    }

    #[test]
    fn test_price_sum_and_display() {
        let total: Price = [Price::new(Decimal::new(1050, 2)), Price::from(2)]
            .into_iter()
            .sum();
        assert_eq!(total.to_string(), "$12.50");
    }
}
