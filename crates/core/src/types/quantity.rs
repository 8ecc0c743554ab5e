//! Cart line quantity, always within `[MIN_QUANTITY, MAX_QUANTITY]`.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Smallest quantity a cart line may hold.
pub const MIN_QUANTITY: u32 = 1;

/// Largest quantity a cart line may hold.
pub const MAX_QUANTITY: u32 = 50;

/// A clamped cart line quantity.
///
/// The invariant `MIN_QUANTITY <= q <= MAX_QUANTITY` holds for every value of
/// this type, including values decoded from JSON (out-of-range input is
/// clamped rather than rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    /// The minimum quantity.
    pub const ONE: Self = Self(MIN_QUANTITY);

    /// The maximum quantity.
    pub const MAX: Self = Self(MAX_QUANTITY);

    /// Clamp any requested amount into the valid range.
    #[must_use]
    pub fn clamp(requested: i64) -> Self {
        let bounded = requested.clamp(i64::from(MIN_QUANTITY), i64::from(MAX_QUANTITY));
        // bounded is within 1..=50
        Self(u32::try_from(bounded).unwrap_or(MIN_QUANTITY))
    }

    /// Interpret a requested quantity where anything below one means "remove".
    ///
    /// Returns `None` for `requested < 1`, otherwise the clamped quantity.
    #[must_use]
    pub fn for_set(requested: i64) -> Option<Self> {
        (requested >= i64::from(MIN_QUANTITY)).then(|| Self::clamp(requested))
    }

    /// Sum two quantities, re-clamping the result to the maximum.
    #[must_use]
    pub fn saturating_add(self, other: Self) -> Self {
        Self::clamp(i64::from(self.0) + i64::from(other.0))
    }

    /// Get the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(Self::clamp(raw))
    }
}
