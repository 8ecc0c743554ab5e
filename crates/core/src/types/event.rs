//! Server-pushed events.
//!
//! Price events arrive on the broadcast price channel, user notifications on
//! the per-user private channel. Both are JSON bodies.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::ProductId;
use super::price::Price;

/// Why a price event was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceEventKind {
    /// The price actually changed.
    #[default]
    Changed,
    /// A replay sent on (re)connect so the client catches up.
    Sync,
}

/// A price change for a single product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdateEvent {
    pub product_id: ProductId,
    pub new_price: Price,
    #[serde(default)]
    pub new_original_price: Option<Price>,
    #[serde(default)]
    pub kind: PriceEventKind,
}

impl PriceUpdateEvent {
    /// A genuine price change.
    #[must_use]
    pub const fn changed(product_id: ProductId, new_price: Price) -> Self {
        Self {
            product_id,
            new_price,
            new_original_price: None,
            kind: PriceEventKind::Changed,
        }
    }

    /// A reconnect replay.
    #[must_use]
    pub const fn sync(product_id: ProductId, new_price: Price) -> Self {
        Self {
            product_id,
            new_price,
            new_original_price: None,
            kind: PriceEventKind::Sync,
        }
    }

    /// Set the new original (pre-discount) price.
    #[must_use]
    pub const fn with_original(mut self, original: Price) -> Self {
        self.new_original_price = Some(original);
        self
    }

    /// Whether this is a reconnect replay rather than a real change.
    #[must_use]
    pub fn is_replay(&self) -> bool {
        self.kind == PriceEventKind::Sync
    }

    /// Decode a price event from a frame body.
    ///
    /// # Errors
    ///
    /// Returns `EventDecodeError` if the body is not a valid price event or
    /// carries a negative price.
    pub fn decode(body: &str) -> Result<Self, EventDecodeError> {
        let event: Self = serde_json::from_str(body)?;
        if event.new_price.amount().is_sign_negative() {
            return Err(EventDecodeError::NegativePrice(event.product_id));
        }
        Ok(event)
    }
}

/// A notification on the authenticated user's private channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotification {
    pub kind: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub order_id: Option<i64>,
}

impl UserNotification {
    /// Decode a notification from a frame body.
    ///
    /// # Errors
    ///
    /// Returns `EventDecodeError` if the body is not valid JSON of the
    /// expected shape.
    pub fn decode(body: &str) -> Result<Self, EventDecodeError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Errors decoding an incoming event.
#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("negative price for product {0}")]
    NegativePrice(ProductId),
}
