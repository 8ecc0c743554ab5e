//! Core types for storefront sync.
//!
//! This module provides type-safe wrappers for the cart, favorites and
//! price-event domain.

pub mod event;
pub mod id;
pub mod item;
pub mod price;
pub mod quantity;

pub use event::{EventDecodeError, PriceEventKind, PriceUpdateEvent, UserNotification};
pub use id::*;
pub use item::{CartItem, FavoriteItem, Product};
pub use price::Price;
pub use quantity::{MAX_QUANTITY, MIN_QUANTITY, Quantity};
