//! Storefront Sync client library.
//!
//! Keeps a shopping session consistent on the client side:
//!
//! - [`cart`] - Session cart store (guest or write-through to the remote cart)
//! - [`merge`] - One-shot guest-to-authenticated cart merge
//! - [`favorites`] - Authenticated wishlist with optimistic toggles
//! - [`bus`] - Live price event subscription with reconnect and heartbeats
//! - [`view`] - Per-view price synchronizers
//! - [`session`] - Top-level owner wiring the above together
//!
//! Remote collaborators are reached through the traits in [`remote`] and
//! [`bus::transport`]; durable local state through [`persistence`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod bus;
pub mod cart;
pub mod config;
pub mod error;
pub mod favorites;
pub mod merge;
pub mod persistence;
pub mod remote;
pub mod session;
pub mod telemetry;
pub mod view;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{Result, SyncError};
