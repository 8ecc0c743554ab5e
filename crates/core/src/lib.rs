//! Storefront Sync Core - Shared types library.
//!
//! This crate provides the types shared by every storefront sync component:
//! - `client` - Session stores, guest merge, price event bus and view sync
//! - `cli` - Command-line tools for operating a client session
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no network,
//! no persistence. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, quantities, cart/favorite items and price events

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
