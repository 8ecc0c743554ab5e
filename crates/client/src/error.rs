//! Unified error handling.
//!
//! Each layer owns a `thiserror` enum ([`ApiError`], [`PersistenceError`]);
//! `SyncError` unifies them for callers that cross layers, such as
//! [`crate::session::SessionContext`]. Push transport failures never leave
//! the bus: it logs them and reconnects.
//!
//! Routine cart and favorites mutations never return these errors: they
//! recover locally and log. Only start-up, reload and explicit
//! authentication checks surface a `SyncError`.

use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::remote::ApiError;

/// Application-level error type for the sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote cart/favorites API failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Durable local storage failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The action requires an authenticated user.
    #[error("Login required")]
    LoginRequired,
}

/// Result type alias for `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;
