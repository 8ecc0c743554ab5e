//! Remote cart, favorites and catalog services.
//!
//! # Architecture
//!
//! - The stores depend only on the traits in this module
//! - [`RestClient`] implements all of them over JSON/HTTP with `reqwest`
//! - Every cart mutation returns the authoritative cart, which the store
//!   adopts as its new state
//!
//! # Example
//!
//! ```rust,ignore
//! use storefront_sync_client::remote::{CartService, RestClient};
//!
//! let client = RestClient::new(&config)?;
//! let cart = client.fetch_cart().await?;
//! ```

mod client;

pub use client::RestClient;

use async_trait::async_trait;
use thiserror::Error;

use storefront_sync_core::{CartItem, FavoriteItem, Product, ProductId, Quantity};

/// Errors that can occur when calling the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Non-success status code.
    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Rate limited by the API.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// The session token is missing or rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// The remote cart of the authenticated user.
#[async_trait]
pub trait CartService: Send + Sync {
    /// Fetch the current cart.
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, ApiError>;

    /// Add `quantity` units of a product (summed with any existing line).
    async fn add_item(&self, product: &Product, quantity: Quantity)
    -> Result<Vec<CartItem>, ApiError>;

    /// Set the quantity of an existing line.
    async fn set_quantity(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<Vec<CartItem>, ApiError>;

    /// Remove a line.
    async fn remove_item(&self, product_id: ProductId) -> Result<Vec<CartItem>, ApiError>;

    /// Remove every line.
    async fn clear(&self) -> Result<(), ApiError>;
}

/// The remote wishlist of the authenticated user.
#[async_trait]
pub trait FavoritesService: Send + Sync {
    /// Fetch the current favorites.
    async fn fetch_favorites(&self) -> Result<Vec<FavoriteItem>, ApiError>;

    /// Add a product to favorites.
    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError>;

    /// Remove a product from favorites.
    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError>;
}

/// Product lookups used by views that refresh after a reconnect.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Fetch the current display data of the given products.
    ///
    /// Unknown ids are omitted from the result.
    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, ApiError>;
}
