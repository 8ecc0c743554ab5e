//! Command implementations.

pub mod cart;
pub mod favorites;
pub mod watch;

use std::sync::Arc;

use thiserror::Error;

use storefront_sync_client::SyncError;
use storefront_sync_client::remote::{ApiError, CatalogService};
use storefront_sync_client::session::SessionContext;
use storefront_sync_client::view::{Notifier, TracingNotifier};
use storefront_sync_core::{Product, ProductId};

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Session or store failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Catalog lookup failed.
    #[error("Catalog error: {0}")]
    Api(#[from] ApiError),

    /// The catalog does not know the product.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// Waiting for Ctrl-C failed.
    #[error("Signal error: {0}")]
    Signal(#[from] std::io::Error),
}

/// Look up a product's display data.
async fn lookup_product(session: &SessionContext, product_id: ProductId) -> Result<Product, CliError> {
    session
        .catalog()
        .fetch_products(&[product_id])
        .await?
        .into_iter()
        .find(|p| p.product_id == product_id)
        .ok_or(CliError::ProductNotFound(product_id))
}

/// Notifier that logs notices, shared by every mounted view.
fn notifier() -> Arc<dyn Notifier> {
    Arc::new(TracingNotifier)
}
