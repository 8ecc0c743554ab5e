//! Favorites commands.

use tracing::{info, warn};

use storefront_sync_client::SyncError;
use storefront_sync_client::favorites::ToggleOutcome;
use storefront_sync_client::session::SessionContext;
use storefront_sync_core::ProductId;

use super::{CliError, lookup_product};

/// Log every favorite.
pub fn show(session: &SessionContext) {
    let items = session.favorites().items();
    if items.is_empty() {
        info!("No favorites");
        return;
    }
    for item in &items {
        info!(product_id = %item.product_id, price = %item.price, "{}", item.name);
    }
}

/// Toggle a product and report what happened.
pub async fn toggle(session: &SessionContext, product_id: ProductId) -> Result<(), CliError> {
    let product = lookup_product(session, product_id).await?;
    match session.favorites().toggle_favorite(product).await {
        ToggleOutcome::Added => info!(product_id = %product_id, "Added to favorites"),
        ToggleOutcome::Removed => info!(product_id = %product_id, "Removed from favorites"),
        ToggleOutcome::RolledBack(e) => {
            warn!(product_id = %product_id, error = %e, "Favorite change was rolled back");
        }
        ToggleOutcome::LoginRequired => return Err(SyncError::LoginRequired.into()),
    }
    Ok(())
}
