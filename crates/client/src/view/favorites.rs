//! Wishlist page.

use async_trait::async_trait;

use storefront_sync_core::{FavoriteItem, PriceUpdateEvent, ProductId};

use super::{PriceTarget, Refresh};
use crate::error::SyncError;
use crate::favorites::FavoritesStore;

/// The favorites page, backed by the session's [`FavoritesStore`].
pub struct FavoritesView {
    favorites: FavoritesStore,
}

impl FavoritesView {
    #[must_use]
    pub const fn new(favorites: FavoritesStore) -> Self {
        Self { favorites }
    }

    #[must_use]
    pub fn items(&self) -> Vec<FavoriteItem> {
        self.favorites.items()
    }
}

impl PriceTarget for FavoritesView {
    fn renders(&self, product_id: ProductId) -> bool {
        self.favorites.is_favorite(product_id)
    }

    fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
        self.favorites
            .apply_price_update(event.product_id, event.new_price, event.new_original_price)
    }

    fn describe(&self, product_id: ProductId) -> Option<String> {
        self.favorites
            .items()
            .into_iter()
            .find(|item| item.product_id == product_id)
            .map(|item| item.name)
    }
}

#[async_trait]
impl Refresh for FavoritesView {
    /// Logged-out sessions have nothing to refresh.
    async fn refresh(&self) -> Result<(), SyncError> {
        match self.favorites.reload().await {
            Err(SyncError::LoginRequired) => Ok(()),
            other => other,
        }
    }
}
