//! Authenticated wishlist.
//!
//! Favorites need a logged-in user; there is no guest persistence. Toggles
//! are optimistic: the local list changes first, the remote call follows, and
//! a remote failure reverts the local change.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use storefront_sync_core::{FavoriteItem, Price, Product, ProductId, UserId};

use crate::error::SyncError;
use crate::remote::{ApiError, FavoritesService};
use crate::telemetry::add_breadcrumb;

/// Result of [`FavoritesStore::toggle_favorite`].
#[derive(Debug)]
pub enum ToggleOutcome {
    /// The product is now a favorite.
    Added,
    /// The product is no longer a favorite.
    Removed,
    /// The remote call failed and the local change was reverted.
    RolledBack(ApiError),
    /// No user is logged in; the caller should send the user to login.
    LoginRequired,
}

/// The session's favorites.
///
/// Cheaply cloneable; clones share the same state.
#[derive(Clone)]
pub struct FavoritesStore {
    inner: Arc<FavoritesInner>,
}

struct FavoritesInner {
    remote: Arc<dyn FavoritesService>,
    state: RwLock<FavoritesState>,
    gate: Mutex<()>,
}

#[derive(Default)]
struct FavoritesState {
    user: Option<UserId>,
    items: Vec<FavoriteItem>,
}

/// A reversible local edit.
enum Change {
    Insert(FavoriteItem),
    Remove { item: FavoriteItem, index: usize },
}

impl Change {
    fn product_id(&self) -> ProductId {
        match self {
            Self::Insert(item) | Self::Remove { item, .. } => item.product_id,
        }
    }

    fn apply(&self, items: &mut Vec<FavoriteItem>) {
        match self {
            Self::Insert(item) => {
                if !items.iter().any(|i| i.product_id == item.product_id) {
                    items.push(item.clone());
                }
            }
            Self::Remove { item, .. } => items.retain(|i| i.product_id != item.product_id),
        }
    }

    fn revert(&self, items: &mut Vec<FavoriteItem>) {
        match self {
            Self::Insert(item) => items.retain(|i| i.product_id != item.product_id),
            Self::Remove { item, index } => {
                if !items.iter().any(|i| i.product_id == item.product_id) {
                    items.insert((*index).min(items.len()), item.clone());
                }
            }
        }
    }

    const fn outcome(&self) -> ToggleOutcome {
        match self {
            Self::Insert(_) => ToggleOutcome::Added,
            Self::Remove { .. } => ToggleOutcome::Removed,
        }
    }
}

impl FavoritesStore {
    /// Create an empty, logged-out store.
    #[must_use]
    pub fn new(remote: Arc<dyn FavoritesService>) -> Self {
        Self {
            inner: Arc::new(FavoritesInner {
                remote,
                state: RwLock::new(FavoritesState::default()),
                gate: Mutex::new(()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, FavoritesState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, FavoritesState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all favorites.
    #[must_use]
    pub fn items(&self) -> Vec<FavoriteItem> {
        self.read().items.clone()
    }

    /// Whether a product is a favorite.
    #[must_use]
    pub fn is_favorite(&self, product_id: ProductId) -> bool {
        self.read().items.iter().any(|i| i.product_id == product_id)
    }

    /// The logged-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        self.read().user
    }

    /// Add or remove a product.
    #[instrument(skip(self, product), fields(product_id = %product.product_id))]
    pub async fn toggle_favorite(&self, product: Product) -> ToggleOutcome {
        let _gate = self.inner.gate.lock().await;

        let change = {
            let state = self.read();
            if state.user.is_none() {
                return ToggleOutcome::LoginRequired;
            }
            match state
                .items
                .iter()
                .enumerate()
                .find(|(_, i)| i.product_id == product.product_id)
            {
                Some((index, item)) => Change::Remove {
                    item: item.clone(),
                    index,
                },
                None => Change::Insert(product.into_favorite()),
            }
        };

        let remote = Arc::clone(&self.inner.remote);
        let product_id = change.product_id();
        if matches!(change, Change::Insert(_)) {
            self.optimistic(change, async move { remote.add_favorite(product_id).await })
                .await
        } else {
            self.optimistic(change, async move { remote.remove_favorite(product_id).await })
                .await
        }
    }

    /// Apply `change` locally, run `remote`, and revert on failure.
    async fn optimistic<F>(&self, change: Change, remote: F) -> ToggleOutcome
    where
        F: Future<Output = Result<(), ApiError>>,
    {
        change.apply(&mut self.write().items);
        match remote.await {
            Ok(()) => {
                add_breadcrumb(
                    "favorites",
                    "Toggled favorite",
                    &[("product_id", change.product_id().to_string())],
                );
                change.outcome()
            }
            Err(e) => {
                warn!(product_id = %change.product_id(), error = %e, "Favorite toggle failed; rolling back");
                change.revert(&mut self.write().items);
                ToggleOutcome::RolledBack(e)
            }
        }
    }

    /// Refresh a favorite's price snapshot. Local only; idempotent.
    pub fn apply_price_update(
        &self,
        product_id: ProductId,
        new_price: Price,
        new_original_price: Option<Price>,
    ) -> bool {
        self.write()
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .is_some_and(|item| item.apply_price(new_price, new_original_price))
    }

    /// Start the session for `user_id` and load their favorites.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the favorites cannot be fetched; the user is
    /// still considered logged in.
    #[instrument(skip(self))]
    pub async fn login(&self, user_id: UserId) -> Result<(), SyncError> {
        {
            let _gate = self.inner.gate.lock().await;
            let mut state = self.write();
            if state.user != Some(user_id) {
                state.items.clear();
            }
            state.user = Some(user_id);
        }
        self.reload().await
    }

    /// Reload favorites from the remote service.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LoginRequired` when logged out, or the API error.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let _gate = self.inner.gate.lock().await;
        if self.user().is_none() {
            return Err(SyncError::LoginRequired);
        }
        let items = self.inner.remote.fetch_favorites().await?;
        info!(count = items.len(), "Favorites loaded");
        self.write().items = items;
        Ok(())
    }

    /// End the session: forget the user and every favorite.
    pub async fn reset(&self) {
        let _gate = self.inner.gate.lock().await;
        let mut state = self.write();
        state.user = None;
        state.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFavoritesService, product};

    async fn logged_in() -> (FavoritesStore, Arc<FakeFavoritesService>) {
        let remote = Arc::new(FakeFavoritesService::new());
        let store = FavoritesStore::new(remote.clone());
        store.login(UserId::new(1)).await.unwrap();
        (store, remote)
    }

    #[tokio::test]
    async fn test_toggle_requires_login() {
        let remote = Arc::new(FakeFavoritesService::new());
        let store = FavoritesStore::new(remote.clone());
        assert!(matches!(
            store.toggle_favorite(product(1, 100)).await,
            ToggleOutcome::LoginRequired
        ));
        assert!(store.items().is_empty());
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_toggle_adds_then_removes() {
        let (store, remote) = logged_in().await;
        assert!(matches!(
            store.toggle_favorite(product(1, 100)).await,
            ToggleOutcome::Added
        ));
        assert!(store.is_favorite(ProductId::new(1)));
        assert!(remote.contains(ProductId::new(1)));

        assert!(matches!(
            store.toggle_favorite(product(1, 100)).await,
            ToggleOutcome::Removed
        ));
        assert!(!store.is_favorite(ProductId::new(1)));
        assert!(!remote.contains(ProductId::new(1)));
    }

    #[tokio::test]
    async fn test_failed_add_rolls_back() {
        let (store, remote) = logged_in().await;
        remote.set_failing(true);
        assert!(matches!(
            store.toggle_favorite(product(1, 100)).await,
            ToggleOutcome::RolledBack(_)
        ));
        assert!(!store.is_favorite(ProductId::new(1)));
    }

    #[tokio::test]
    async fn test_failed_remove_restores_position() {
        let (store, remote) = logged_in().await;
        for id in 1..=3 {
            store.toggle_favorite(product(id, 100)).await;
        }
        remote.set_failing(true);
        assert!(matches!(
            store.toggle_favorite(product(2, 100)).await,
            ToggleOutcome::RolledBack(_)
        ));
        let ids: Vec<_> = store.items().iter().map(|i| i.product_id.as_i64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_price_snapshot_update() {
        let (store, _) = logged_in().await;
        store.toggle_favorite(product(1, 100)).await;
        assert!(store.apply_price_update(ProductId::new(1), Price::from(80), None));
        assert!(!store.apply_price_update(ProductId::new(1), Price::from(80), None));
        assert_eq!(store.items()[0].price, Price::from(80));
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (store, _) = logged_in().await;
        store.toggle_favorite(product(1, 100)).await;
        store.reset().await;
        assert!(store.items().is_empty());
        assert!(store.user().is_none());
        assert!(matches!(store.reload().await, Err(SyncError::LoginRequired)));
    }
}
