//! Session cart store.
//!
//! For a guest the store *is* the cart, persisted to the durable store after
//! every mutation. For an authenticated user the remote cart is the source of
//! truth: every mutation writes through, and the store adopts the returned
//! cart. A failed write-through applies the same mutation locally so the cart
//! keeps reflecting what the user asked for; the next [`SessionCartStore::reload`]
//! reconciles it.
//!
//! Mutations are serialized in issuance order by an async FIFO gate held for
//! the whole round-trip. Price updates bypass the gate: they only touch the
//! in-memory state and never talk to the network.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use storefront_sync_core::{CartItem, Price, Product, ProductId, Quantity, UserId};

use crate::error::SyncError;
use crate::persistence::{self, DurableStore};
use crate::remote::CartService;
use crate::telemetry::add_breadcrumb;

/// Who the cart belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CartMode {
    /// Local cart persisted to the durable store.
    #[default]
    Guest,
    /// Write-through cache of the user's remote cart.
    Authenticated(UserId),
}

/// The session's cart.
///
/// Cheaply cloneable; clones share the same state.
#[derive(Clone)]
pub struct SessionCartStore {
    inner: Arc<CartInner>,
}

struct CartInner {
    remote: Arc<dyn CartService>,
    durable: Arc<dyn DurableStore>,
    state: RwLock<CartState>,
    gate: Mutex<()>,
}

#[derive(Default)]
struct CartState {
    mode: CartMode,
    items: Vec<CartItem>,
}

impl CartState {
    fn position(&self, product_id: ProductId) -> Option<usize> {
        self.items.iter().position(|i| i.product_id == product_id)
    }

    /// Sum-then-clamp add. The maximum applies to the resulting quantity.
    fn add(&mut self, product: Product, quantity: Quantity) {
        match self.items.iter_mut().find(|i| i.product_id == product.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
            None => self.items.push(product.into_cart_item(quantity)),
        }
    }

    fn set(&mut self, product_id: ProductId, quantity: Quantity) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == product_id) {
            existing.quantity = quantity;
        }
    }

    fn remove(&mut self, product_id: ProductId) {
        self.items.retain(|i| i.product_id != product_id);
    }
}

impl SessionCartStore {
    /// Create an empty guest cart.
    #[must_use]
    pub fn new(remote: Arc<dyn CartService>, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            inner: Arc::new(CartInner {
                remote,
                durable,
                state: RwLock::new(CartState::default()),
                gate: Mutex::new(()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CartState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CartState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current ownership mode.
    #[must_use]
    pub fn mode(&self) -> CartMode {
        self.read().mode
    }

    /// Snapshot of all lines, in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<CartItem> {
        self.read().items.clone()
    }

    /// Snapshot of a single line.
    #[must_use]
    pub fn get(&self, product_id: ProductId) -> Option<CartItem> {
        self.read()
            .items
            .iter()
            .find(|i| i.product_id == product_id)
            .cloned()
    }

    /// Whether the cart has a line for this product.
    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.read().position(product_id).is_some()
    }

    /// Sum of unit price times quantity over all lines.
    #[must_use]
    pub fn total(&self) -> Price {
        self.read().items.iter().map(CartItem::line_total).sum()
    }

    /// Sum of quantities over all lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.read().items.iter().map(|i| i.quantity.get()).sum()
    }

    /// Whether the cart is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of a product.
    ///
    /// The request is clamped to `[1, 50]`; if the product is already in the
    /// cart the quantities are summed and the result clamped again.
    #[instrument(skip(self, product), fields(product_id = %product.product_id))]
    pub async fn add_item(&self, product: Product, quantity: i64) {
        let _gate = self.inner.gate.lock().await;
        let quantity = Quantity::clamp(quantity);
        add_breadcrumb(
            "cart",
            "Added to cart",
            &[
                ("product_id", product.product_id.to_string()),
                ("quantity", quantity.to_string()),
            ],
        );

        match self.mode() {
            CartMode::Guest => {
                self.write().add(product, quantity);
                self.persist_guest();
            }
            CartMode::Authenticated(_) => {
                match self.inner.remote.add_item(&product, quantity).await {
                    Ok(items) => self.adopt(items),
                    Err(e) => {
                        warn!(error = %e, "Cart add failed remotely; applying locally");
                        self.write().add(product, quantity);
                    }
                }
            }
        }
    }

    /// Set the quantity of a line.
    ///
    /// A quantity below one removes the line; anything above 50 is clamped.
    #[instrument(skip(self))]
    pub async fn set_quantity(&self, product_id: ProductId, quantity: i64) {
        let Some(quantity) = Quantity::for_set(quantity) else {
            self.remove_item(product_id).await;
            return;
        };
        let _gate = self.inner.gate.lock().await;

        match self.mode() {
            CartMode::Guest => {
                self.write().set(product_id, quantity);
                self.persist_guest();
            }
            CartMode::Authenticated(_) => {
                match self.inner.remote.set_quantity(product_id, quantity).await {
                    Ok(items) => self.adopt(items),
                    Err(e) => {
                        warn!(error = %e, "Cart quantity update failed remotely; applying locally");
                        self.write().set(product_id, quantity);
                    }
                }
            }
        }
    }

    /// Remove a line unconditionally.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, product_id: ProductId) {
        let _gate = self.inner.gate.lock().await;
        add_breadcrumb(
            "cart",
            "Removed from cart",
            &[("product_id", product_id.to_string())],
        );

        match self.mode() {
            CartMode::Guest => {
                self.write().remove(product_id);
                self.persist_guest();
            }
            CartMode::Authenticated(_) => match self.inner.remote.remove_item(product_id).await {
                Ok(items) => self.adopt(items),
                Err(e) => {
                    warn!(error = %e, "Cart removal failed remotely; applying locally");
                    self.write().remove(product_id);
                }
            },
        }
    }

    /// Empty the cart.
    #[instrument(skip(self))]
    pub async fn clear(&self) {
        let _gate = self.inner.gate.lock().await;

        if let CartMode::Authenticated(_) = self.mode()
            && let Err(e) = self.inner.remote.clear().await
        {
            warn!(error = %e, "Cart clear failed remotely; clearing locally");
        }
        self.write().items.clear();
        if self.mode() == CartMode::Guest {
            self.persist_guest();
        }
    }

    /// Apply a pushed price change to the matching line.
    ///
    /// Purely local: the server already holds the new price, and refetching
    /// here could overwrite a concurrent mutation. Applying the same price
    /// twice is a no-op. Returns `true` if a line changed.
    pub fn apply_price_update(
        &self,
        product_id: ProductId,
        new_price: Price,
        new_original_price: Option<Price>,
    ) -> bool {
        let changed = {
            let mut state = self.write();
            state
                .items
                .iter_mut()
                .find(|i| i.product_id == product_id)
                .is_some_and(|item| item.apply_price(new_price, new_original_price))
        };
        if changed {
            debug!(product_id = %product_id, price = %new_price, "Cart price updated");
            if self.mode() == CartMode::Guest {
                self.persist_guest();
            }
        }
        changed
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Load the cart from its source of truth.
    ///
    /// Guests read the durable snapshot; authenticated users fetch the remote
    /// cart, which discards any local fallback edits.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the remote cart or the snapshot cannot be read.
    /// The in-memory cart is left unchanged in that case.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), SyncError> {
        let _gate = self.inner.gate.lock().await;
        let items = match self.mode() {
            CartMode::Guest => persistence::load_guest_cart(self.inner.durable.as_ref())?,
            CartMode::Authenticated(_) => self.inner.remote.fetch_cart().await?,
        };
        debug!(lines = items.len(), "Cart reloaded");
        self.adopt(items);
        Ok(())
    }

    /// Switch ownership mode, waiting for in-flight mutations first.
    ///
    /// Items are kept; callers follow up with [`Self::reload`] or the guest
    /// merge.
    pub async fn set_mode(&self, mode: CartMode) {
        let _gate = self.inner.gate.lock().await;
        let previous = std::mem::replace(&mut self.write().mode, mode);
        if previous != mode {
            info!(?previous, ?mode, "Cart mode changed");
        }
    }

    /// Drop every in-memory line and return to guest mode.
    ///
    /// Does not touch the remote cart or the durable store.
    pub async fn reset(&self) {
        let _gate = self.inner.gate.lock().await;
        let mut state = self.write();
        state.items.clear();
        state.mode = CartMode::Guest;
    }

    /// Replace local state with an authoritative cart, keeping one line per
    /// product.
    fn adopt(&self, items: Vec<CartItem>) {
        let mut deduped: Vec<CartItem> = Vec::with_capacity(items.len());
        for item in items {
            match deduped.iter_mut().find(|i| i.product_id == item.product_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
                None => deduped.push(item),
            }
        }
        self.write().items = deduped;
    }

    fn persist_guest(&self) {
        let items = self.items();
        if let Err(e) = persistence::save_guest_cart(self.inner.durable.as_ref(), &items) {
            warn!(error = %e, "Failed to persist guest cart");
        }
    }
}
