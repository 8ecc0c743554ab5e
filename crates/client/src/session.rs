//! Top-level session owner.
//!
//! [`SessionContext`] owns the durable store, both stores, the price event
//! bus and its running task. Views get their collaborators from here rather
//! than from any process-wide client.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{info, instrument, warn};

use storefront_sync_core::{Product, UserId};

use crate::bus::{BusHandle, PriceEventBus, PushTransport, SseTransport};
use crate::cart::{CartMode, SessionCartStore};
use crate::config::{BusConfig, ClientConfig, SyncTuning};
use crate::error::SyncError;
use crate::favorites::FavoritesStore;
use crate::merge::{GuestMerge, MergeOutcome};
use crate::persistence::{self, DurableStore, FileStore, keys};
use crate::remote::{ApiError, CartService, CatalogService, FavoritesService, RestClient};
use crate::telemetry;
use crate::view::{
    CartView, CheckoutSummary, FavoritesView, NotificationPolicy, Notifier, ProductDetailView,
    ProductListView, ViewSync,
};

/// Collaborators a session is assembled from.
pub struct SessionParts {
    pub cart_service: Arc<dyn CartService>,
    pub favorites_service: Arc<dyn FavoritesService>,
    pub catalog: Arc<dyn CatalogService>,
    pub durable: Arc<dyn DurableStore>,
    pub transport: Arc<dyn PushTransport>,
    pub bus: BusConfig,
    pub tuning: SyncTuning,
}

/// One client session: guest or authenticated.
pub struct SessionContext {
    durable: Arc<dyn DurableStore>,
    catalog: Arc<dyn CatalogService>,
    cart: SessionCartStore,
    favorites: FavoritesStore,
    merge: GuestMerge,
    bus: PriceEventBus,
    bus_handle: Mutex<Option<BusHandle>>,
    tuning: SyncTuning,
    user: RwLock<Option<UserId>>,
    // serializes login, resume and logout
    transition: tokio::sync::Mutex<()>,
}

impl SessionContext {
    /// Assemble a logged-out session. The bus is not started.
    #[must_use]
    pub fn new(parts: SessionParts) -> Self {
        let cart = SessionCartStore::new(Arc::clone(&parts.cart_service), Arc::clone(&parts.durable));
        Self {
            cart,
            favorites: FavoritesStore::new(parts.favorites_service),
            merge: GuestMerge::new(parts.cart_service, Arc::clone(&parts.durable)),
            bus: PriceEventBus::new(parts.transport, parts.bus),
            bus_handle: Mutex::new(None),
            durable: parts.durable,
            catalog: parts.catalog,
            tuning: parts.tuning,
            user: RwLock::new(None),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    /// Assemble a session against the configured REST API, event stream and
    /// state file.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Persistence` if the state file exists but cannot
    /// be read, or `SyncError::Api` if an HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, SyncError> {
        let rest = Arc::new(RestClient::new(config)?);
        let transport = SseTransport::from_config(config).map_err(ApiError::from)?;
        let durable = FileStore::open(&config.state_path)?;
        info!(state_path = %durable.path().display(), "Session state opened");

        Ok(Self::new(SessionParts {
            cart_service: rest.clone(),
            favorites_service: rest.clone(),
            catalog: rest,
            durable: Arc::new(durable),
            transport: Arc::new(transport),
            bus: config.bus,
            tuning: config.tuning,
        }))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub const fn cart(&self) -> &SessionCartStore {
        &self.cart
    }

    #[must_use]
    pub const fn favorites(&self) -> &FavoritesStore {
        &self.favorites
    }

    #[must_use]
    pub const fn bus(&self) -> &PriceEventBus {
        &self.bus
    }

    #[must_use]
    pub fn catalog(&self) -> &dyn CatalogService {
        self.catalog.as_ref()
    }

    #[must_use]
    pub fn durable(&self) -> &dyn DurableStore {
        self.durable.as_ref()
    }

    #[must_use]
    pub const fn tuning(&self) -> &SyncTuning {
        &self.tuning
    }

    /// The logged-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        *self.user.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The logged-in user.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::LoginRequired` for a guest session.
    pub fn require_auth(&self) -> Result<UserId, SyncError> {
        self.user().ok_or(SyncError::LoginRequired)
    }

    fn set_user(&self, user: Option<UserId>) {
        *self.user.write().unwrap_or_else(PoisonError::into_inner) = user;
    }

    // =========================================================================
    // Bus lifecycle
    // =========================================================================

    /// Start the price event bus. Does nothing if it is already running.
    pub fn start(&self) {
        let mut handle = self.bus_handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_none() {
            *handle = Some(self.bus.start());
        }
    }

    /// Stop the price event bus and wait for its connection to close.
    pub async fn shutdown(&self) {
        let handle = self
            .bus_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Authenticate the session as `user_id`.
    ///
    /// Switches the cart to the user's remote cart, merges the guest cart
    /// once per user and installation, subscribes the user's private channel
    /// and loads their favorites.
    #[instrument(skip(self))]
    pub async fn login(&self, user_id: UserId) -> MergeOutcome {
        let _transition = self.transition.lock().await;
        self.authenticate(user_id).await
    }

    /// Restore a session on start-up.
    ///
    /// With a known user this is the login path; the merge record keeps a
    /// restart after login from merging again. Without one, the guest cart
    /// is loaded from the durable snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the guest snapshot cannot be read.
    #[instrument(skip(self))]
    pub async fn resume(&self, user: Option<UserId>) -> Result<Option<MergeOutcome>, SyncError> {
        let _transition = self.transition.lock().await;
        match user {
            Some(user_id) => Ok(Some(self.authenticate(user_id).await)),
            None => {
                self.cart.set_mode(CartMode::Guest).await;
                self.cart.reload().await?;
                info!(lines = self.cart.items().len(), "Guest session resumed");
                Ok(None)
            }
        }
    }

    async fn authenticate(&self, user_id: UserId) -> MergeOutcome {
        self.cart.set_mode(CartMode::Authenticated(user_id)).await;
        self.set_user(Some(user_id));
        self.bus.set_user(Some(user_id));
        telemetry::set_sentry_user(user_id);

        let outcome = self.merge.run(user_id, &self.cart).await;
        // a completed merge has already reloaded the cart
        if !matches!(outcome, MergeOutcome::Merged { .. })
            && let Err(e) = self.cart.reload().await
        {
            warn!(error = %e, "Failed to load remote cart");
        }
        if let Err(e) = self.favorites.login(user_id).await {
            warn!(error = %e, "Failed to load favorites");
        }

        info!(?outcome, lines = self.cart.items().len(), "Logged in");
        outcome
    }

    /// End the session.
    ///
    /// Clears the cart and favorites in memory, deletes the guest snapshot
    /// and every merge record, and drops the private channel subscription.
    /// The next guest session starts empty.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Persistence` if local state could not be removed.
    /// The in-memory session is logged out regardless.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), SyncError> {
        let _transition = self.transition.lock().await;

        self.cart.reset().await;
        self.favorites.reset().await;
        let snapshot = self.durable.delete(keys::GUEST_CART);
        let records = persistence::clear_merge_records(self.durable.as_ref());

        self.set_user(None);
        self.bus.set_user(None);
        telemetry::clear_sentry_user();

        snapshot?;
        let cleared = records?;
        info!(merge_records = cleared, "Logged out");
        Ok(())
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Mount the cart page: deduplicated notices, refreshed on reconnect.
    pub fn mount_cart_view(&self, notifier: Arc<dyn Notifier>) -> (Arc<CartView>, ViewSync) {
        let view = Arc::new(CartView::new(self.cart.clone()));
        let sync = ViewSync::mount_with_refresh(
            &self.bus,
            Arc::clone(&view),
            NotificationPolicy::deduplicated(&self.tuning),
            notifier,
        );
        (view, sync)
    }

    /// Mount the checkout summary: silent, refreshed on reconnect.
    pub fn mount_checkout_summary(
        &self,
        notifier: Arc<dyn Notifier>,
    ) -> (Arc<CheckoutSummary>, ViewSync) {
        let view = Arc::new(CheckoutSummary::new(self.cart.clone()));
        let sync = ViewSync::mount_with_refresh(
            &self.bus,
            Arc::clone(&view),
            NotificationPolicy::Silent,
            notifier,
        );
        (view, sync)
    }

    /// Mount the favorites page: silent, refreshed on reconnect.
    pub fn mount_favorites_view(
        &self,
        notifier: Arc<dyn Notifier>,
    ) -> (Arc<FavoritesView>, ViewSync) {
        let view = Arc::new(FavoritesView::new(self.favorites.clone()));
        let sync = ViewSync::mount_with_refresh(
            &self.bus,
            Arc::clone(&view),
            NotificationPolicy::Silent,
            notifier,
        );
        (view, sync)
    }

    /// Mount a product page: deduplicated notices, refreshed on reconnect.
    pub fn mount_product_detail(
        &self,
        product: Product,
        notifier: Arc<dyn Notifier>,
    ) -> (Arc<ProductDetailView>, ViewSync) {
        let view = Arc::new(ProductDetailView::new(product).with_catalog(Arc::clone(&self.catalog)));
        let sync = ViewSync::mount_with_refresh(
            &self.bus,
            Arc::clone(&view),
            NotificationPolicy::deduplicated(&self.tuning),
            notifier,
        );
        (view, sync)
    }

    /// Mount a product grid: silent, refreshed on reconnect.
    pub fn mount_product_list(
        &self,
        products: Vec<Product>,
        notifier: Arc<dyn Notifier>,
    ) -> (Arc<ProductListView>, ViewSync) {
        let view = Arc::new(ProductListView::new(products).with_catalog(Arc::clone(&self.catalog)));
        let sync = ViewSync::mount_with_refresh(
            &self.bus,
            Arc::clone(&view),
            NotificationPolicy::Silent,
            notifier,
        );
        (view, sync)
    }
}
