//! In-memory fakes of the remote services and push transport.
//!
//! Enabled for unit tests and, through the `test-util` feature, for the
//! integration-tests crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use storefront_sync_core::{
    CartItem, FavoriteItem, Price, PriceUpdateEvent, Product, ProductId, Quantity, UserId,
    UserNotification,
};

use crate::bus::transport::{
    Channel, Frame, PRICES_CHANNEL, PushConnection, PushTransport, TransportError,
};
use crate::remote::{ApiError, CartService, CatalogService, FavoritesService};

/// A product priced at `price` whole units.
#[must_use]
pub fn product(id: i64, price: i64) -> Product {
    Product {
        product_id: ProductId::new(id),
        name: format!("Product {id}"),
        brand: None,
        price: Price::from(price),
        original_price: None,
        image: None,
        in_stock: true,
    }
}

/// A cart line for [`product`] with a clamped quantity.
#[must_use]
pub fn cart_item(id: i64, price: i64, quantity: i64) -> CartItem {
    product(id, price).into_cart_item(Quantity::clamp(quantity))
}

fn injected_failure() -> ApiError {
    ApiError::Status {
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: "injected failure".to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Cart
// =============================================================================

/// Remote cart held in memory, with sum-then-clamp add semantics.
#[derive(Default)]
pub struct FakeCartService {
    state: Mutex<FakeCart>,
    calls: AtomicUsize,
    fetches: AtomicUsize,
}

#[derive(Default)]
struct FakeCart {
    items: Vec<CartItem>,
    failing: bool,
    failing_products: HashSet<ProductId>,
    latency: Option<Duration>,
}

impl FakeCartService {
    /// An empty, healthy cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote cart without counting a call.
    pub fn seed(&self, items: Vec<CartItem>) {
        lock(&self.state).items = items;
    }

    /// Make every call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    /// Make mutations of one product fail.
    pub fn fail_product(&self, product_id: ProductId) {
        lock(&self.state).failing_products.insert(product_id);
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = Some(latency);
    }

    /// Calls made so far, reads included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `fetch_cart` calls made so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Quantity of a remote line.
    pub fn quantity_of(&self, product_id: ProductId) -> Option<u32> {
        lock(&self.state)
            .items
            .iter()
            .find(|i| i.product_id == product_id)
            .map(|i| i.quantity.get())
    }

    /// Snapshot of the remote cart.
    pub fn items(&self) -> Vec<CartItem> {
        lock(&self.state).items.clone()
    }

    async fn begin(&self, product_id: Option<ProductId>) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = lock(&self.state).latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = lock(&self.state);
        if state.failing || product_id.is_some_and(|id| state.failing_products.contains(&id)) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl CartService for FakeCartService {
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.begin(None).await?;
        Ok(self.items())
    }

    async fn add_item(&self, product: &Product, quantity: Quantity) -> Result<Vec<CartItem>, ApiError> {
        self.begin(Some(product.product_id)).await?;
        let mut state = lock(&self.state);
        match state.items.iter_mut().find(|i| i.product_id == product.product_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => state.items.push(product.clone().into_cart_item(quantity)),
        }
        Ok(state.items.clone())
    }

    async fn set_quantity(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<Vec<CartItem>, ApiError> {
        self.begin(Some(product_id)).await?;
        let mut state = lock(&self.state);
        let line = state
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| ApiError::NotFound(format!("cart line {product_id}")))?;
        line.quantity = quantity;
        Ok(state.items.clone())
    }

    async fn remove_item(&self, product_id: ProductId) -> Result<Vec<CartItem>, ApiError> {
        self.begin(Some(product_id)).await?;
        let mut state = lock(&self.state);
        state.items.retain(|i| i.product_id != product_id);
        Ok(state.items.clone())
    }

    async fn clear(&self) -> Result<(), ApiError> {
        self.begin(None).await?;
        lock(&self.state).items.clear();
        Ok(())
    }
}

// =============================================================================
// Favorites
// =============================================================================

/// Remote wishlist held in memory.
#[derive(Default)]
pub struct FakeFavoritesService {
    items: Mutex<Vec<FavoriteItem>>,
    failing: Mutex<bool>,
    calls: AtomicUsize,
}

impl FakeFavoritesService {
    /// An empty, healthy wishlist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote wishlist without counting a call.
    pub fn seed(&self, items: Vec<FavoriteItem>) {
        *lock(&self.items) = items;
    }

    /// Make every call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    /// Calls made so far, reads included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the remote wishlist holds a product.
    pub fn contains(&self, product_id: ProductId) -> bool {
        lock(&self.items).iter().any(|i| i.product_id == product_id)
    }

    fn begin(&self) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.failing) {
            return Err(injected_failure());
        }
        Ok(())
    }
}

#[async_trait]
impl FavoritesService for FakeFavoritesService {
    async fn fetch_favorites(&self) -> Result<Vec<FavoriteItem>, ApiError> {
        self.begin()?;
        Ok(lock(&self.items).clone())
    }

    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.begin()?;
        let mut items = lock(&self.items);
        if !items.iter().any(|i| i.product_id == product_id) {
            items.push(product(product_id.as_i64(), 0).into_favorite());
        }
        Ok(())
    }

    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.begin()?;
        lock(&self.items).retain(|i| i.product_id != product_id);
        Ok(())
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Product lookups served from memory.
#[derive(Default)]
pub struct FakeCatalog {
    products: Mutex<HashMap<ProductId, Product>>,
    fetches: AtomicUsize,
}

impl FakeCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a product.
    pub fn insert(&self, product: Product) {
        lock(&self.products).insert(product.product_id, product);
    }

    /// Change a product's current price.
    pub fn set_price(&self, product_id: ProductId, price: Price) {
        if let Some(product) = lock(&self.products).get_mut(&product_id) {
            product.price = price;
        }
    }

    /// `fetch_products` calls made so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let products = lock(&self.products);
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }
}

// =============================================================================
// Push transport
// =============================================================================

/// Push transport driven by the test.
///
/// Clones share state. Frames pushed while no connection is open are lost,
/// like events sent to a disconnected client.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    heartbeats: AtomicUsize,
    stall_heartbeats: AtomicBool,
    stall_subscribes: AtomicBool,
    subscriptions: Mutex<Vec<Channel>>,
    // `None` closes the stream
    current: Mutex<Option<mpsc::UnboundedSender<Option<Frame>>>>,
}

impl ScriptedTransport {
    /// A transport that accepts every connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make heartbeat sends hang forever, like a peer that stopped answering.
    pub fn stall_heartbeats(&self, stall: bool) {
        self.state.stall_heartbeats.store(stall, Ordering::SeqCst);
    }

    /// Make subscribe calls hang forever.
    pub fn stall_subscribes(&self, stall: bool) {
        self.state.stall_subscribes.store(stall, Ordering::SeqCst);
    }

    /// Deliver a frame on the open connection. Returns `false` if none is open.
    pub fn push(&self, frame: Frame) -> bool {
        lock(&self.state.current)
            .as_ref()
            .is_some_and(|tx| tx.send(Some(frame)).is_ok())
    }

    /// Deliver a price event on the price channel.
    pub fn push_price(&self, event: &PriceUpdateEvent) -> bool {
        let body = serde_json::to_string(event).unwrap_or_default();
        self.push(Frame::message(PRICES_CHANNEL, body))
    }

    /// Deliver a notification on a user's private channel.
    pub fn push_notification(&self, user_id: UserId, notification: &UserNotification) -> bool {
        let body = serde_json::to_string(notification).unwrap_or_default();
        self.push(Frame::message(Channel::User(user_id).path(), body))
    }

    /// Close the open connection from the server side.
    pub fn drop_connection(&self) {
        if let Some(tx) = lock(&self.state.current).take() {
            let _ = tx.send(None);
        }
    }

    /// Connection attempts so far, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Client heartbeats sent so far.
    pub fn heartbeat_count(&self) -> usize {
        self.state.heartbeats.load(Ordering::SeqCst)
    }

    /// Every subscription made, across connections, in order.
    pub fn subscriptions(&self) -> Vec<Channel> {
        lock(&self.state.subscriptions).clone()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Box<dyn PushConnection>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Protocol("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.state.current) = Some(tx);
        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            frames: rx,
        }))
    }
}

struct ScriptedConnection {
    state: Arc<ScriptState>,
    frames: mpsc::UnboundedReceiver<Option<Frame>>,
}

#[async_trait]
impl PushConnection for ScriptedConnection {
    async fn subscribe(&mut self, channel: Channel) -> Result<(), TransportError> {
        if self.state.stall_subscribes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        lock(&self.state.subscriptions).push(channel);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        // a replaced or closed sender ends the stream
        Ok(self.frames.recv().await.flatten())
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.state.heartbeats.fetch_add(1, Ordering::SeqCst);
        if self.state.stall_heartbeats.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.frames.close();
    }
}
