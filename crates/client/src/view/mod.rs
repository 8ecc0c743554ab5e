//! Per-view price synchronization.
//!
//! Every screen that shows prices mounts its own [`ViewSync`]. The mount
//! registers one bus listener that:
//!
//! 1. ignores events for products the view does not render,
//! 2. patches the view-model's price fields in place (never refetching),
//! 3. asks the view's [`NotificationPolicy`] whether to tell the user.
//!
//! Views that implement [`Refresh`] can also reload their own data once per
//! connection epoch, covering events missed while disconnected.
//!
//! Dropping the `ViewSync` unmounts: the listener is deregistered at once and
//! any refresh task is aborted.

pub mod cart;
pub mod favorites;
pub mod product;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

use storefront_sync_core::{Price, PriceUpdateEvent, ProductId};

use crate::bus::{ListenerGuard, PriceEventBus};
use crate::config::SyncTuning;
use crate::error::SyncError;

pub use cart::{CartLine, CartView, CheckoutSummary};
pub use favorites::FavoritesView;
pub use product::{ProductDetailView, ProductListView};

/// Upper bound on remembered notifications per view.
const NOTICE_CACHE_CAPACITY: u64 = 1_024;

/// A view-model that displays prices.
pub trait PriceTarget: Send + Sync + 'static {
    /// Whether the view currently shows this product.
    fn renders(&self, product_id: ProductId) -> bool;

    /// Patch the displayed price. Returns `true` if anything changed.
    fn apply_price(&self, event: &PriceUpdateEvent) -> bool;

    /// Display name for notifications.
    fn describe(&self, product_id: ProductId) -> Option<String>;
}

/// A view that can reload its own data set.
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    async fn refresh(&self) -> Result<(), SyncError>;
}

/// A user-facing price change notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceNotice {
    pub product_id: ProductId,
    pub name: String,
    pub price: Price,
    pub original_price: Option<Price>,
}

/// Shows price notices to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &PriceNotice);
}

/// When a view tells the user about a price event it rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPolicy {
    /// Update prices without telling the user.
    Silent,
    /// Notify for every rendered event.
    Always,
    /// Skip reconnect replays, and skip a (product, price) pair already
    /// notified within `window`.
    Deduplicated { window: Duration },
}

impl NotificationPolicy {
    /// Deduplication with the configured window.
    #[must_use]
    pub const fn deduplicated(tuning: &SyncTuning) -> Self {
        Self::Deduplicated {
            window: tuning.notify_dedup_window,
        }
    }
}

/// Per-mount notification state.
enum NoticeGate {
    Silent,
    Always,
    Deduplicated(Cache<(ProductId, Price), ()>),
}

impl NoticeGate {
    fn new(policy: NotificationPolicy) -> Self {
        match policy {
            NotificationPolicy::Silent => Self::Silent,
            NotificationPolicy::Always => Self::Always,
            NotificationPolicy::Deduplicated { window } => Self::Deduplicated(
                Cache::builder()
                    .max_capacity(NOTICE_CACHE_CAPACITY)
                    .time_to_live(window)
                    .build(),
            ),
        }
    }

    fn admit(&self, event: &PriceUpdateEvent) -> bool {
        match self {
            Self::Silent => false,
            Self::Always => true,
            Self::Deduplicated(_) if event.is_replay() => false,
            Self::Deduplicated(seen) => seen
                .entry((event.product_id, event.new_price))
                .or_insert(())
                .is_fresh(),
        }
    }
}

/// A mounted view's bus registration.
#[must_use = "dropping the ViewSync unmounts the view"]
pub struct ViewSync {
    _listener: ListenerGuard,
    refresh: Option<JoinHandle<()>>,
}

impl ViewSync {
    /// Mount `view` on the bus.
    pub fn mount<V: PriceTarget>(
        bus: &PriceEventBus,
        view: Arc<V>,
        policy: NotificationPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gate = NoticeGate::new(policy);
        let listener = bus.on_price_update(move |event| {
            if !view.renders(event.product_id) {
                return;
            }
            let changed = view.apply_price(event);
            trace!(product_id = %event.product_id, changed, "View price applied");
            if gate.admit(event) {
                notifier.notify(&PriceNotice {
                    product_id: event.product_id,
                    name: view
                        .describe(event.product_id)
                        .unwrap_or_else(|| event.product_id.to_string()),
                    price: event.new_price,
                    original_price: event.new_original_price,
                });
            }
        });
        Self {
            _listener: listener,
            refresh: None,
        }
    }

    /// Mount `view` and refresh it once on every new connection.
    ///
    /// Only connections made after the mount count: a view mounted while the
    /// bus is already connected is not refreshed until the next reconnect.
    ///
    /// Must be called within a Tokio runtime.
    pub fn mount_with_refresh<V: PriceTarget + Refresh>(
        bus: &PriceEventBus,
        view: Arc<V>,
        policy: NotificationPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut status = bus.watch_connection();
        let target = Arc::clone(&view);
        let refresh = tokio::spawn(async move {
            // only connections made after the mount trigger a refresh
            let mut last_epoch = status.borrow_and_update().epoch;
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                if !current.is_connected() || current.epoch <= last_epoch {
                    continue;
                }
                last_epoch = current.epoch;
                if let Err(e) = target.refresh().await {
                    warn!(error = %e, epoch = current.epoch, "View refresh after reconnect failed");
                }
            }
        });

        let mut sync = Self::mount(bus, view, policy, notifier);
        sync.refresh = Some(refresh);
        sync
    }
}

impl Drop for ViewSync {
    fn drop(&mut self) {
        if let Some(task) = self.refresh.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Notifiers
// =============================================================================

/// Logs notices at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &PriceNotice) {
        info!(
            product_id = %notice.product_id,
            name = %notice.name,
            price = %notice.price,
            "Price changed"
        );
    }
}

/// Keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<PriceNotice>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notice so far, oldest first.
    #[must_use]
    pub fn notices(&self) -> Vec<PriceNotice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &PriceNotice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::timeout;

    use super::*;
    use crate::bus::{Frame, PRICES_CHANNEL};
    use crate::config::BusConfig;
    use crate::testing::ScriptedTransport;

    /// A single-price view-model.
    struct Tile {
        product_id: ProductId,
        price: RwLock<Price>,
        refreshes: AtomicUsize,
    }

    impl Tile {
        fn new(id: i64, price: i64) -> Arc<Self> {
            Arc::new(Self {
                product_id: ProductId::new(id),
                price: RwLock::new(Price::from(price)),
                refreshes: AtomicUsize::new(0),
            })
        }

        fn price(&self) -> Price {
            *self.price.read().unwrap()
        }
    }

    impl PriceTarget for Tile {
        fn renders(&self, product_id: ProductId) -> bool {
            product_id == self.product_id
        }

        fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
            let mut price = self.price.write().unwrap();
            let changed = *price != event.new_price;
            *price = event.new_price;
            changed
        }

        fn describe(&self, _: ProductId) -> Option<String> {
            Some("Tile".to_string())
        }
    }

    #[async_trait]
    impl Refresh for Tile {
        async fn refresh(&self) -> Result<(), SyncError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn wait_for_refreshes(tile: &Tile, count: usize) {
        timeout(Duration::from_secs(5), async {
            while tile.refreshes.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn idle_bus() -> PriceEventBus {
        PriceEventBus::new(Arc::new(ScriptedTransport::new()), BusConfig::default())
    }

    fn send(bus: &PriceEventBus, event: &PriceUpdateEvent) {
        bus.dispatch(Frame::message(PRICES_CHANNEL, serde_json::to_string(event).unwrap()));
    }

    fn dedup() -> NotificationPolicy {
        NotificationPolicy::Deduplicated {
            window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_filters_to_rendered_products() {
        let bus = idle_bus();
        let tile = Tile::new(1, 100);
        let notifier = Arc::new(RecordingNotifier::new());
        let _sync = ViewSync::mount(&bus, tile.clone(), NotificationPolicy::Always, notifier.clone());

        send(&bus, &PriceUpdateEvent::changed(ProductId::new(2), Price::from(5)));
        assert_eq!(tile.price(), Price::from(100));
        assert_eq!(notifier.count(), 0);

        send(&bus, &PriceUpdateEvent::changed(ProductId::new(1), Price::from(90)));
        assert_eq!(tile.price(), Price::from(90));
        assert_eq!(notifier.notices()[0].name, "Tile");
    }

    #[test]
    fn test_duplicate_event_notifies_once() {
        let bus = idle_bus();
        let tile = Tile::new(1, 100);
        let notifier = Arc::new(RecordingNotifier::new());
        let _sync = ViewSync::mount(&bus, tile.clone(), dedup(), notifier.clone());

        let event = PriceUpdateEvent::changed(ProductId::new(1), Price::from(999));
        send(&bus, &event);
        send(&bus, &event);
        assert_eq!(tile.price(), Price::from(999));
        assert_eq!(notifier.count(), 1);

        // a different resulting price is a new notice
        send(&bus, &PriceUpdateEvent::changed(ProductId::new(1), Price::from(1099)));
        assert_eq!(tile.price(), Price::from(1099));
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn test_replays_update_silently_when_deduplicated() {
        let bus = idle_bus();
        let tile = Tile::new(1, 100);
        let notifier = Arc::new(RecordingNotifier::new());
        let _sync = ViewSync::mount(&bus, tile.clone(), dedup(), notifier.clone());

        send(&bus, &PriceUpdateEvent::sync(ProductId::new(1), Price::from(80)));
        assert_eq!(tile.price(), Price::from(80));
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_silent_policy_never_notifies() {
        let bus = idle_bus();
        let tile = Tile::new(1, 100);
        let notifier = Arc::new(RecordingNotifier::new());
        let _sync = ViewSync::mount(&bus, tile.clone(), NotificationPolicy::Silent, notifier.clone());

        send(&bus, &PriceUpdateEvent::changed(ProductId::new(1), Price::from(80)));
        assert_eq!(tile.price(), Price::from(80));
        assert_eq!(notifier.count(), 0);
    }

    #[test]
    fn test_views_decide_independently() {
        let bus = idle_bus();
        let cart_tile = Tile::new(1, 100);
        let summary_tile = Tile::new(1, 100);
        let loud = Arc::new(RecordingNotifier::new());
        let quiet = Arc::new(RecordingNotifier::new());
        let _a = ViewSync::mount(&bus, cart_tile.clone(), dedup(), loud.clone());
        let _b = ViewSync::mount(&bus, summary_tile.clone(), NotificationPolicy::Silent, quiet.clone());

        send(&bus, &PriceUpdateEvent::changed(ProductId::new(1), Price::from(70)));
        assert_eq!(cart_tile.price(), Price::from(70));
        assert_eq!(summary_tile.price(), Price::from(70));
        assert_eq!(loud.count(), 1);
        assert_eq!(quiet.count(), 0);
    }

    #[test]
    fn test_unmount_stops_updates() {
        let bus = idle_bus();
        let tile = Tile::new(1, 100);
        let sync = ViewSync::mount(&bus, tile.clone(), NotificationPolicy::Silent, Arc::new(TracingNotifier));
        drop(sync);
        send(&bus, &PriceUpdateEvent::changed(ProductId::new(1), Price::from(1)));
        assert_eq!(tile.price(), Price::from(100));
        assert_eq!(bus.price_listener_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_once_per_connection() {
        let transport = ScriptedTransport::new();
        let config = BusConfig {
            reconnect_delay: Duration::from_millis(10),
            ..BusConfig::default()
        };
        let bus = PriceEventBus::new(Arc::new(transport.clone()), config);
        let tile = Tile::new(1, 100);
        let _sync = ViewSync::mount_with_refresh(
            &bus,
            tile.clone(),
            NotificationPolicy::Silent,
            Arc::new(TracingNotifier),
        );
        let handle = bus.start();

        let mut status = bus.watch_connection();
        timeout(Duration::from_secs(5), status.wait_for(|s| s.is_connected()))
            .await
            .unwrap()
            .unwrap();
        wait_for_refreshes(&tile, 1).await;
        // events within one connection never trigger a refresh
        for price in [90, 91, 92] {
            transport.push_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(price)));
        }
        transport.drop_connection();
        timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.is_connected() && s.epoch == 2),
        )
        .await
        .unwrap()
        .unwrap();
        wait_for_refreshes(&tile, 2).await;

        assert_eq!(tile.refreshes.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_mount_while_connected_waits_for_reconnect() {
        let transport = ScriptedTransport::new();
        let config = BusConfig {
            reconnect_delay: Duration::from_millis(10),
            ..BusConfig::default()
        };
        let bus = PriceEventBus::new(Arc::new(transport.clone()), config);
        let handle = bus.start();
        let mut status = bus.watch_connection();
        timeout(Duration::from_secs(5), status.wait_for(|s| s.is_connected()))
            .await
            .unwrap()
            .unwrap();

        let tile = Tile::new(1, 100);
        let _sync = ViewSync::mount_with_refresh(
            &bus,
            tile.clone(),
            NotificationPolicy::Silent,
            Arc::new(TracingNotifier),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tile.refreshes.load(Ordering::SeqCst), 0);

        transport.drop_connection();
        wait_for_refreshes(&tile, 1).await;
        handle.shutdown().await;
    }
}
