//! End-to-end session scenarios for Storefront Sync.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p storefront-sync-integration-tests
//! ```
//!
//! Every scenario runs against the in-memory fakes from
//! `storefront_sync_client::testing`; no server is needed.
//!
//! # Test Categories
//!
//! - `session_merge` - Guest cart merge across login and restart
//! - `price_sync` - Live price events reaching mounted views
//! - `logout` - Session teardown

use std::path::Path;
use std::sync::Arc;

use storefront_sync_client::config::{BusConfig, SyncTuning};
use storefront_sync_client::persistence::{DurableStore, FileStore, MemoryStore};
use storefront_sync_client::session::{SessionContext, SessionParts};
use storefront_sync_client::testing::{
    FakeCartService, FakeCatalog, FakeFavoritesService, ScriptedTransport,
};

/// Server-side state and a client installation that outlive any single
/// session, so a test can "reload the page" by building a new session.
pub struct TestWorld {
    pub cart: Arc<FakeCartService>,
    pub favorites: Arc<FakeFavoritesService>,
    pub catalog: Arc<FakeCatalog>,
    pub durable: Arc<dyn DurableStore>,
    pub transport: ScriptedTransport,
}

impl TestWorld {
    /// A world whose installation state lives in memory.
    #[must_use]
    pub fn new() -> Self {
        Self::with_durable(Arc::new(MemoryStore::new()))
    }

    /// A world whose installation state lives in a state file.
    ///
    /// # Errors
    ///
    /// Returns the persistence error if the file exists but is unreadable.
    pub fn with_state_file(
        path: &Path,
    ) -> Result<Self, storefront_sync_client::persistence::PersistenceError> {
        Ok(Self::with_durable(Arc::new(FileStore::open(path)?)))
    }

    fn with_durable(durable: Arc<dyn DurableStore>) -> Self {
        Self {
            cart: Arc::new(FakeCartService::new()),
            favorites: Arc::new(FakeFavoritesService::new()),
            catalog: Arc::new(FakeCatalog::new()),
            durable,
            transport: ScriptedTransport::new(),
        }
    }

    /// A fresh session over this world.
    #[must_use]
    pub fn session(&self) -> SessionContext {
        SessionContext::new(SessionParts {
            cart_service: self.cart.clone(),
            favorites_service: self.favorites.clone(),
            catalog: self.catalog.clone(),
            durable: Arc::clone(&self.durable),
            transport: Arc::new(self.transport.clone()),
            bus: BusConfig {
                reconnect_delay: std::time::Duration::from_millis(10),
                ..BusConfig::default()
            },
            tuning: SyncTuning::default(),
        })
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds.
///
/// # Panics
///
/// Panics if the condition does not hold within five seconds.
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within five seconds"
        );
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
}

/// Wait until the session's bus has completed `epoch` connections.
///
/// # Panics
///
/// Panics if the bus does not get there within five seconds.
pub async fn connected(session: &SessionContext, epoch: u64) {
    let mut status = session.bus().watch_connection();
    let reached = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        status.wait_for(|s| s.is_connected() && s.epoch >= epoch),
    )
    .await
    .is_ok_and(|changed| changed.is_ok());
    assert!(reached, "bus did not reach connection {epoch}");
}
