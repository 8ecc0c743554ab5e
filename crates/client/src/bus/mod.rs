//! Live price event bus.
//!
//! One background task owns the push connection. It subscribes to the price
//! channel (and the user's private channel while someone is logged in),
//! keeps the connection alive with heartbeats, and fans decoded events out to
//! registered listeners.
//!
//! # Connection lifecycle
//!
//! ```text
//! Connecting --ok--> Connected --lost / heartbeat timeout--> Disconnected
//!     ^                                                           |
//!     +-------------------- reconnect_delay ---------------------+
//! ```
//!
//! Each entry into `Connected` bumps the connection epoch. Views watch the
//! epoch to refresh after a reconnect, since events sent while disconnected
//! are not replayed reliably.
//!
//! Events are delivered in the order the transport produces them. Listeners
//! run synchronously on the bus task and must not block.

pub mod listeners;
pub mod sse;
pub mod transport;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use storefront_sync_core::{PriceUpdateEvent, UserId, UserNotification};

use crate::config::BusConfig;

pub use listeners::{ListenerGuard, Listeners};
pub use sse::SseTransport;
pub use transport::{Channel, Frame, PRICES_CHANNEL, PushConnection, PushTransport, TransportError};

/// Connection state of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opening a connection and subscribing.
    Connecting,
    /// Subscribed and receiving.
    Connected,
    /// Not connected; a reconnect may be pending.
    Disconnected,
}

/// Connection state plus the number of successful connections so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Incremented on every transition into `Connected`.
    pub epoch: u64,
}

impl ConnectionStatus {
    /// Whether the bus is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Subscription to server-pushed price events and user notifications.
///
/// Cheap to clone; clones share listeners and connection state.
#[derive(Clone)]
pub struct PriceEventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    transport: Arc<dyn PushTransport>,
    config: BusConfig,
    prices: Listeners<PriceUpdateEvent>,
    notifications: Listeners<UserNotification>,
    status: watch::Sender<ConnectionStatus>,
    user: watch::Sender<Option<UserId>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to the running bus task.
///
/// Dropping the handle stops the bus.
pub struct BusHandle {
    inner: Arc<BusInner>,
    task: Option<JoinHandle<()>>,
}

impl BusHandle {
    /// Stop the bus and wait for the connection to close.
    pub async fn shutdown(mut self) {
        self.inner.shutdown.send_replace(true);
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Price event bus task failed");
        }
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.inner.shutdown.send_replace(true);
    }
}

impl PriceEventBus {
    /// Create a stopped bus over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn PushTransport>, config: BusConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            epoch: 0,
        });
        let (user, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(BusInner {
                transport,
                config,
                prices: Listeners::new(),
                notifications: Listeners::new(),
                status,
                user,
                shutdown,
            }),
        }
    }

    /// Spawn the connection task. Must be called within a Tokio runtime.
    ///
    /// Run one task per bus at a time.
    #[must_use = "dropping the handle stops the bus"]
    pub fn start(&self) -> BusHandle {
        self.inner.shutdown.send_replace(false);
        let task = tokio::spawn(Arc::clone(&self.inner).run());
        BusHandle {
            inner: Arc::clone(&self.inner),
            task: Some(task),
        }
    }

    /// Register a price event listener.
    #[must_use = "dropping the guard deregisters the listener immediately"]
    pub fn on_price_update<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&PriceUpdateEvent) + Send + Sync + 'static,
    {
        self.inner.prices.register(listener)
    }

    /// Register a user notification listener.
    #[must_use = "dropping the guard deregisters the listener immediately"]
    pub fn on_notification<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&UserNotification) + Send + Sync + 'static,
    {
        self.inner.notifications.register(listener)
    }

    /// Current connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_status().state
    }

    /// Watch connection status changes.
    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Set the user whose private channel should be subscribed.
    ///
    /// A change forces a reconnect so the subscriptions match the session.
    pub fn set_user(&self, user: Option<UserId>) {
        let changed = self.inner.user.send_if_modified(|current| {
            if *current == user {
                return false;
            }
            *current = user;
            true
        });
        if changed {
            info!(user = ?user, "Push subscriptions will follow new user");
        }
    }

    /// The user whose private channel is subscribed.
    #[must_use]
    pub fn user(&self) -> Option<UserId> {
        *self.inner.user.borrow()
    }

    /// Number of registered price listeners.
    #[must_use]
    pub fn price_listener_count(&self) -> usize {
        self.inner.prices.len()
    }

    /// Feed a frame through the same decoding and dispatch as live traffic.
    pub fn dispatch(&self, frame: Frame) {
        self.inner.dispatch(frame);
    }
}

// =============================================================================
// Connection task
// =============================================================================

/// Why a connection ended.
enum Exit {
    Shutdown,
    UserChanged,
    Failed(TransportError),
}

/// One wakeup of the receive loop.
enum Step {
    Idle,
    Shutdown,
    UserChanged,
    SendHeartbeat,
    Silent,
    Received(Result<Option<Frame>, TransportError>),
}

impl BusInner {
    async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut user_rx = self.user.subscribe();
        info!("Price event bus started");

        loop {
            let user = *user_rx.borrow_and_update();
            self.set_state(ConnectionState::Connecting);

            let opened = tokio::select! {
                () = stopped(&mut shutdown) => break,
                opened = self.open(user) => opened,
            };

            let exit = match opened {
                Ok(mut conn) => {
                    let epoch = self.mark_connected();
                    info!(epoch, user = ?user, "Price event bus connected");
                    let exit = self.receive(conn.as_mut(), &mut shutdown, &mut user_rx).await;
                    conn.close().await;
                    exit
                }
                Err(e) => Exit::Failed(e),
            };
            self.set_state(ConnectionState::Disconnected);

            match exit {
                Exit::Shutdown => break,
                Exit::UserChanged => debug!("Reconnecting for user change"),
                Exit::Failed(e) => {
                    warn!(
                        error = %e,
                        delay_ms = self.config.reconnect_delay.as_millis(),
                        "Push connection lost; reconnecting"
                    );
                    tokio::select! {
                        () = stopped(&mut shutdown) => break,
                        _ = user_rx.changed() => {}
                        () = tokio::time::sleep(self.config.reconnect_delay) => {}
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Price event bus stopped");
    }

    async fn open(
        &self,
        user: Option<UserId>,
    ) -> Result<Box<dyn PushConnection>, TransportError> {
        let mut conn = self.transport.connect().await?;
        let subscribed = tokio::time::timeout(
            self.config.heartbeat_incoming,
            subscribe_all(conn.as_mut(), user),
        )
        .await
        .unwrap_or(Err(TransportError::HeartbeatTimeout));
        if let Err(e) = subscribed {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    /// Pump frames until the connection ends or the bus is told to stop.
    async fn receive(
        &self,
        conn: &mut dyn PushConnection,
        shutdown: &mut watch::Receiver<bool>,
        user_rx: &mut watch::Receiver<Option<UserId>>,
    ) -> Exit {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_outgoing);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        heartbeat.tick().await;
        let mut deadline = Instant::now() + self.config.heartbeat_incoming;

        loop {
            let step = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        Step::Shutdown
                    } else {
                        Step::Idle
                    }
                }
                changed = user_rx.changed() => {
                    if changed.is_err() { Step::Idle } else { Step::UserChanged }
                }
                _ = heartbeat.tick() => Step::SendHeartbeat,
                () = tokio::time::sleep_until(deadline) => Step::Silent,
                frame = conn.next_frame() => Step::Received(frame),
            };

            match step {
                Step::Idle => {}
                Step::Shutdown => return Exit::Shutdown,
                Step::UserChanged => return Exit::UserChanged,
                Step::SendHeartbeat => {
                    // a peer that accepts but never answers still hits the deadline
                    match tokio::time::timeout_at(deadline, conn.send_heartbeat()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => return Exit::Failed(e),
                        Err(_) => return Exit::Failed(TransportError::HeartbeatTimeout),
                    }
                }
                Step::Silent => return Exit::Failed(TransportError::HeartbeatTimeout),
                Step::Received(Ok(Some(frame))) => {
                    deadline = Instant::now() + self.config.heartbeat_incoming;
                    self.dispatch(frame);
                }
                Step::Received(Ok(None)) => return Exit::Failed(TransportError::Closed),
                Step::Received(Err(e)) => return Exit::Failed(e),
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        let Frame::Message { channel, body } = frame else {
            trace!("Server heartbeat");
            return;
        };

        if channel == PRICES_CHANNEL {
            match PriceUpdateEvent::decode(&body) {
                Ok(event) => {
                    let delivered = self.prices.emit(&event);
                    debug!(
                        product_id = %event.product_id,
                        price = %event.new_price,
                        replay = event.is_replay(),
                        delivered,
                        "Price event dispatched"
                    );
                }
                Err(e) => warn!(error = %e, "Discarding malformed price event"),
            }
            return;
        }

        let user = *self.user.borrow();
        let user_channel = user.map(|user_id| Channel::User(user_id).path());
        if user_channel.as_deref() == Some(channel.as_str()) {
            match UserNotification::decode(&body) {
                Ok(notification) => {
                    let delivered = self.notifications.emit(&notification);
                    debug!(kind = %notification.kind, delivered, "User notification dispatched");
                }
                Err(e) => warn!(error = %e, "Discarding malformed user notification"),
            }
            return;
        }

        debug!(channel = %channel, "Ignoring frame on unsubscribed channel");
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }

    fn mark_connected(&self) -> u64 {
        let mut epoch = 0;
        self.status.send_modify(|status| {
            status.state = ConnectionState::Connected;
            status.epoch += 1;
            epoch = status.epoch;
        });
        epoch
    }
}

async fn subscribe_all(
    conn: &mut dyn PushConnection,
    user: Option<UserId>,
) -> Result<(), TransportError> {
    conn.subscribe(Channel::Prices).await?;
    if let Some(user_id) = user {
        conn.subscribe(Channel::User(user_id)).await?;
    }
    Ok(())
}

/// Resolves once the shutdown flag is set.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // the sender lives in BusInner, which outlives the task
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use storefront_sync_core::{Price, ProductId};

    use super::*;
    use crate::testing::ScriptedTransport;

    const WAIT: Duration = Duration::from_secs(30);

    fn fast_config() -> BusConfig {
        BusConfig {
            reconnect_delay: Duration::from_millis(10),
            heartbeat_outgoing: Duration::from_secs(4),
            heartbeat_incoming: Duration::from_secs(10),
        }
    }

    fn bus(transport: &ScriptedTransport) -> PriceEventBus {
        PriceEventBus::new(Arc::new(transport.clone()), fast_config())
    }

    async fn wait_for_epoch(bus: &PriceEventBus, epoch: u64) {
        let mut rx = bus.watch_connection();
        timeout(WAIT, rx.wait_for(|s| s.is_connected() && s.epoch >= epoch))
            .await
            .expect("bus did not connect in time")
            .unwrap();
    }

    fn collect_prices(bus: &PriceEventBus) -> (ListenerGuard, mpsc::UnboundedReceiver<PriceUpdateEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = bus.on_price_update(move |event| {
            let _ = tx.send(event.clone());
        });
        (guard, rx)
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_dispatches_price_events_in_order() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let (_guard, mut rx) = collect_prices(&bus);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        transport.push_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(10)));
        transport.push_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(12)));

        assert_eq!(next(&mut rx).await.new_price, Price::from(10));
        assert_eq!(next(&mut rx).await.new_price, Price::from(12));
        assert_eq!(transport.subscriptions(), vec![Channel::Prices]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let (_guard, mut rx) = collect_prices(&bus);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        transport.push(Frame::message(PRICES_CHANNEL, "{not json"));
        transport.push(Frame::message("/topic/unknown", "{}"));
        transport.push_price(&PriceUpdateEvent::changed(ProductId::new(2), Price::from(5)));

        assert_eq!(next(&mut rx).await.product_id, ProductId::new(2));
        assert!(bus.connection_status().is_connected());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_server_close() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let (_guard, mut rx) = collect_prices(&bus);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        transport.drop_connection();
        wait_for_epoch(&bus, 2).await;
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.subscriptions(), vec![Channel::Prices, Channel::Prices]);

        transport.push_price(&PriceUpdateEvent::sync(ProductId::new(3), Price::from(7)));
        assert!(next(&mut rx).await.is_replay());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_connects_are_retried() {
        let transport = ScriptedTransport::new();
        transport.fail_next_connects(2);
        let bus = bus(&transport);
        let handle = bus.start();

        wait_for_epoch(&bus, 1).await;
        assert_eq!(transport.connect_count(), 3);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_user_channel_follows_session() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = bus.on_notification(move |n| {
            let _ = tx.send(n.clone());
        });
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        bus.set_user(Some(UserId::new(7)));
        wait_for_epoch(&bus, 2).await;
        assert!(transport.subscriptions().contains(&Channel::User(UserId::new(7))));

        transport.push_notification(
            UserId::new(7),
            &UserNotification {
                kind: "orderStatus".to_string(),
                message: "Shipped".to_string(),
                order_id: Some(3),
            },
        );
        assert_eq!(next(&mut rx).await.order_id, Some(3));

        // frames for another user's channel are not delivered
        transport.push(Frame::message(
            Channel::User(UserId::new(8)).path(),
            r#"{"kind":"orderStatus"}"#,
        ));
        bus.set_user(None);
        wait_for_epoch(&bus, 3).await;
        assert!(rx.try_recv().is_err());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_times_out() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        // nothing arrives; the incoming heartbeat window forces a reconnect
        wait_for_epoch(&bus, 2).await;
        assert!(transport.heartbeat_count() >= 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_heartbeat_send_times_out() {
        let transport = ScriptedTransport::new();
        transport.stall_heartbeats(true);
        let bus = bus(&transport);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        // the heartbeat POST never completes and the server stays silent
        wait_for_epoch(&bus, 2).await;
        assert_eq!(transport.connect_count(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_subscribe_is_retried() {
        let transport = ScriptedTransport::new();
        transport.stall_subscribes(true);
        let bus = bus(&transport);
        let handle = bus.start();

        timeout(WAIT, async {
            while transport.connect_count() < 2 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(bus.connection_status().epoch, 0);
        assert_eq!(bus.connection_state(), ConnectionState::Connecting);

        transport.stall_subscribes(false);
        wait_for_epoch(&bus, 1).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let transport = ScriptedTransport::new();
        let bus = bus(&transport);
        let handle = bus.start();
        wait_for_epoch(&bus, 1).await;

        handle.shutdown().await;
        assert_eq!(bus.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_listener_stops_receiving() {
        let bus = bus(&ScriptedTransport::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let guard = bus.on_price_update(move |e| sink.lock().unwrap().push(e.product_id));

        let body = serde_json::to_string(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(1)))
            .unwrap();
        bus.dispatch(Frame::message(PRICES_CHANNEL, body.clone()));
        drop(guard);
        bus.dispatch(Frame::message(PRICES_CHANNEL, body));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(bus.price_listener_count(), 0);
    }
}
