//! Session teardown.

use std::sync::{Arc, Mutex};

use storefront_sync_client::bus::Channel;
use storefront_sync_client::cart::CartMode;
use storefront_sync_client::favorites::ToggleOutcome;
use storefront_sync_client::merge::MergeOutcome;
use storefront_sync_client::persistence::{self, DurableStore, keys};
use storefront_sync_client::testing::{cart_item, product};
use storefront_sync_core::{ProductId, UserId, UserNotification};
use storefront_sync_integration_tests::{TestWorld, connected, eventually};

const USER: UserId = UserId::new(501);

#[tokio::test]
async fn test_logout_then_guest_session_starts_empty() {
    let world = TestWorld::new();
    world.cart.seed(vec![cart_item(1, 100, 2)]);

    let session = world.session();
    session.cart().add_item(product(3, 50), 1).await;
    session.login(USER).await;
    assert!(matches!(
        session.favorites().toggle_favorite(product(4, 20)).await,
        ToggleOutcome::Added
    ));
    assert!(!session.cart().is_empty());
    assert_eq!(session.favorites().items().len(), 1);

    session.logout().await.unwrap();

    assert!(session.cart().is_empty());
    assert_eq!(session.cart().mode(), CartMode::Guest);
    assert!(session.favorites().items().is_empty());
    assert_eq!(session.user(), None);
    assert!(session.require_auth().is_err());
    assert!(world.durable.get(keys::GUEST_CART).unwrap().is_none());
    assert!(!persistence::has_merged(world.durable.as_ref(), USER).unwrap());

    // server-side state survives
    assert!(world.cart.quantity_of(ProductId::new(1)).is_some());
    assert!(world.favorites.contains(ProductId::new(4)));

    let next = world.session();
    next.resume(None).await.unwrap();
    assert!(next.cart().is_empty());
}

#[tokio::test]
async fn test_next_guest_cart_merges_after_logout() {
    let world = TestWorld::new();
    let session = world.session();

    session.cart().add_item(product(1, 100), 1).await;
    session.login(USER).await;
    session.logout().await.unwrap();

    session.cart().add_item(product(2, 200), 3).await;
    assert_eq!(
        session.login(USER).await,
        MergeOutcome::Merged { merged: 1, failed: 0 }
    );
    assert_eq!(world.cart.quantity_of(ProductId::new(1)), Some(1));
    assert_eq!(world.cart.quantity_of(ProductId::new(2)), Some(3));
}

#[tokio::test]
async fn test_logout_drops_private_channel() {
    let world = TestWorld::new();
    let session = world.session();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let _guard = session.bus().on_notification(move |n: &UserNotification| {
        sink.lock().unwrap().push(n.kind.clone());
    });

    session.login(USER).await;
    session.start();
    connected(&session, 1).await;
    assert!(world.transport.subscriptions().contains(&Channel::User(USER)));

    let notice = UserNotification {
        kind: "order_shipped".to_string(),
        message: "Your order is on its way".to_string(),
        order_id: Some(77),
    };
    world.transport.push_notification(USER, &notice);
    eventually(|| received.lock().unwrap().len() == 1).await;

    session.logout().await.unwrap();
    connected(&session, 2).await;

    let subscriptions = world.transport.subscriptions();
    let reconnect = subscriptions
        .iter()
        .rposition(|c| *c == Channel::Prices)
        .unwrap();
    assert!(!subscriptions[reconnect..].contains(&Channel::User(USER)));

    // a stale frame on the old channel is not delivered
    world.transport.push_notification(USER, &notice);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(received.lock().unwrap().len(), 1);

    session.shutdown().await;
}
