//! Live price events reaching mounted views.

use std::sync::Arc;

use storefront_sync_client::testing::{cart_item, product};
use storefront_sync_client::view::RecordingNotifier;
use storefront_sync_core::{Price, PriceUpdateEvent, ProductId, UserId};
use storefront_sync_integration_tests::{TestWorld, connected, eventually};

const USER: UserId = UserId::new(501);
const B: ProductId = ProductId::new(2);

fn line_price(view: &storefront_sync_client::view::CartView, product_id: ProductId) -> Option<Price> {
    view.line(product_id).map(|line| line.unit_price)
}

// =============================================================================
// Cart
// =============================================================================

#[tokio::test]
async fn test_price_event_updates_authenticated_cart_without_refetch() {
    let world = TestWorld::new();
    world.cart.seed(vec![cart_item(2, 500, 2)]);

    let session = world.session();
    session.login(USER).await;
    session.start();
    connected(&session, 1).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let (view, _sync) = session.mount_cart_view(notifier.clone());
    let fetches = world.cart.fetch_count();

    assert!(world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(450))));
    eventually(|| line_price(&view, B) == Some(Price::from(450))).await;

    let line = view.line(B).unwrap();
    assert_eq!(line.line_total, Price::from(900));
    assert_eq!(view.subtotal(), Price::from(900));
    assert_eq!(world.cart.fetch_count(), fetches);
    // the remote cart was not written either
    assert_eq!(world.cart.items()[0].price, Price::from(500));

    session.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_event_notifies_once() {
    let world = TestWorld::new();
    world.cart.seed(vec![cart_item(2, 500, 1)]);

    let session = world.session();
    session.login(USER).await;
    session.start();
    connected(&session, 1).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let (view, _sync) = session.mount_cart_view(notifier.clone());

    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(450)));
    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(450)));
    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(400)));
    eventually(|| line_price(&view, B) == Some(Price::from(400))).await;

    let prices: Vec<Price> = notifier.notices().iter().map(|n| n.price).collect();
    assert_eq!(prices, vec![Price::from(450), Price::from(400)]);

    session.shutdown().await;
}

#[tokio::test]
async fn test_last_delivered_event_wins() {
    let world = TestWorld::new();
    let session = world.session();
    session.resume(None).await.unwrap();
    session.cart().add_item(product(2, 1000), 1).await;
    session.start();
    connected(&session, 1).await;

    let notifier = Arc::new(RecordingNotifier::new());
    let (view, _sync) = session.mount_cart_view(notifier);

    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(999)));
    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(1099)));
    eventually(|| line_price(&view, B) == Some(Price::from(1099))).await;

    // guest carts persist the patched price
    let reloaded = world.session();
    reloaded.resume(None).await.unwrap();
    assert_eq!(reloaded.cart().get(B).unwrap().price, Price::from(1099));

    session.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_refreshes_cart_view() {
    let world = TestWorld::new();
    world.cart.seed(vec![cart_item(2, 500, 1)]);

    let session = world.session();
    session.login(USER).await;
    let (view, _sync) = session.mount_cart_view(Arc::new(RecordingNotifier::new()));
    session.start();
    connected(&session, 1).await;

    // a price change the client missed while disconnected
    world.transport.drop_connection();
    world.cart.seed(vec![cart_item(2, 350, 1)]);
    connected(&session, 2).await;

    eventually(|| line_price(&view, B) == Some(Price::from(350))).await;
    session.shutdown().await;
}

// =============================================================================
// Products
// =============================================================================

#[tokio::test]
async fn test_views_follow_their_notification_policy() {
    let world = TestWorld::new();
    let session = world.session();
    session.start();
    connected(&session, 1).await;

    let detail_notices = Arc::new(RecordingNotifier::new());
    let list_notices = Arc::new(RecordingNotifier::new());
    let (detail, _detail_sync) = session.mount_product_detail(product(2, 500), detail_notices.clone());
    let (list, _list_sync) =
        session.mount_product_list(vec![product(1, 100), product(2, 500)], list_notices.clone());

    world.transport.push_price(
        &PriceUpdateEvent::changed(B, Price::from(420)).with_original(Price::from(500)),
    );
    eventually(|| detail.product().price == Price::from(420)).await;
    eventually(|| list.products()[1].price == Price::from(420)).await;

    assert_eq!(detail.product().original_price, Some(Price::from(500)));
    assert_eq!(detail_notices.count(), 1);
    assert_eq!(list_notices.count(), 0);

    // replays after a reconnect update the view without a notice
    world.transport.push_price(&PriceUpdateEvent::sync(B, Price::from(410)));
    eventually(|| detail.product().price == Price::from(410)).await;
    assert_eq!(detail_notices.count(), 1);

    session.shutdown().await;
}

#[tokio::test]
async fn test_unmounted_view_stops_updating() {
    let world = TestWorld::new();
    let session = world.session();
    session.start();
    connected(&session, 1).await;

    let (detail, sync) = session.mount_product_detail(product(2, 500), Arc::new(RecordingNotifier::new()));
    let (probe, _probe_sync) =
        session.mount_product_detail(product(2, 500), Arc::new(RecordingNotifier::new()));
    drop(sync);

    world.transport.push_price(&PriceUpdateEvent::changed(B, Price::from(300)));
    eventually(|| probe.product().price == Price::from(300)).await;
    assert_eq!(detail.product().price, Price::from(500));

    session.shutdown().await;
}
