//! Live price event stream.

use tracing::info;

use storefront_sync_client::session::SessionContext;
use storefront_sync_core::UserId;

use super::{CliError, notifier};

/// Connect the bus and log events until Ctrl-C.
///
/// With a user, the cart and favorites are loaded and mounted so their
/// prices follow the stream; notifications on the user's channel are logged
/// too.
pub async fn run(session: &SessionContext, user: Option<UserId>) -> Result<(), CliError> {
    session.resume(user).await?;

    let _prices = session.bus().on_price_update(|event| {
        info!(
            product_id = %event.product_id,
            price = %event.new_price,
            replay = event.is_replay(),
            "Price event"
        );
    });
    let _notifications = session.bus().on_notification(|notification| {
        info!(
            kind = %notification.kind,
            order_id = ?notification.order_id,
            "{}",
            notification.message
        );
    });
    let (_cart, _cart_sync) = session.mount_cart_view(notifier());
    let (_favorites, _favorites_sync) = session.mount_favorites_view(notifier());

    let mut status = session.bus().watch_connection();
    session.start();
    info!("Watching price events; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(state = ?current.state, epoch = current.epoch, "Connection changed");
            }
        }
    }

    session.shutdown().await;
    info!("Stopped");
    Ok(())
}
