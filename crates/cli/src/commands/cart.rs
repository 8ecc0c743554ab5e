//! Cart commands.
//!
//! The session is resumed before each command: the guest cart comes from the
//! state file, an authenticated cart from the remote API (after the one-time
//! guest merge).

use tracing::info;

use storefront_sync_client::session::SessionContext;
use storefront_sync_client::view::CartView;
use storefront_sync_core::ProductId;

use super::{CliError, lookup_product};

/// Log every line and the subtotal.
pub fn show(session: &SessionContext) {
    let view = CartView::new(session.cart().clone());
    let lines = view.lines();
    if lines.is_empty() {
        info!("Cart is empty");
        return;
    }
    for line in &lines {
        info!(
            product_id = %line.product_id,
            quantity = line.quantity,
            unit_price = %line.unit_price,
            line_total = %line.line_total,
            "{}",
            line.name
        );
    }
    info!(
        lines = lines.len(),
        items = session.cart().count(),
        subtotal = %view.subtotal(),
        "Cart total"
    );
}

/// Add units of a product looked up in the catalog.
pub async fn add(session: &SessionContext, product_id: ProductId, quantity: i64) -> Result<(), CliError> {
    let product = lookup_product(session, product_id).await?;
    session.cart().add_item(product, quantity).await;
    show(session);
    Ok(())
}

pub async fn set(session: &SessionContext, product_id: ProductId, quantity: i64) {
    session.cart().set_quantity(product_id, quantity).await;
    show(session);
}

pub async fn remove(session: &SessionContext, product_id: ProductId) {
    session.cart().remove_item(product_id).await;
    show(session);
}

pub async fn clear(session: &SessionContext) {
    session.cart().clear().await;
    info!("Cart cleared");
}
