//! Cart page and checkout summary.
//!
//! Both read straight from the [`SessionCartStore`]; applying a price event
//! patches the store's line in place, so the line totals and subtotal are
//! recomputed on the next read. When both are mounted the second application
//! is a no-op.

use async_trait::async_trait;

use storefront_sync_core::{CartItem, Price, PriceUpdateEvent, ProductId};

use super::{PriceTarget, Refresh};
use crate::cart::SessionCartStore;
use crate::error::SyncError;

/// One rendered cart line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: ProductId,
    pub name: String,
    pub unit_price: Price,
    pub original_price: Option<Price>,
    pub quantity: u32,
    pub line_total: Price,
}

impl From<&CartItem> for CartLine {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name.clone(),
            unit_price: item.price,
            original_price: item.original_price,
            quantity: item.quantity.get(),
            line_total: item.line_total(),
        }
    }
}

fn apply_to_cart(cart: &SessionCartStore, event: &PriceUpdateEvent) -> bool {
    cart.apply_price_update(event.product_id, event.new_price, event.new_original_price)
}

/// The cart page.
pub struct CartView {
    cart: SessionCartStore,
}

impl CartView {
    #[must_use]
    pub const fn new(cart: SessionCartStore) -> Self {
        Self { cart }
    }

    /// Rendered lines.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.cart.items().iter().map(CartLine::from).collect()
    }

    /// Rendered line for one product.
    #[must_use]
    pub fn line(&self, product_id: ProductId) -> Option<CartLine> {
        self.cart.get(product_id).as_ref().map(CartLine::from)
    }

    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.cart.total()
    }
}

impl PriceTarget for CartView {
    fn renders(&self, product_id: ProductId) -> bool {
        self.cart.contains(product_id)
    }

    fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
        apply_to_cart(&self.cart, event)
    }

    fn describe(&self, product_id: ProductId) -> Option<String> {
        self.cart.get(product_id).map(|item| item.name)
    }
}

#[async_trait]
impl Refresh for CartView {
    async fn refresh(&self) -> Result<(), SyncError> {
        self.cart.reload().await
    }
}

/// Order totals shown during checkout.
pub struct CheckoutSummary {
    cart: SessionCartStore,
}

impl CheckoutSummary {
    #[must_use]
    pub const fn new(cart: SessionCartStore) -> Self {
        Self { cart }
    }

    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.cart.total()
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.cart.count()
    }

    /// Total discount over lines priced below their original price.
    #[must_use]
    pub fn savings(&self) -> Price {
        self.cart
            .items()
            .iter()
            .filter_map(|item| {
                let original = item.original_price?;
                (original > item.price).then(|| {
                    Price::new(original.amount() - item.price.amount()).times(item.quantity)
                })
            })
            .sum()
    }
}

impl PriceTarget for CheckoutSummary {
    fn renders(&self, product_id: ProductId) -> bool {
        self.cart.contains(product_id)
    }

    fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
        apply_to_cart(&self.cart, event)
    }

    fn describe(&self, product_id: ProductId) -> Option<String> {
        self.cart.get(product_id).map(|item| item.name)
    }
}

#[async_trait]
impl Refresh for CheckoutSummary {
    async fn refresh(&self) -> Result<(), SyncError> {
        self.cart.reload().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::MemoryStore;
    use crate::testing::{FakeCartService, product};

    async fn cart_with(lines: &[(i64, i64, i64)]) -> SessionCartStore {
        let cart = SessionCartStore::new(
            Arc::new(FakeCartService::new()),
            Arc::new(MemoryStore::new()),
        );
        for &(id, price, qty) in lines {
            cart.add_item(product(id, price), qty).await;
        }
        cart
    }

    #[tokio::test]
    async fn test_price_event_recomputes_line_total() {
        let view = CartView::new(cart_with(&[(1, 500, 2), (2, 100, 1)]).await);
        assert!(view.renders(ProductId::new(1)));
        assert!(!view.renders(ProductId::new(3)));

        assert!(view.apply_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(450))));
        let line = view.line(ProductId::new(1)).unwrap();
        assert_eq!(line.unit_price, Price::from(450));
        assert_eq!(line.line_total, Price::from(900));
        assert_eq!(view.subtotal(), Price::from(1000));
        assert_eq!(view.describe(ProductId::new(2)).as_deref(), Some("Product 2"));
    }

    #[tokio::test]
    async fn test_checkout_savings() {
        let summary = CheckoutSummary::new(cart_with(&[(1, 500, 2), (2, 100, 1)]).await);
        assert_eq!(summary.savings(), Price::ZERO);

        summary.apply_price(
            &PriceUpdateEvent::changed(ProductId::new(1), Price::from(400))
                .with_original(Price::from(500)),
        );
        assert_eq!(summary.savings(), Price::from(200));
        assert_eq!(summary.subtotal(), Price::from(900));
        assert_eq!(summary.item_count(), 3);
    }

    #[tokio::test]
    async fn test_cart_and_summary_share_state() {
        let cart = cart_with(&[(1, 500, 1)]).await;
        let view = CartView::new(cart.clone());
        let summary = CheckoutSummary::new(cart);

        let event = PriceUpdateEvent::changed(ProductId::new(1), Price::from(300));
        assert!(view.apply_price(&event));
        assert!(!summary.apply_price(&event));
        assert_eq!(summary.subtotal(), Price::from(300));
    }
}
