//! Product detail and product list views.
//!
//! These own their view-models. A price event patches the matching product
//! in place; a reconnect refresh re-reads the shown products from the
//! catalog when one is attached.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use storefront_sync_core::{Product, PriceUpdateEvent, ProductId};

use super::{PriceTarget, Refresh};
use crate::error::SyncError;
use crate::remote::CatalogService;

/// A single product page.
pub struct ProductDetailView {
    product: RwLock<Product>,
    catalog: Option<Arc<dyn CatalogService>>,
}

impl ProductDetailView {
    #[must_use]
    pub const fn new(product: Product) -> Self {
        Self {
            product: RwLock::new(product),
            catalog: None,
        }
    }

    /// Refresh from `catalog` after reconnects.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogService>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Snapshot of the shown product.
    #[must_use]
    pub fn product(&self) -> Product {
        self.product.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn product_id(&self) -> ProductId {
        self.product.read().unwrap_or_else(PoisonError::into_inner).product_id
    }
}

impl PriceTarget for ProductDetailView {
    fn renders(&self, product_id: ProductId) -> bool {
        self.product_id() == product_id
    }

    fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
        let mut product = self.product.write().unwrap_or_else(PoisonError::into_inner);
        product.product_id == event.product_id
            && product.apply_price(event.new_price, event.new_original_price)
    }

    fn describe(&self, _product_id: ProductId) -> Option<String> {
        Some(self.product.read().unwrap_or_else(PoisonError::into_inner).name.clone())
    }
}

#[async_trait]
impl Refresh for ProductDetailView {
    async fn refresh(&self) -> Result<(), SyncError> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };
        let id = self.product_id();
        let fresh = catalog.fetch_products(&[id]).await?;
        if let Some(fresh) = fresh.into_iter().find(|p| p.product_id == id) {
            *self.product.write().unwrap_or_else(PoisonError::into_inner) = fresh;
        }
        Ok(())
    }
}

/// A grid of products: category pages, search results, brand pages.
pub struct ProductListView {
    products: RwLock<Vec<Product>>,
    catalog: Option<Arc<dyn CatalogService>>,
}

impl ProductListView {
    #[must_use]
    pub const fn new(products: Vec<Product>) -> Self {
        Self {
            products: RwLock::new(products),
            catalog: None,
        }
    }

    /// Refresh from `catalog` after reconnects.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogService>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Snapshot of the shown products, in display order.
    #[must_use]
    pub fn products(&self) -> Vec<Product> {
        self.products.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the shown products, e.g. after paging.
    pub fn replace(&self, products: Vec<Product>) {
        *self.products.write().unwrap_or_else(PoisonError::into_inner) = products;
    }
}

impl PriceTarget for ProductListView {
    fn renders(&self, product_id: ProductId) -> bool {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p.product_id == product_id)
    }

    fn apply_price(&self, event: &PriceUpdateEvent) -> bool {
        let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
        // the same product may appear in several slots
        products
            .iter_mut()
            .filter(|p| p.product_id == event.product_id)
            .fold(false, |changed, p| {
                p.apply_price(event.new_price, event.new_original_price) || changed
            })
    }

    fn describe(&self, product_id: ProductId) -> Option<String> {
        self.products
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.product_id == product_id)
            .map(|p| p.name.clone())
    }
}

#[async_trait]
impl Refresh for ProductListView {
    /// Products the catalog no longer knows keep their last data.
    async fn refresh(&self) -> Result<(), SyncError> {
        let Some(catalog) = &self.catalog else {
            return Ok(());
        };
        let ids: Vec<ProductId> = self.products().iter().map(|p| p.product_id).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let fresh = catalog.fetch_products(&ids).await?;

        let mut products = self.products.write().unwrap_or_else(PoisonError::into_inner);
        for slot in products.iter_mut() {
            if let Some(update) = fresh.iter().find(|p| p.product_id == slot.product_id) {
                slot.clone_from(update);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use storefront_sync_core::Price;

    use super::*;
    use crate::testing::{FakeCatalog, product};

    #[test]
    fn test_detail_applies_only_its_product() {
        let view = ProductDetailView::new(product(1, 100));
        assert!(!view.apply_price(&PriceUpdateEvent::changed(ProductId::new(2), Price::from(5))));
        assert!(view.apply_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(90))));
        assert!(!view.apply_price(&PriceUpdateEvent::changed(ProductId::new(1), Price::from(90))));
        assert_eq!(view.product().price, Price::from(90));
    }

    #[test]
    fn test_list_updates_every_slot() {
        let view = ProductListView::new(vec![product(1, 100), product(2, 50), product(1, 100)]);
        assert!(view.renders(ProductId::new(2)));
        assert!(view.apply_price(
            &PriceUpdateEvent::changed(ProductId::new(1), Price::from(80)).with_original(Price::from(100))
        ));
        let prices: Vec<_> = view.products().iter().map(|p| p.price).collect();
        assert_eq!(prices, vec![Price::from(80), Price::from(50), Price::from(80)]);
        assert_eq!(view.products()[0].original_price, Some(Price::from(100)));
    }

    #[tokio::test]
    async fn test_list_refresh_reads_catalog() {
        let catalog = Arc::new(FakeCatalog::new());
        catalog.insert(product(1, 100));
        catalog.set_price(ProductId::new(1), Price::from(75));

        let view = ProductListView::new(vec![product(1, 100), product(9, 10)]).with_catalog(catalog.clone());
        view.refresh().await.unwrap();

        let products = view.products();
        assert_eq!(products[0].price, Price::from(75));
        // unknown to the catalog: left as is
        assert_eq!(products[1].price, Price::from(10));
        assert_eq!(catalog.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_detail_refresh_without_catalog_is_noop() {
        let view = ProductDetailView::new(product(1, 100));
        view.refresh().await.unwrap();
        assert_eq!(view.product().price, Price::from(100));
    }
}
