//! Cart and favorites line items.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::price::Price;
use super::quantity::Quantity;

/// Product display data a view hands to the stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub price: Price,
    #[serde(default)]
    pub original_price: Option<Price>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

impl Product {
    /// Build a cart line for this product.
    #[must_use]
    pub fn into_cart_item(self, quantity: Quantity) -> CartItem {
        CartItem {
            product_id: self.product_id,
            name: self.name,
            brand: self.brand,
            price: self.price,
            original_price: self.original_price,
            image: self.image,
            quantity,
            in_stock: self.in_stock,
        }
    }

    /// Build a favorites entry for this product.
    #[must_use]
    pub fn into_favorite(self) -> FavoriteItem {
        FavoriteItem {
            product_id: self.product_id,
            name: self.name,
            brand: self.brand,
            price: self.price,
            original_price: self.original_price,
            image: self.image,
            in_stock: self.in_stock,
        }
    }

    /// Overwrite the displayed price. Returns `true` if anything changed.
    pub fn apply_price(&mut self, price: Price, original_price: Option<Price>) -> bool {
        apply_price_fields(&mut self.price, &mut self.original_price, price, original_price)
    }
}

/// A single cart line. One per distinct product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    /// Unit price.
    pub price: Price,
    /// Pre-discount unit price, when the product is on sale.
    #[serde(default)]
    pub original_price: Option<Price>,
    #[serde(default)]
    pub image: Option<String>,
    pub quantity: Quantity,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

impl CartItem {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.quantity)
    }

    /// Overwrite the price fields. Returns `true` if anything changed.
    ///
    /// A missing `original_price` leaves the current original price alone.
    pub fn apply_price(&mut self, price: Price, original_price: Option<Price>) -> bool {
        apply_price_fields(&mut self.price, &mut self.original_price, price, original_price)
    }
}

/// A wishlist entry. Carries a price snapshot but no quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteItem {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub price: Price,
    #[serde(default)]
    pub original_price: Option<Price>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default = "default_in_stock")]
    pub in_stock: bool,
}

impl FavoriteItem {
    /// Overwrite the price snapshot. Returns `true` if anything changed.
    pub fn apply_price(&mut self, price: Price, original_price: Option<Price>) -> bool {
        apply_price_fields(&mut self.price, &mut self.original_price, price, original_price)
    }
}

impl From<&CartItem> for Product {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product_id,
            name: item.name.clone(),
            brand: item.brand.clone(),
            price: item.price,
            original_price: item.original_price,
            image: item.image.clone(),
            in_stock: item.in_stock,
        }
    }
}

const fn default_in_stock() -> bool {
    true
}

/// Shared overwrite logic for every record carrying a price pair.
pub(crate) fn apply_price_fields(
    price: &mut Price,
    original_price: &mut Option<Price>,
    new_price: Price,
    new_original_price: Option<Price>,
) -> bool {
    let mut changed = false;
    if *price != new_price {
        *price = new_price;
        changed = true;
    }
    if let Some(original) = new_original_price
        && *original_price != Some(original)
    {
        *original_price = Some(original);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            product_id: ProductId::new(1),
            name: "Dried Pineapple".to_string(),
            brand: Some("Naked".to_string()),
            price: Price::from(500),
            original_price: None,
            image: None,
            in_stock: true,
        }
    }

    #[test]
    fn test_line_total() {
        let item = product().into_cart_item(Quantity::clamp(3));
        assert_eq!(item.line_total(), Price::from(1500));
    }

    #[test]
    fn test_apply_price_is_idempotent() {
        let mut item = product().into_cart_item(Quantity::ONE);
        assert!(item.apply_price(Price::from(450), Some(Price::from(500))));
        assert!(!item.apply_price(Price::from(450), Some(Price::from(500))));
        assert_eq!(item.price, Price::from(450));
        assert_eq!(item.original_price, Some(Price::from(500)));
    }

    #[test]
    fn test_apply_price_keeps_original_when_absent() {
        let mut fav = product().into_favorite();
        fav.original_price = Some(Price::from(600));
        assert!(fav.apply_price(Price::from(400), None));
        assert_eq!(fav.original_price, Some(Price::from(600)));
    }

    #[test]
    fn test_cart_item_wire_names() {
        let json = r#"{"productId":9,"name":"Mango","price":"3.50","quantity":2,"inStock":false}"#;
        let item: CartItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.product_id, ProductId::new(9));
        assert_eq!(item.quantity.get(), 2);
        assert!(!item.in_stock);
        assert!(item.brand.is_none());
    }
}
