//! JSON/HTTP implementation of the remote services.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | fetch cart | `GET api/cart` |
//! | add item | `POST api/cart/items` `{productId, quantity}` |
//! | set quantity | `PUT api/cart/items/{id}` `{quantity}` |
//! | remove item | `DELETE api/cart/items/{id}` |
//! | clear cart | `DELETE api/cart` |
//! | fetch favorites | `GET api/favorites` |
//! | add / remove favorite | `POST` / `DELETE api/favorites/{id}` |
//! | products | `GET api/products?ids=1,2,3` |
//!
//! Cart endpoints respond with `{"items": [CartItem...]}`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use storefront_sync_core::{CartItem, FavoriteItem, Product, ProductId, Quantity};

use super::{ApiError, CartService, CatalogService, FavoritesService};
use crate::config::ClientConfig;

/// Client for the storefront REST API.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct RestClient {
    inner: Arc<RestClientInner>,
}

struct RestClientInner {
    client: reqwest::Client,
    base_url: Url,
    token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct CartResponse {
    #[serde(default)]
    items: Vec<CartItem>,
}

#[derive(Debug, Deserialize)]
struct FavoritesResponse {
    #[serde(default)]
    items: Vec<FavoriteItem>,
}

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    #[serde(default)]
    items: Vec<Product>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddItemRequest {
    product_id: ProductId,
    quantity: Quantity,
}

#[derive(Debug, Serialize)]
struct SetQuantityRequest {
    quantity: Quantity,
}

impl RestClient {
    /// Create a new API client whose requests give up after
    /// `config.request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.api_token.clone(),
        ))
    }

    /// Create a client around an existing `reqwest::Client`.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: Url, token: Option<SecretString>) -> Self {
        Self {
            inner: Arc::new(RestClientInner {
                client,
                base_url,
                token,
            }),
        }
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| ApiError::NotFound(format!("{path}: {e}")))
    }

    /// Send a request and return the raw response body.
    async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<String, ApiError> {
        let mut request = self
            .inner
            .client
            .request(method, self.url(path)?)
            .header("Accept", "application/json");
        if let Some(token) = &self.inner.token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        // Check for rate limiting
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(path.to_string()));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %response_text.chars().take(500).collect::<String>(),
                "Storefront API returned non-success status"
            );
            return Err(ApiError::Status {
                status,
                body: response_text.chars().take(200).collect(),
            });
        }

        Ok(response_text)
    }

    /// Send a request and parse the JSON response.
    async fn execute<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response_text = self.send(method, path, body).await?;
        serde_json::from_str(&response_text).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %response_text.chars().take(500).collect::<String>(),
                "Failed to parse storefront API response"
            );
            ApiError::Parse(e)
        })
    }

    async fn cart_request<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Vec<CartItem>, ApiError> {
        let response: CartResponse = self.execute(method, path, body).await?;
        debug!(lines = response.items.len(), "Cart response");
        Ok(response.items)
    }
}

#[async_trait]
impl CartService for RestClient {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<Vec<CartItem>, ApiError> {
        self.cart_request::<()>(Method::GET, "cart", None).await
    }

    #[instrument(skip(self, product), fields(product_id = %product.product_id))]
    async fn add_item(
        &self,
        product: &Product,
        quantity: Quantity,
    ) -> Result<Vec<CartItem>, ApiError> {
        let body = AddItemRequest {
            product_id: product.product_id,
            quantity,
        };
        self.cart_request(Method::POST, "cart/items", Some(&body))
            .await
    }

    #[instrument(skip(self))]
    async fn set_quantity(
        &self,
        product_id: ProductId,
        quantity: Quantity,
    ) -> Result<Vec<CartItem>, ApiError> {
        let body = SetQuantityRequest { quantity };
        self.cart_request(Method::PUT, &format!("cart/items/{product_id}"), Some(&body))
            .await
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, product_id: ProductId) -> Result<Vec<CartItem>, ApiError> {
        self.cart_request::<()>(Method::DELETE, &format!("cart/items/{product_id}"), None)
            .await
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<(), ApiError> {
        self.send::<()>(Method::DELETE, "cart", None).await?;
        Ok(())
    }
}

#[async_trait]
impl FavoritesService for RestClient {
    #[instrument(skip(self))]
    async fn fetch_favorites(&self) -> Result<Vec<FavoriteItem>, ApiError> {
        let response: FavoritesResponse = self.execute::<(), _>(Method::GET, "favorites", None).await?;
        Ok(response.items)
    }

    #[instrument(skip(self))]
    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.send::<()>(Method::POST, &format!("favorites/{product_id}"), None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.send::<()>(Method::DELETE, &format!("favorites/{product_id}"), None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogService for RestClient {
    #[instrument(skip(self), fields(count = ids.len()))]
    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let joined = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let response: ProductsResponse = self
            .execute::<(), _>(Method::GET, &format!("products?ids={joined}"), None)
            .await?;
        Ok(response.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::with_client(
            reqwest::Client::new(),
            Url::parse("https://shop.example.com/api/").unwrap(),
            None,
        )
    }

    #[test]
    fn test_url_joins_relative_to_api_base() {
        let client = client();
        assert_eq!(
            client.url("cart/items/5").unwrap().as_str(),
            "https://shop.example.com/api/cart/items/5"
        );
        assert_eq!(
            client.url("products?ids=1,2").unwrap().as_str(),
            "https://shop.example.com/api/products?ids=1,2"
        );
    }

    #[test]
    fn test_request_bodies() {
        let body = AddItemRequest {
            product_id: ProductId::new(4),
            quantity: Quantity::clamp(2),
        };
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"productId":4,"quantity":2}"#
        );
    }

    #[test]
    fn test_cart_response_parses_items() {
        let response: CartResponse = serde_json::from_str(
            r#"{"items":[{"productId":1,"name":"Mango","price":"2.50","quantity":3}]}"#,
        )
        .unwrap();
        assert_eq!(response.items.len(), 1);
        let empty: CartResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept connections and never answer
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = ClientConfig::from_lookup(|key| match key {
            "STOREFRONT_API_URL" => Some(format!("http://{addr}/api")),
            "STOREFRONT_REQUEST_TIMEOUT_MS" => Some("100".to_string()),
            _ => None,
        })
        .unwrap();
        let client = RestClient::new(&config).unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), client.fetch_cart()).await;
        assert!(matches!(result, Ok(Err(ApiError::Http(_)))));
        server.abort();
    }
}
