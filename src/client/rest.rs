//! HTTP REST client for the GDAX public API.
//!
//! This module provides the [`RestClient`] used to fetch order book
//! snapshots and basic market data. Requests are signed when credentials are
//! configured and sent unsigned otherwise.
//!
//! # Example
//!
//! ```rust,no_run
//! use gdax_book::{Config, GdaxClient};
//!
//! # async fn example() -> gdax_book::Result<()> {
//! let client = GdaxClient::new(Config::new())?;
//!
//! let book = client.rest().get_product_order_book("BTC-USD", 3).await?;
//! println!("{} orders at sequence {}", book.order_count(), book.sequence);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

use crate::client::auth::{AuthHeaders, Signer};
use crate::config::Config;
use crate::error::{ApiError, Error};
use crate::orderbook::SnapshotSource;
use crate::types::{BookSnapshot, Product, ServerTime, Ticker};

const DEFAULT_USER_AGENT: &str = concat!("gdax-book/", env!("CARGO_PKG_VERSION"));

/// HTTP client for the GDAX REST API
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: Url,
    signer: Option<Signer>,
}

impl RestClient {
    /// Create a new REST client
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse, the API secret is not
    /// valid base64, or the HTTP client cannot be initialized.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let base_url = Url::parse(config.rest_base_url())?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "REST URL cannot be a base: {}",
                base_url
            )));
        }

        let signer = config.credentials().map(Signer::new).transpose()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(DEFAULT_USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            signer,
        })
    }

    /// Whether requests are signed
    pub fn is_authenticated(&self) -> bool {
        self.signer.is_some()
    }

    /// Build the absolute URL for an API path and query
    fn url(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        {
            let base_path = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{}{}", base_path, path));
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Build signing headers for a request, if credentials are configured
    fn auth_headers(&self, method: &Method, url: &Url, body: &str) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        let Some(signer) = &self.signer else {
            return Ok(headers);
        };

        let request_path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        let auth = signer.headers(method.as_str(), &request_path, body)?;

        for (name, value) in [
            (AuthHeaders::KEY_HEADER, &auth.key),
            (AuthHeaders::TIMESTAMP_HEADER, &auth.timestamp),
            (AuthHeaders::PASSPHRASE_HEADER, &auth.passphrase),
            (AuthHeaders::SIGNATURE_HEADER, &auth.signature),
        ] {
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Authentication(format!("invalid {} header: {}", name, e)))?;
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Authentication(e.to_string()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    /// Make a GET request to the API
    ///
    /// # Arguments
    ///
    /// * `path` - API path (without base URL), e.g. `/products`
    /// * `query` - Query string pairs
    pub async fn get<T>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.url(path, query);
        let headers = self.auth_headers(&Method::GET, &url, "")?;

        debug!(url = %url, "GET");
        let response = self.client.get(url).headers(headers).send().await?;

        self.handle_response(response).await
    }

    /// Handle the HTTP response, checking for errors
    async fn handle_response<T>(&self, response: reqwest::Response) -> Result<T, Error>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();

        // Check for rate limiting
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);

            return Err(Error::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        // Check for errors
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            // Try to parse as API error
            if let Ok(error_response) = serde_json::from_str::<serde_json::Value>(&body) {
                let message = error_response
                    .get("message")
                    .or_else(|| error_response.get("error"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(&body)
                    .to_string();

                let code = error_response
                    .get("code")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                return Err(Error::Api(ApiError {
                    status: status.as_u16(),
                    code,
                    message,
                }));
            }

            return Err(Error::Api(ApiError::new(status.as_u16(), body)));
        }

        // Deserialize successful response
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(Error::from)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Get a product's order book
    ///
    /// `level` is 1 (best bid/ask), 2 (top 50 aggregated) or 3 (every
    /// order). Only level 3 snapshots can seed a [`PriceLevelBook`].
    ///
    /// [`PriceLevelBook`]: crate::orderbook::PriceLevelBook
    pub async fn get_product_order_book(&self, product_id: &str, level: u8) -> Result<BookSnapshot, Error> {
        let level = level.to_string();
        self.get(
            &format!("/products/{}/book", product_id),
            &[("level", level.as_str())],
        )
        .await
    }

    /// List available products
    pub async fn get_products(&self) -> Result<Vec<Product>, Error> {
        self.get("/products", &[]).await
    }

    /// Get a product's last trade and best bid/ask
    pub async fn get_product_ticker(&self, product_id: &str) -> Result<Ticker, Error> {
        self.get(&format!("/products/{}/ticker", product_id), &[])
            .await
    }

    /// Get the exchange clock
    pub async fn get_time(&self) -> Result<ServerTime, Error> {
        self.get("/time", &[]).await
    }
}

#[async_trait]
impl SnapshotSource for RestClient {
    async fn fetch_snapshot(&self, product_id: &str) -> Result<BookSnapshot, Error> {
        self.get_product_order_book(product_id, 3).await
    }
}
