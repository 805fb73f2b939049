//! Subscription REST API
//!
//! HTTP adapter for the backend endpoints that toggle upstream forwarding of
//! market data for a ticker.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | POST | `/api/stock/subscription/{ticker}/subscribe` | 2xx, body ignored |
//! | POST | `/api/stock/subscription/{ticker}/unsubscribe` | 2xx, body ignored |
//! | GET | `/api/stock/subscription/status` | JSON integer |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::application::ports::{ControlError, SubscriptionControl};
use crate::infrastructure::config::ClientConfig;

/// Path prefix of the subscription endpoints.
pub const SUBSCRIPTION_PATH: &str = "/api/stock/subscription";

/// Errors from the subscription API.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    /// Request could not be sent or timed out.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("request rejected with status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// Response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl From<RestError> for ControlError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Status { status, .. } => Self::Rejected { status },
            RestError::Decode(msg) => Self::InvalidResponse(msg),
            RestError::Client(msg) => Self::Network(msg),
            RestError::Network(e) => Self::Network(e.to_string()),
        }
    }
}

/// Upstream forwarding toggle.
#[derive(Debug, Clone)]
pub enum SubscriptionAction {
    /// Start forwarding.
    Subscribe,
    /// Stop forwarding.
    Unsubscribe,
}

impl SubscriptionAction {
    /// Path segment of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// HTTP client for the subscription endpoints.
#[derive(Debug, Clone)]
pub struct SubscriptionApi {
    client: Client,
    base_url: String,
}

impl SubscriptionApi {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, RestError> {
        Self::new(&config.api_base_url, config.request_timeout)
    }

    /// URL of an action endpoint.
    #[must_use]
    pub fn action_url(&self, ticker: &str, action: &SubscriptionAction) -> String {
        format!(
            "{}{SUBSCRIPTION_PATH}/{ticker}/{}",
            self.base_url,
            action.as_str()
        )
    }

    /// Ask the backend to forward ticks for `ticker`.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-2xx status.
    pub async fn subscribe(&self, ticker: &str) -> Result<(), RestError> {
        self.post_action(ticker, &SubscriptionAction::Subscribe).await
    }

    /// Ask the backend to stop forwarding ticks for `ticker`.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-2xx status.
    pub async fn unsubscribe(&self, ticker: &str) -> Result<(), RestError> {
        self.post_action(ticker, &SubscriptionAction::Unsubscribe)
            .await
    }

    /// Number of tickers the backend currently forwards.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, a non-2xx status or a body that
    /// is not a JSON integer.
    pub async fn active_subscription_count(&self) -> Result<u64, RestError> {
        let url = format!("{}{SUBSCRIPTION_PATH}/status", self.base_url);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str::<u64>(text.trim()).map_err(|e| RestError::Decode(e.to_string()))
    }

    async fn post_action(&self, ticker: &str, action: &SubscriptionAction) -> Result<(), RestError> {
        let url = self.action_url(ticker, action);
        tracing::debug!(url = %url, "Posting subscription action");

        let response = self.client.post(&url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl SubscriptionControl for SubscriptionApi {
    async fn enable(&self, ticker: &str) -> Result<(), ControlError> {
        Ok(self.subscribe(ticker).await?)
    }

    async fn disable(&self, ticker: &str) -> Result<(), ControlError> {
        Ok(self.unsubscribe(ticker).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_urls() {
        let api = SubscriptionApi::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.action_url("005930", &SubscriptionAction::Subscribe),
            "http://localhost:8080/api/stock/subscription/005930/subscribe"
        );
        assert_eq!(
            api.action_url("005930", &SubscriptionAction::Unsubscribe),
            "http://localhost:8080/api/stock/subscription/005930/unsubscribe"
        );
    }

    #[test]
    fn status_error_maps_to_rejected() {
        let err: ControlError = RestError::Status {
            status: 404,
            body: String::new(),
        }
        .into();
        assert_eq!(err, ControlError::Rejected { status: 404 });
    }
}
