//! HTTP client for the accrual provider.

use std::time::Duration;

use async_trait::async_trait;
use common::Money;
use reqwest::{Client, StatusCode, Url, header::RETRY_AFTER};
use serde::Deserialize;

use crate::error::{AccrualError, Result};
use crate::provider::{AccrualProvider, AccrualStatus};

/// Per-request timeout applied by the client itself.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause used when a 429 response carries no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum WireStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

#[derive(Debug, Deserialize)]
struct OrderAccrualResponse {
    status: WireStatus,
    accrual: Option<f64>,
}

impl OrderAccrualResponse {
    fn into_status(self) -> Result<AccrualStatus> {
        Ok(match self.status {
            WireStatus::Registered => AccrualStatus::Registered,
            WireStatus::Processing => AccrualStatus::Processing,
            WireStatus::Invalid => AccrualStatus::Invalid,
            WireStatus::Processed => {
                let raw = self.accrual.unwrap_or(0.0);
                let accrual = Money::from_decimal(raw)
                    .filter(|m| !m.is_negative())
                    .ok_or_else(|| AccrualError::InvalidResponse(format!("accrual {raw}")))?;
                AccrualStatus::Processed { accrual }
            }
        })
    }
}

/// HTTP client for the accrual provider.
///
/// Talks to `GET {base}/api/orders/{number}`:
/// - `200` with a JSON body: the order status
/// - `204`: the provider does not know the order
/// - `429`: rate limited, `Retry-After` holds the pause in seconds
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    client: Client,
    base_url: Url,
}

impl HttpAccrualClient {
    /// Creates a client for the provider at `base_url` (e.g. `"http://accrual:8080"`).
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom per-request timeout.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| AccrualError::InvalidAddress(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(AccrualError::InvalidAddress(base_url.to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn order_url(&self, number: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| AccrualError::InvalidAddress(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "orders", number]);
        Ok(url)
    }
}

/// Parses a `Retry-After` value given in seconds.
///
/// Missing, malformed or non-positive values fall back to [`DEFAULT_RETRY_AFTER`].
pub fn parse_retry_after(value: Option<&str>) -> Duration {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl AccrualProvider for HttpAccrualClient {
    #[tracing::instrument(skip(self))]
    async fn query(&self, number: &str) -> Result<Option<AccrualStatus>> {
        let url = self.order_url(number)?;
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AccrualError::Timeout
            } else {
                AccrualError::Http(e)
            }
        })?;

        match response.status() {
            StatusCode::OK => {
                let body: OrderAccrualResponse = response
                    .json()
                    .await
                    .map_err(|e| AccrualError::InvalidResponse(e.to_string()))?;
                body.into_status().map(Some)
            }
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => {
                let header = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok());
                Err(AccrualError::RateLimited {
                    retry_after: parse_retry_after(header),
                })
            }
            other => Err(AccrualError::UnexpectedStatus(other.as_u16())),
        }
    }
}
