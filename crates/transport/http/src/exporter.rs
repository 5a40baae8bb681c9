//! JSON POST delivery with a hard request timeout.
//!
//! `HttpExporter` performs exactly one request per [`HttpExporter::send`]
//! call. It never retries on its own: repeating a failed delivery is the
//! caller's decision, driven by [`TransferError::status`].

use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Url,
};
use serde::Serialize;
use tracing::debug;
use validator::Validate;

use super::{config::Config, Result, TransferError};

/// Sends JSON payloads to a single collector endpoint.
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct HttpExporter {
    client: Client,
    url: Url,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpExporter {
    /// Builds an exporter from a validated configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if the configuration fails validation
    /// - `ClientSetup` if the url cannot be parsed or the client cannot be built
    /// - `InvalidHeader` if a configured header is not valid HTTP
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let url = Url::parse(&config.url)
            .map_err(|e| TransferError::ClientSetup(format!("Invalid url '{}': {}", config.url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransferError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| TransferError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .build()
            .map_err(|e| TransferError::ClientSetup(e.to_string()))?;

        Ok(Self {
            client,
            url,
            headers,
            timeout: config.timeout(),
        })
    }

    /// Endpoint this exporter posts to.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Serializes `payload` as JSON and POSTs it to the endpoint.
    ///
    /// # Errors
    ///
    /// - `Timeout` (status 408) if no response arrives within the timeout
    /// - `Status` if the endpoint answers outside the 2xx range
    /// - `Request` for connection-level failures
    /// - `Serialization` if the payload cannot be encoded
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let bytes = body.len();

        let request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .body(body);

        let response = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(TransferError::Timeout(self.timeout_ms())),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TransferError::Timeout(self.timeout_ms())),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        debug!(url = %self.url, bytes, status = status.as_u16(), "Payload delivered");
        Ok(())
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
