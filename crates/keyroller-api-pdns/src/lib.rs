// # PowerDNS Management API Client
//
// This crate implements the core's `ManagementApi` trait against the
// PowerDNS authoritative server HTTP API.
//
// ## Behavior
//
// - Makes one HTTP request per trait method call
// - Full error propagation to the engine (the engine owns retries,
//   backoff and scheduling)
// - Per-request timeout taken from daemon configuration; an exceeded
//   timeout is a failure, never a hang
// - NO retry logic, NO backoff, NO caching, NO background tasks
//
// ## Security
//
// - The API key is sent as the `X-Api-Key` header on every request
// - The API key NEVER appears in logs or Debug output
//
// ## API Reference
//
// - PowerDNS API: https://doc.powerdns.com/authoritative/http-api/
// - List keys:   GET    `/zones/:zone/cryptokeys`
// - Create key:  POST   `/zones/:zone/cryptokeys`
// - Toggle key:  PUT    `/zones/:zone/cryptokeys/:id`
// - Remove key:  DELETE `/zones/:zone/cryptokeys/:id`

use async_trait::async_trait;
use keyroller_core::traits::{CryptoKey, ManagementApi, NewKeyRequest};
use keyroller_core::{Error, Result};
use std::time::Duration;

/// Header carrying the shared API secret
const API_KEY_HEADER: &str = "X-Api-Key";

/// PowerDNS management API client
///
/// Stateless and single-shot: every method performs exactly one HTTP
/// request against the configured server and returns the outcome to the
/// engine.
pub struct PowerDnsApi {
    /// Server base URL, e.g. `http://127.0.0.1:8084/api/v1/servers/localhost`
    base_url: String,

    /// Shared secret for the X-Api-Key header; never logged
    api_key: String,

    /// HTTP client with the configured request timeout
    client: reqwest::Client,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for PowerDnsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerDnsApi")
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl PowerDnsApi {
    /// Create a new API client.
    ///
    /// # Parameters
    ///
    /// - `base_url`: server API base URL (no trailing slash required)
    /// - `api_key`: shared secret for the X-Api-Key header
    /// - `timeout`: per-request timeout
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("PowerDNS API key cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute a request with the auth header, mapping transport errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(e.to_string())
                } else {
                    Error::http(format!("HTTP request failed: {}", e))
                }
            })
    }

    /// Map non-2xx responses onto the core error taxonomy.
    async fn check_status(context: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        Err(match status.as_u16() {
            401 | 403 => Error::auth(format!(
                "{}: rejected API key or insufficient permissions (status {})",
                context, status
            )),
            404 => Error::not_found(format!("{}: {}", context, error_text)),
            422 => Error::api(format!(
                "{}: server rejected the request: {} - {}",
                context, status, error_text
            )),
            500..=599 => Error::api(format!(
                "{}: server error (transient): {} - {}",
                context, status, error_text
            )),
            _ => Error::api(format!("{}: {} - {}", context, status, error_text)),
        })
    }
}

#[async_trait]
impl ManagementApi for PowerDnsApi {
    async fn list_keys(&self, zone: &str) -> Result<Vec<CryptoKey>> {
        let url = self.url(&format!("/zones/{}/cryptokeys", zone));
        tracing::debug!("Sending GET request to {}", url);

        let response = self.send(self.client.get(&url)).await?;
        let response =
            Self::check_status(&format!("list keys for zone {}", zone), response).await?;

        response
            .json::<Vec<CryptoKey>>()
            .await
            .map_err(|e| Error::api(format!("Failed to parse cryptokey list: {}", e)))
    }

    async fn create_key(&self, zone: &str, request: &NewKeyRequest) -> Result<CryptoKey> {
        let url = self.url(&format!("/zones/{}/cryptokeys", zone));
        tracing::debug!(
            "Sending POST request to {} (keytype: {}, active: {})",
            url,
            request.keytype,
            request.active
        );

        let response = self.send(self.client.post(&url).json(request)).await?;
        let response =
            Self::check_status(&format!("create key for zone {}", zone), response).await?;

        response
            .json::<CryptoKey>()
            .await
            .map_err(|e| Error::api(format!("Failed to parse created cryptokey: {}", e)))
    }

    async fn set_key_active(&self, zone: &str, key_id: u32, active: bool) -> Result<()> {
        let url = self.url(&format!("/zones/{}/cryptokeys/{}", zone, key_id));
        tracing::debug!("Sending PUT request to {} (active: {})", url, active);

        let payload = serde_json::json!({ "active": active });
        let response = self.send(self.client.put(&url).json(&payload)).await?;
        Self::check_status(
            &format!("set key {} active={} for zone {}", key_id, active, zone),
            response,
        )
        .await?;

        Ok(())
    }

    async fn delete_key(&self, zone: &str, key_id: u32) -> Result<()> {
        let url = self.url(&format!("/zones/{}/cryptokeys/{}", zone, key_id));
        tracing::debug!("Sending DELETE request to {}", url);

        let response = self.send(self.client.delete(&url)).await?;
        Self::check_status(
            &format!("delete key {} for zone {}", key_id, zone),
            response,
        )
        .await?;

        Ok(())
    }

    fn api_name(&self) -> &'static str {
        "powerdns"
    }
}
