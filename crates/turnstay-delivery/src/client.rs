//! HTTP transport for webhook delivery.
//!
//! [`Transport`] is the seam between the retry loop and the network: it
//! sends one request and reports what came back. [`DeliveryClient`] is the
//! production implementation on a pooled `reqwest::Client`. Tests swap in a
//! scripted transport.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderMap, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use turnstay_core::EventId;

use crate::error::{DeliveryError, Result};

/// Header carrying the event id, stable across attempts.
pub const EVENT_ID_HEADER: &str = "Turnstay-Event-Id";

/// Header carrying the 1-based attempt number.
pub const DELIVERY_ATTEMPT_HEADER: &str = "Turnstay-Delivery-Attempt";

/// Header carrying the human-readable event name.
pub const EVENT_NAME_HEADER: &str = "Turnstay-Event-Name";

const MAX_RESPONSE_BODY_SIZE: usize = 64 * 1024;
const MAX_ERROR_BODY_SIZE: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single HTTP request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Idle connections kept per destination host.
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept.
    pub pool_idle_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            user_agent: format!("Turnstay-Webhooks/{}", env!("CARGO_PKG_VERSION")),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// One signed request ready to send.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Event being delivered.
    pub event_id: EventId,
    /// Destination URL.
    pub url: String,
    /// Extra headers such as the signature.
    pub headers: HashMap<String, String>,
    /// Serialized envelope, identical on every attempt.
    pub body: Bytes,
    /// Attempt number for this delivery (1-based).
    pub attempt_number: u32,
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

impl DeliveryResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }

    /// Maps a non-2xx response onto the delivery error it represents.
    ///
    /// # Errors
    ///
    /// - `RateLimited` for 429, carrying any Retry-After value
    /// - `ServerError` for 5xx
    /// - `ClientError` for other 4xx
    /// - `UnexpectedStatus` for 1xx and 3xx
    pub fn classify(&self, now: DateTime<Utc>) -> Result<()> {
        let body = truncate(&self.body, MAX_ERROR_BODY_SIZE);
        match self.status_code {
            200..=299 => Ok(()),
            429 => {
                let retry_after = extract_retry_after_seconds(&self.headers, now);
                Err(DeliveryError::rate_limited(retry_after))
            },
            500..=599 => Err(DeliveryError::server_error(self.status_code, body)),
            400..=499 => Err(DeliveryError::client_error(self.status_code, body)),
            status => Err(DeliveryError::unexpected_status(status)),
        }
    }
}

/// Sends one delivery request.
///
/// Implementations return `Ok` for any HTTP response, including errors,
/// and `Err` only when no response arrived (network failure, timeout).
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Sends the request and waits for the response.
    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse>;
}

/// HTTP client for webhook delivery.
///
/// Clones share one connection pool. Redirects are not followed: a 3xx from
/// a subscriber is reported, not chased.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(DeliveryError::configuration("request timeout must be positive"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    ///
    /// # Errors
    ///
    /// Same as [`DeliveryClient::new`].
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a webhook to its destination.
    ///
    /// # Errors
    ///
    /// - `Timeout` if no response arrived within the request timeout
    /// - `ConfigurationError` if the request itself cannot be built
    /// - `NetworkError` for connection and protocol failures
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = std::time::Instant::now();

        let mut http_request = self
            .client
            .post(&request.url)
            .body(request.body.clone())
            .header("content-type", "application/json");

        for (key, value) in &request.headers {
            if !is_managed_header(key) {
                http_request = http_request.header(key, value);
            }
        }

        http_request = http_request
            .header(EVENT_ID_HEADER, request.event_id.as_str())
            .header(DELIVERY_ATTEMPT_HEADER, request.attempt_number.to_string());

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) => {
                let duration = start_time.elapsed();
                warn!(duration_ms = duration.as_millis(), error = %e, "request failed");

                if e.is_builder() {
                    return Err(DeliveryError::configuration(format!("invalid request: {e}")));
                }
                if e.is_timeout() {
                    return Err(DeliveryError::timeout(duration_ms(self.config.timeout)));
                }
                if e.is_connect() {
                    return Err(DeliveryError::network(format!("connection failed: {e}")));
                }
                return Err(DeliveryError::network(e.to_string()));
            },
        };

        let duration = start_time.elapsed();
        debug!(
            status = response.status().as_u16(),
            duration_ms = duration.as_millis(),
            "received response"
        );

        Ok(read_response(response, duration).await)
    }
}

#[async_trait]
impl Transport for DeliveryClient {
    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        self.deliver(request).await
    }
}

async fn read_response(response: Response, duration: Duration) -> DeliveryResponse {
    let status_code = response.status().as_u16();
    let headers = extract_headers(response.headers());

    let body = match response.bytes().await {
        Ok(bytes) => {
            let limit = bytes.len().min(MAX_RESPONSE_BODY_SIZE);
            truncate(&String::from_utf8_lossy(&bytes[..limit]), MAX_RESPONSE_BODY_SIZE)
        },
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            format!("[failed to read response body: {e}]")
        },
    };

    DeliveryResponse { status_code, headers, body, duration }
}

/// Extracts headers from reqwest HeaderMap into a standard HashMap.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for (key, value) in header_map {
        if let Ok(value_str) = value.to_str() {
            headers.insert(key.as_str().to_ascii_lowercase(), value_str.to_string());
        }
    }

    headers
}

/// Checks if a header is owned by the client and must not be overridden
/// by request headers.
fn is_managed_header(header_name: &str) -> bool {
    let lowercase = header_name.to_lowercase();
    matches!(
        lowercase.as_str(),
        "content-length"
            | "content-type"
            | "host"
            | "user-agent"
            | "connection"
            | "keep-alive"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "turnstay-event-id"
            | "turnstay-delivery-attempt"
    )
}

/// Extracts the Retry-After delay from response headers.
///
/// Supports both delta-seconds and HTTP-date formats. Returns `None` when
/// the header is absent, unparseable, or names a time already passed.
pub fn extract_retry_after_seconds<S: std::hash::BuildHasher>(
    headers: &HashMap<String, String, S>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let retry_after = headers.get("retry-after").or_else(|| headers.get("Retry-After"))?;
    let retry_after = retry_after.trim();

    if let Ok(seconds) = retry_after.parse::<u64>() {
        return Some(seconds);
    }

    let retry_time = DateTime::parse_from_rfc2822(retry_after).ok()?.with_timezone(&Utc);
    retry_time.signed_duration_since(now).to_std().ok().map(|d| d.as_secs())
}

fn truncate(body: &str, max: usize) -> String {
    const SUFFIX: &str = "... (truncated)";

    if body.len() <= max {
        return body.to_string();
    }

    let mut end = max.saturating_sub(SUFFIX.len());
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{SUFFIX}", &body[..end])
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
