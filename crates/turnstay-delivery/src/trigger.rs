//! Producer entry point: build, sign and deliver one event.
//!
//! `WebhookClient::trigger` builds an envelope, serializes it once and runs
//! the retry loop. The body bytes and the event id never change between
//! attempts, so subscribers can deduplicate on the id. Only the signature
//! header may change, depending on [`SigningMode`].

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header::HeaderValue, Url};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use turnstay_core::{validate_event_type, Clock, EventData, EventEnvelope, EventId, RealClock};
use turnstay_signature::{Secret, SignatureHeader, Signer, SIGNATURE_HEADER};

use crate::{
    attempt::{DeliveryAttempt, DeliveryResult},
    client::{
        ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse, Transport,
        EVENT_NAME_HEADER,
    },
    error::{DeliveryError, Result},
    observer::{AttemptObserver, NoOpObserver},
    retry::{RetryContext, RetryDecision, RetryPolicy},
};

/// Path the Turnstay webhook service accepts triggered events on.
pub const DEFAULT_TRIGGER_PATH: &str = "/internal/webhooks/trigger";

/// How the signature timestamp behaves across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// Re-sign every attempt with the current time, so a retry after a long
    /// backoff still falls inside the subscriber's tolerance window.
    #[default]
    Resign,
    /// Sign once and send the same header on every attempt, so every
    /// attempt is byte-identical.
    Idempotent,
}

/// Per-call delivery options.
#[derive(Debug, Clone, Default)]
pub struct TriggerOptions {
    /// Human-readable event name; defaults to the event type.
    pub name: Option<String>,
    /// API version stamped on the envelope.
    pub api_version: Option<String>,
    /// Signature timestamp policy.
    pub signing_mode: SigningMode,
    /// Cancels in-flight sends and backoff sleeps.
    pub cancellation: CancellationToken,
    /// Overall budget for all attempts and backoff.
    pub deadline: Option<Duration>,
}

impl TriggerOptions {
    /// Sets the event name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the envelope API version.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Sets the signing mode.
    #[must_use]
    pub fn with_signing_mode(mut self, signing_mode: SigningMode) -> Self {
        self.signing_mode = signing_mode;
        self
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Client for emitting signed webhook events.
///
/// Cheap to clone; clones share the connection pool. Each `trigger` call is
/// independent.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    base_url: Url,
    client_config: ClientConfig,
    retry_policy: RetryPolicy,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn AttemptObserver>,
}

/// Builder for [`WebhookClient`].
#[derive(Debug, Default)]
pub struct WebhookClientBuilder {
    base_url: Option<String>,
    client_config: ClientConfig,
    retry_policy: RetryPolicy,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl WebhookClientBuilder {
    /// Base URL relative destinations are resolved against. Required.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client_config.timeout = timeout;
        self
    }

    /// Retries after the first attempt.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.retry_policy.max_attempts = max_retries.saturating_add(1);
        self
    }

    /// Base delay for exponential backoff.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_policy.base_delay = delay;
        self
    }

    /// Replaces the whole retry policy.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replaces the HTTP client settings.
    #[must_use]
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    /// Sends through this transport instead of a pooled HTTP client.
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Clock for timestamps and backoff sleeps.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Observer notified of every attempt.
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Validates settings and builds the client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the base URL is
    /// missing or not an absolute http(s) URL, if the retry policy allows
    /// no attempts, or if the HTTP client cannot be built.
    pub fn build(self) -> Result<WebhookClient> {
        let Some(base_url) = self.base_url.filter(|url| !url.trim().is_empty()) else {
            return Err(DeliveryError::configuration("base_url is required"));
        };
        let base_url = parse_http_url(base_url.trim())?;

        if self.retry_policy.max_attempts == 0 {
            return Err(DeliveryError::configuration("retry policy must allow one attempt"));
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(DeliveryClient::new(self.client_config.clone())?),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(RealClock),
        };
        let observer: Arc<dyn AttemptObserver> = match self.observer {
            Some(observer) => observer,
            None => Arc::new(NoOpObserver),
        };

        Ok(WebhookClient {
            base_url,
            client_config: self.client_config,
            retry_policy: self.retry_policy,
            transport,
            clock,
            observer,
        })
    }
}

impl WebhookClient {
    /// Starts building a client.
    pub fn builder() -> WebhookClientBuilder {
        WebhookClientBuilder::default()
    }

    /// Base URL relative destinations resolve against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// HTTP client settings.
    pub fn client_config(&self) -> &ClientConfig {
        &self.client_config
    }

    /// Retry policy applied to every trigger.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Builds, signs and delivers a new event.
    ///
    /// `destination` is either an absolute http(s) URL or a path resolved
    /// against the base URL. The envelope gets a fresh `evt_` id and the
    /// clock's current time as `created`.
    ///
    /// Delivery failures are reported in the returned [`DeliveryResult`];
    /// `Err` means nothing was sent.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for an invalid
    /// destination, an empty secret, a malformed event type or an event name
    /// that cannot be sent as a header.
    pub async fn trigger(
        &self,
        destination: &str,
        event_type: &str,
        data: impl Into<EventData>,
        secret: &Secret,
        options: TriggerOptions,
    ) -> Result<DeliveryResult> {
        let mut envelope = EventEnvelope::new(event_type, data.into(), self.clock.unix_seconds())
            .map_err(|e| DeliveryError::configuration(e.to_string()))?;
        if let Some(api_version) = &options.api_version {
            envelope = envelope.with_api_version(api_version.as_str());
        }

        self.deliver(destination, &envelope, secret, options).await
    }

    /// Signs and delivers an already-built envelope.
    ///
    /// # Errors
    ///
    /// Same as [`WebhookClient::trigger`].
    pub async fn deliver(
        &self,
        destination: &str,
        envelope: &EventEnvelope,
        secret: &Secret,
        options: TriggerOptions,
    ) -> Result<DeliveryResult> {
        let url = self.resolve_destination(destination)?;
        validate_event_type(&envelope.event_type)
            .map_err(|e| DeliveryError::configuration(e.to_string()))?;
        let signer =
            Signer::new(secret.clone()).map_err(|e| DeliveryError::configuration(e.to_string()))?;
        let body = Bytes::from(envelope.to_json_bytes().map_err(|e| {
            DeliveryError::internal(format!("failed to serialize envelope: {e}"))
        })?);
        let name = options.name.clone().unwrap_or_else(|| envelope.event_type.clone());
        if HeaderValue::from_str(&name).is_err() {
            return Err(DeliveryError::configuration(format!(
                "event name {name:?} is not a valid header value"
            )));
        }

        let delivery =
            Delivery { event_id: &envelope.id, url: &url, body, name, options: &options };
        self.run(&delivery, &signer).await
    }

    /// Resolves a destination against the base URL.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` unless the result is an
    /// absolute http(s) URL.
    pub fn resolve_destination(&self, destination: &str) -> Result<Url> {
        let destination = destination.trim();
        match Url::parse(destination) {
            Ok(_) => parse_http_url(destination),
            Err(_) => {
                let url = self.base_url.join(destination).map_err(|e| {
                    DeliveryError::configuration(format!("invalid destination: {e}"))
                })?;
                parse_http_url(url.as_str())
            },
        }
    }

    async fn run(&self, delivery: &Delivery<'_>, signer: &Signer) -> Result<DeliveryResult> {
        let started = self.clock.now();
        let options = delivery.options;
        let mut attempts = Vec::new();
        let mut last_error = None;

        let fixed_header = match options.signing_mode {
            SigningMode::Idempotent => {
                Some(signer.header(self.clock.unix_seconds(), &delivery.body)?)
            },
            SigningMode::Resign => None,
        };

        for attempt_number in 1.. {
            if let Some(reason) = self.stop_reason(options, started) {
                last_error = Some(DeliveryError::cancelled(reason));
                break;
            }

            let header = match &fixed_header {
                Some(header) => header.clone(),
                None => signer.header(self.clock.unix_seconds(), &delivery.body)?,
            };

            let span = info_span!(
                "webhook_delivery",
                event_id = %delivery.event_id,
                attempt = attempt_number,
                url = %delivery.url
            );
            let (attempt, outcome) = self
                .attempt_once(delivery, attempt_number, header, started)
                .instrument(span)
                .await;
            attempts.push(attempt);

            let error = match outcome {
                Ok(response) => {
                    return Ok(DeliveryResult {
                        event_id: delivery.event_id.clone(),
                        success: true,
                        attempts,
                        last_error: None,
                        response: Some(response),
                    });
                },
                Err(error) => error,
            };

            if matches!(error, DeliveryError::Cancelled { .. }) {
                last_error = Some(error);
                break;
            }

            match RetryContext::new(attempt_number, &error, &self.retry_policy).decide_retry() {
                RetryDecision::Retry { delay } => {
                    if self.remaining(options, started).is_some_and(|left| left < delay) {
                        warn!(
                            event_id = %delivery.event_id,
                            attempt = attempt_number,
                            error = %error,
                            "deadline leaves no room for another attempt"
                        );
                        last_error = Some(DeliveryError::cancelled("deadline exceeded"));
                        break;
                    }

                    warn!(
                        event_id = %delivery.event_id,
                        attempt = attempt_number,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "delivery attempt failed, retrying"
                    );
                    last_error = Some(error);

                    tokio::select! {
                        biased;
                        () = options.cancellation.cancelled() => {
                            last_error = Some(DeliveryError::cancelled("cancellation requested"));
                            break;
                        },
                        () = self.clock.sleep(delay) => {},
                    }
                },
                RetryDecision::GiveUp { reason } => {
                    warn!(
                        event_id = %delivery.event_id,
                        attempt = attempt_number,
                        error = %error,
                        reason = %reason,
                        "delivery failed"
                    );
                    last_error = Some(error);
                    break;
                },
            }
        }

        Ok(DeliveryResult {
            event_id: delivery.event_id.clone(),
            success: false,
            attempts,
            last_error,
            response: None,
        })
    }

    async fn attempt_once(
        &self,
        delivery: &Delivery<'_>,
        attempt_number: u32,
        header: SignatureHeader,
        started: Instant,
    ) -> (DeliveryAttempt, Result<DeliveryResponse>) {
        let sent_at = DateTime::<Utc>::from(self.clock.now_system());
        let mut attempt = DeliveryAttempt::pending(attempt_number, sent_at, header.timestamp);
        self.observer.attempt_started(delivery.event_id, &attempt).await;

        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), header.to_string());
        headers.insert(EVENT_NAME_HEADER.to_string(), delivery.name.clone());

        let request = DeliveryRequest {
            event_id: delivery.event_id.clone(),
            url: delivery.url.to_string(),
            headers,
            body: delivery.body.clone(),
            attempt_number,
        };

        let timer = Instant::now();
        let outcome = self
            .send(request, delivery.options, started)
            .await
            .and_then(|response| {
                let now = DateTime::<Utc>::from(self.clock.now_system());
                response.classify(now).map(|()| response)
            });

        match outcome {
            Ok(response) => {
                attempt.succeed(response.status_code, response.duration);
                info!(status = response.status_code, "webhook delivered");
                self.observer.attempt_finished(delivery.event_id, &attempt).await;
                (attempt, Ok(response))
            },
            Err(error) => {
                attempt.fail(&error, timer.elapsed());
                self.observer.attempt_finished(delivery.event_id, &attempt).await;
                (attempt, Err(error))
            },
        }
    }

    /// Sends one request, racing it against cancellation and the deadline.
    async fn send(
        &self,
        request: DeliveryRequest,
        options: &TriggerOptions,
        started: Instant,
    ) -> Result<DeliveryResponse> {
        let remaining = self.remaining(options, started);
        let send = async {
            match remaining {
                Some(left) => tokio::time::timeout(left, self.transport.send(request))
                    .await
                    .unwrap_or_else(|_| Err(DeliveryError::cancelled("deadline exceeded"))),
                None => self.transport.send(request).await,
            }
        };

        tokio::select! {
            biased;
            () = options.cancellation.cancelled() => {
                Err(DeliveryError::cancelled("cancellation requested"))
            },
            result = send => result,
        }
    }

    fn remaining(&self, options: &TriggerOptions, started: Instant) -> Option<Duration> {
        let elapsed = self.clock.now().saturating_duration_since(started);
        options.deadline.map(|deadline| deadline.saturating_sub(elapsed))
    }

    fn stop_reason(&self, options: &TriggerOptions, started: Instant) -> Option<&'static str> {
        if options.cancellation.is_cancelled() {
            return Some("cancellation requested");
        }
        if self.remaining(options, started).is_some_and(|left| left.is_zero()) {
            return Some("deadline exceeded");
        }
        None
    }
}

/// Everything fixed for the lifetime of one trigger.
struct Delivery<'a> {
    event_id: &'a EventId,
    url: &'a Url,
    body: Bytes,
    name: String,
    options: &'a TriggerOptions,
}

fn parse_http_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| DeliveryError::configuration(format!("invalid URL {raw:?}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(DeliveryError::configuration(format!(
            "URL {raw:?} must be absolute http(s)"
        )));
    }
    Ok(url)
}
