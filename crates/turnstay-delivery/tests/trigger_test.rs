//! End-to-end delivery tests against a mock subscriber.
//!
//! Every test drives the real HTTP client against wiremock. Backoff runs on
//! a `TestClock`, so retry schedules complete instantly and can be asserted
//! exactly.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use http::StatusCode;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use turnstay_core::Clock;
use turnstay_delivery::{
    AttemptOutcome, ClientConfig, DeliveryError, RetryPolicy, SigningMode, TriggerOptions,
    WebhookClient,
};
use turnstay_signature::{Secret, Tolerance, Verifier};
use turnstay_testing::{MockEndpoint, MockServer, TestClock};

const NOW: u64 = 1_700_000_000;
const SECRET: &str = "whsec_trigger_test";
const EVENT_TYPE: &str = "payment_intent.succeeded";

fn client(server: &MockServer, clock: &TestClock, policy: RetryPolicy) -> WebhookClient {
    WebhookClient::builder()
        .base_url(server.url())
        .retry_policy(policy)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("client should build")
}

fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::with_retries(max_retries, Duration::from_millis(10)).without_jitter()
}

fn payload() -> serde_json::Value {
    json!({"id": "pi_example_123", "amount": 1000, "currency": "usd"})
}

#[tokio::test]
async fn retries_server_errors_until_success() {
    let server = MockServer::start().await;
    server
        .mock_sequence()
        .respond_with(500)
        .respond_with(500)
        .respond_with(200)
        .build("/hook")
        .await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.attempt_count(), 3);
    assert_eq!(
        result.attempts.iter().map(|a| a.outcome).collect::<Vec<_>>(),
        vec![AttemptOutcome::Retryable, AttemptOutcome::Retryable, AttemptOutcome::Success]
    );
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_millis(10), Duration::from_millis(20)]);

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), 3);
    for (index, request) in requests.iter().enumerate() {
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, requests[0].body);
        assert_eq!(request.event_id(), Some(result.event_id.as_str()));
        assert_eq!(request.attempt_number(), Some(u32::try_from(index).unwrap() + 1));
        assert_eq!(request.header("content-type"), Some("application/json"));
    }
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::failure("/hook", StatusCode::BAD_REQUEST)).await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Terminal);
    assert_eq!(result.attempts[0].http_status, Some(400));
    assert!(matches!(
        result.last_error,
        Some(DeliveryError::ClientError { status_code: 400, .. })
    ));
    assert!(clock.recorded_sleeps().is_empty());
    server.assert_request_count(1).await;
}

#[tokio::test]
async fn exhausted_retries_report_attempt_count() {
    let server = MockServer::start().await;
    server.mock_endpoint_always_fail(503).await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(2))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempt_count(), 3);
    assert_eq!(result.into_result(), Err(DeliveryError::retries_exhausted(3)));
    server.assert_request_count(3).await;
}

#[tokio::test]
async fn rate_limit_honours_retry_after() {
    let server = MockServer::start().await;
    server.mock_sequence().respond_rate_limited("7").respond_with(200).build("/hook").await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.attempts[0].http_status, Some(429));
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(7)]);
}

#[tokio::test]
async fn retry_after_is_capped_by_max_delay() {
    let server = MockServer::start().await;
    server.mock_sequence().respond_rate_limited("3600").respond_with(200).build("/hook").await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(30)]);
}

#[tokio::test]
async fn delivered_request_verifies_at_subscriber() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let options = TriggerOptions::default().with_api_version("2026-01-01");
    let result = client(&server, &clock, fast_retries(0))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options)
        .await
        .unwrap();
    assert!(result.success);

    let verifier = Verifier::new(vec![Secret::from("whsec_rotated"), Secret::from(SECRET)])
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    let request = &server.received_requests().await[0];
    let event = request.verify(&verifier).expect("subscriber should accept the delivery");

    assert_eq!(event.id, result.event_id);
    assert_eq!(event.event_type, EVENT_TYPE);
    assert_eq!(event.created, clock.unix_seconds());
    assert_eq!(event.api_version.as_deref(), Some("2026-01-01"));
    assert_eq!(event.data.object, payload());
    assert_eq!(request.event_name(), Some(EVENT_TYPE));
    assert_eq!(request.signature_timestamp(), Some(clock.unix_seconds()));

    let wrong = Verifier::new(vec![Secret::from("whsec_other")]).unwrap();
    assert!(request.verify(&wrong.with_tolerance(Tolerance::Disabled)).is_err());
}

#[tokio::test]
async fn custom_event_name_is_sent() {
    let server = MockServer::start().await;
    server
        .mock_endpoint(
            MockEndpoint::success("/hook").with_header("Turnstay-Event-Name", "Payment captured"),
        )
        .await;
    let clock = TestClock::at_unix(NOW);

    let options = TriggerOptions::default().with_name("Payment captured");
    let result = client(&server, &clock, fast_retries(0))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options)
        .await
        .unwrap();

    assert!(result.success);
}

#[tokio::test]
async fn resign_mode_refreshes_timestamp_per_attempt() {
    let server = MockServer::start().await;
    server.mock_sequence().respond_with(503).respond_with(200).build("/hook").await;
    let clock = TestClock::at_unix(NOW);
    let policy = RetryPolicy::with_retries(1, Duration::from_secs(2)).without_jitter();

    let result = client(&server, &clock, policy)
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();
    assert!(result.success);

    let requests = server.received_requests().await;
    let first = requests[0].signature_timestamp().unwrap();
    let second = requests[1].signature_timestamp().unwrap();
    assert_eq!(second - first, 2);
    assert_eq!(result.attempts[1].signature_timestamp, second);
    assert_ne!(requests[0].signature(), requests[1].signature());
}

#[tokio::test]
async fn idempotent_mode_sends_identical_requests() {
    let server = MockServer::start().await;
    server.mock_sequence().respond_with(503).respond_with(200).build("/hook").await;
    let clock = TestClock::at_unix(NOW);
    let policy = RetryPolicy::with_retries(1, Duration::from_secs(2)).without_jitter();

    let options = TriggerOptions::default().with_signing_mode(SigningMode::Idempotent);
    let result = client(&server, &clock, policy)
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options)
        .await
        .unwrap();
    assert!(result.success);

    let requests = server.received_requests().await;
    assert_eq!(requests[0].signature(), requests[1].signature());
    assert_eq!(requests[0].body, requests[1].body);
    assert_eq!(requests[0].signature_timestamp(), Some(i64::try_from(NOW).unwrap()));
}

#[tokio::test]
async fn network_errors_are_retried() {
    let clock = TestClock::at_unix(NOW);
    let client = WebhookClient::builder()
        .base_url("http://127.0.0.1:1")
        .retry_policy(fast_retries(2))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    let result = client
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 3);
    assert!(matches!(result.last_error, Some(DeliveryError::NetworkError { .. })));
    assert_eq!(clock.recorded_sleeps().len(), 2);
}

#[tokio::test]
async fn request_timeout_is_retryable() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::hanging("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let client = WebhookClient::builder()
        .base_url(server.url())
        .client_config(ClientConfig { timeout: Duration::from_millis(100), ..Default::default() })
        .retry_policy(RetryPolicy::no_retries())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

    let result = client
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Retryable);
    assert_eq!(result.last_error, Some(DeliveryError::timeout(100)));
}

#[tokio::test]
async fn cancellation_stops_in_flight_delivery() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::hanging("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let options = TriggerOptions::default().with_cancellation(token);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client(&server, &clock, fast_retries(3)).trigger(
            "/hook",
            EVENT_TYPE,
            payload(),
            &Secret::from(SECRET),
            options,
        ),
    )
    .await
    .expect("cancellation should interrupt the request")
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Cancelled);
    assert!(matches!(result.last_error, Some(DeliveryError::Cancelled { .. })));
}

#[tokio::test]
async fn cancelled_before_start_sends_nothing() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let token = CancellationToken::new();
    token.cancel();

    let result = client(&server, &clock, fast_retries(3))
        .trigger(
            "/hook",
            EVENT_TYPE,
            payload(),
            &Secret::from(SECRET),
            TriggerOptions::default().with_cancellation(token),
        )
        .await
        .unwrap();

    assert!(result.attempts.is_empty());
    assert_eq!(result.last_error, Some(DeliveryError::cancelled("cancellation requested")));
    server.assert_request_count(0).await;
}

#[tokio::test]
async fn deadline_bounds_a_hanging_subscriber() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::hanging("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let options = TriggerOptions::default().with_deadline(Duration::from_millis(100));
    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options)
        .await
        .unwrap();

    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.last_error, Some(DeliveryError::cancelled("deadline exceeded")));
}

#[tokio::test]
async fn configuration_errors_fail_before_sending() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;
    let clock = TestClock::at_unix(NOW);
    let client = client(&server, &clock, fast_retries(3));

    let empty_secret = client
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(""), TriggerOptions::default())
        .await;
    assert!(matches!(empty_secret, Err(DeliveryError::ConfigurationError { .. })));

    let bad_type = client
        .trigger("/hook", "PaymentSucceeded", payload(), &Secret::from(SECRET), Default::default())
        .await;
    assert!(matches!(bad_type, Err(DeliveryError::ConfigurationError { .. })));

    let bad_destination = client
        .trigger(
            "ftp://example.com/hook",
            EVENT_TYPE,
            payload(),
            &Secret::from(SECRET),
            Default::default(),
        )
        .await;
    assert!(matches!(bad_destination, Err(DeliveryError::ConfigurationError { .. })));

    server.assert_request_count(0).await;
}

#[tokio::test]
async fn invalid_event_name_fails_before_sending() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let options = TriggerOptions::default().with_name("bad\nname");
    let result = client(&server, &clock, fast_retries(3))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options)
        .await;

    assert!(matches!(result, Err(DeliveryError::ConfigurationError { .. })), "got {result:?}");
    assert!(clock.recorded_sleeps().is_empty());
    server.assert_request_count(0).await;
}

#[tokio::test]
async fn subscriber_response_is_returned() {
    let server = MockServer::start().await;
    server
        .mock_endpoint(
            MockEndpoint::success("/hook").with_body(r#"{"status":"queued","webhook_id":"wh_1"}"#),
        )
        .await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(0))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    let response = result.response.expect("successful delivery keeps the response");
    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, r#"{"status":"queued","webhook_id":"wh_1"}"#);
}

#[tokio::test]
async fn failed_delivery_has_no_response() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::failure("/hook", StatusCode::BAD_REQUEST)).await;
    let clock = TestClock::at_unix(NOW);

    let result = client(&server, &clock, fast_retries(0))
        .trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.response.is_none());
}

#[tokio::test]
async fn data_object_payload_is_not_nested() {
    let server = MockServer::start().await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;
    let clock = TestClock::at_unix(NOW);

    let data = json!({
        "object": {
            "id": "pi_example_123",
            "amount": 5000,
            "currency": "usd",
            "status": "succeeded",
        }
    });
    let result = client(&server, &clock, fast_retries(0))
        .trigger("/hook", EVENT_TYPE, data, &Secret::from(SECRET), TriggerOptions::default())
        .await
        .unwrap();
    assert!(result.success);

    let body = server.received_requests().await[0].json_body();
    assert_eq!(body["data"]["object"]["id"], "pi_example_123");
    assert_eq!(body["data"]["object"]["amount"], 5000);
    assert!(body["data"]["object"].get("object").is_none());
}

#[tokio::test]
async fn cancellation_interrupts_backoff_sleep() {
    let server = MockServer::start().await;
    server.mock_endpoint_always_fail(503).await;

    let client = WebhookClient::builder()
        .base_url(server.url())
        .retry_policy(RetryPolicy::with_retries(3, Duration::from_secs(10)).without_jitter())
        .build()
        .unwrap();

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let options = TriggerOptions::default().with_cancellation(token);
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.trigger("/hook", EVENT_TYPE, payload(), &Secret::from(SECRET), options),
    )
    .await
    .expect("cancellation should cut the backoff short")
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(result.attempt_count(), 1);
    assert_eq!(result.attempts[0].outcome, AttemptOutcome::Retryable);
    assert_eq!(result.last_error, Some(DeliveryError::cancelled("cancellation requested")));
    server.assert_request_count(1).await;
}

#[tokio::test]
async fn concurrent_triggers_share_one_client() {
    const CALLS: usize = 8;
    const FAILURES: usize = 3;

    let server = MockServer::start().await;
    let mut sequence = server.mock_sequence();
    for _ in 0..FAILURES {
        sequence = sequence.respond_with(503);
    }
    sequence.build("/hook").await;
    server.mock_endpoint(MockEndpoint::success("/hook")).await;

    let clock = TestClock::at_unix(NOW);
    let client = client(&server, &clock, fast_retries(3));
    let secret = Secret::from(SECRET);

    let results = join_all((0..CALLS).map(|_| {
        client.trigger("/hook", EVENT_TYPE, payload(), &secret, TriggerOptions::default())
    }))
    .await;
    let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();

    let ids: HashSet<_> = results.iter().map(|r| r.event_id.as_str().to_string()).collect();
    assert_eq!(ids.len(), CALLS);

    let mut total_attempts = 0;
    for result in &results {
        assert!(result.success);
        let numbers: Vec<u32> = result.attempts.iter().map(|a| a.attempt_number).collect();
        let expected: Vec<u32> = (1..=result.attempt_count()).collect();
        assert_eq!(numbers, expected);
        assert_eq!(result.attempts.last().map(|a| a.outcome), Some(AttemptOutcome::Success));
        total_attempts += result.attempts.len();
    }
    assert_eq!(total_attempts, CALLS + FAILURES);

    let requests = server.received_requests().await;
    assert_eq!(requests.len(), CALLS + FAILURES);
    for request in &requests {
        assert!(ids.contains(request.event_id().unwrap()));
    }
}
