//! HTTP mocking utilities for webhook subscribers.

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use turnstay_core::EventEnvelope;
use turnstay_delivery::{DELIVERY_ATTEMPT_HEADER, EVENT_ID_HEADER, EVENT_NAME_HEADER};
use turnstay_signature::{Verifier, SIGNATURE_HEADER};
use wiremock::{
    matchers::{method, path},
    Match, Mock, MockServer as WiremockServer, Request, ResponseTemplate,
};

/// Delay used to simulate a subscriber that never answers in time.
const HANG_DELAY: Duration = Duration::from_secs(35);

/// Mock webhook subscriber.
///
/// Every request is recorded by the underlying wiremock server, so tests
/// can inspect and verify exactly what was sent.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the absolute URL for a path on this server.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Configures an endpoint to return a specific response.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) {
        let mut mock = Mock::given(method("POST")).and(path(endpoint.path.clone()));

        for (key, value) in &endpoint.expected_headers {
            mock = mock.and(RawHeaderMatcher { name: key.clone(), value: value.clone() });
        }

        mock.respond_with(endpoint.response.into_template()).mount(&self.server).await;
    }

    /// Creates a builder for responses served once each, in order.
    pub fn mock_sequence(&self) -> MockSequenceBuilder<'_> {
        MockSequenceBuilder { server: &self.server, responses: Vec::new() }
    }

    /// Configures every POST to fail with the given status code.
    pub async fn mock_endpoint_always_fail(&self, status: u16) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Returns all requests received by the server, in arrival order.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Asserts that exactly n requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Matches a header against its whole raw value.
///
/// wiremock's `header` matcher splits values on commas, which never matches a
/// `t=..,v1=..` signature header.
struct RawHeaderMatcher {
    name: String,
    value: String,
}

impl Match for RawHeaderMatcher {
    fn matches(&self, request: &Request) -> bool {
        request
            .headers
            .get(self.name.as_str())
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == self.value)
    }
}

/// Configuration for a mock endpoint.
pub struct MockEndpoint {
    /// Request path to match.
    pub path: String,
    /// Headers the request must carry.
    pub expected_headers: Vec<(String, String)>,
    /// Response to serve.
    pub response: MockResponse,
}

impl MockEndpoint {
    /// Creates a mock endpoint that returns 200.
    pub fn success(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_headers: Vec::new(),
            response: MockResponse::Success { status: StatusCode::OK, body: Bytes::new() },
        }
    }

    /// Creates a mock endpoint that returns a failure.
    pub fn failure(path: impl Into<String>, status: StatusCode) -> Self {
        Self {
            path: path.into(),
            expected_headers: Vec::new(),
            response: MockResponse::Failure { status, retry_after: None },
        }
    }

    /// Creates a mock endpoint that answers too late for any sane timeout.
    pub fn hanging(path: impl Into<String>) -> Self {
        Self { path: path.into(), expected_headers: Vec::new(), response: MockResponse::Timeout }
    }

    /// Adds an expected header to the mock.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_headers.push((key.into(), value.into()));
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        if let MockResponse::Success { status, .. } = self.response {
            self.response = MockResponse::Success { status, body: body.into() };
        }
        self
    }

    /// Sets a Retry-After header on a failure response.
    #[must_use]
    pub fn with_retry_after(mut self, retry_after: impl Into<String>) -> Self {
        if let MockResponse::Failure { status, .. } = self.response {
            let retry_after = Some(retry_after.into());
            self.response = MockResponse::Failure { status, retry_after };
        }
        self
    }
}

/// Types of mock responses.
pub enum MockResponse {
    /// Success with a body.
    Success {
        /// Status code.
        status: StatusCode,
        /// Response body.
        body: Bytes,
    },
    /// Failure with an optional raw Retry-After value.
    Failure {
        /// Status code.
        status: StatusCode,
        /// Retry-After header value, seconds or an HTTP date.
        retry_after: Option<String>,
    },
    /// Answer after the given delay.
    Delayed {
        /// Status code.
        status: StatusCode,
        /// How long to wait before answering.
        delay: Duration,
    },
    /// Never answer in time.
    Timeout,
}

impl MockResponse {
    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } => {
                ResponseTemplate::new(status.as_u16()).set_body_bytes(body)
            },
            Self::Failure { status, retry_after } => {
                let mut response = ResponseTemplate::new(status.as_u16());
                if let Some(value) = retry_after {
                    response = response.insert_header("Retry-After", value.as_str());
                }
                response
            },
            Self::Delayed { status, delay } => {
                ResponseTemplate::new(status.as_u16()).set_delay(delay)
            },
            Self::Timeout => ResponseTemplate::new(StatusCode::OK.as_u16()).set_delay(HANG_DELAY),
        }
    }
}

/// Builder for mock response sequences.
pub struct MockSequenceBuilder<'a> {
    server: &'a WiremockServer,
    responses: Vec<MockResponse>,
}

impl MockSequenceBuilder<'_> {
    /// Adds a response with the given status code.
    #[must_use]
    pub fn respond_with(mut self, status: u16) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.responses.push(if status.is_success() {
            MockResponse::Success { status, body: Bytes::new() }
        } else {
            MockResponse::Failure { status, retry_after: None }
        });
        self
    }

    /// Adds a 429 with the given Retry-After value.
    #[must_use]
    pub fn respond_rate_limited(mut self, retry_after: impl Into<String>) -> Self {
        self.responses.push(MockResponse::Failure {
            status: StatusCode::TOO_MANY_REQUESTS,
            retry_after: Some(retry_after.into()),
        });
        self
    }

    /// Adds an arbitrary response.
    #[must_use]
    pub fn respond(mut self, response: MockResponse) -> Self {
        self.responses.push(response);
        self
    }

    /// Mounts the sequence on `path`.
    ///
    /// Each response is served once; requests past the end of the sequence
    /// get 404.
    pub async fn build(self, path_str: &str) {
        for response in self.responses {
            Mock::given(method("POST"))
                .and(path(path_str))
                .respond_with(response.into_template())
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

/// A request received by the mock subscriber.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the signature header.
    pub fn signature(&self) -> Option<&str> {
        self.header(SIGNATURE_HEADER)
    }

    /// Returns the event id header.
    pub fn event_id(&self) -> Option<&str> {
        self.header(EVENT_ID_HEADER)
    }

    /// Returns the event name header.
    pub fn event_name(&self) -> Option<&str> {
        self.header(EVENT_NAME_HEADER)
    }

    /// Returns the delivery attempt header.
    pub fn attempt_number(&self) -> Option<u32> {
        self.header(DELIVERY_ATTEMPT_HEADER).and_then(|value| value.parse().ok())
    }

    /// Timestamp signed into the signature header.
    pub fn signature_timestamp(&self) -> Option<i64> {
        self.signature()?
            .split(',')
            .find_map(|part| part.trim().strip_prefix("t="))
            .and_then(|value| value.parse().ok())
    }

    /// Parses the body as JSON.
    pub fn json_body(&self) -> Value {
        serde_json::from_slice(&self.body).expect("Failed to parse request body as JSON")
    }

    /// Verifies the request the way a subscriber would.
    pub fn verify(&self, verifier: &Verifier) -> turnstay_signature::Result<EventEnvelope> {
        verifier.construct_from(&self.body, self.signature().unwrap_or_default())
    }
}
