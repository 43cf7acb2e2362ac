//! Scripted transport for deterministic delivery tests.
//!
//! Plays back a fixed list of outcomes without touching the network, and
//! records every request it was asked to send.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use turnstay_delivery::{DeliveryError, DeliveryRequest, DeliveryResponse, Transport};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    /// Answer with this status and headers.
    Respond {
        /// Status code.
        status: u16,
        /// Response headers, lowercase names.
        headers: HashMap<String, String>,
    },
    /// Fail before any response arrives.
    Fail(DeliveryError),
    /// Never answer.
    Hang,
}

impl ScriptedOutcome {
    /// Answer with a bare status code.
    pub fn status(status: u16) -> Self {
        Self::Respond { status, headers: HashMap::new() }
    }

    /// Answer 429 with a Retry-After header.
    pub fn rate_limited(retry_after: impl Into<String>) -> Self {
        let headers = HashMap::from([("retry-after".to_string(), retry_after.into())]);
        Self::Respond { status: 429, headers }
    }

    /// Fail with a network error.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::Fail(DeliveryError::network(message))
    }
}

/// Transport that replays scripted outcomes in order.
///
/// Once the script runs out the last outcome repeats. An empty script
/// answers 200.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    last: Arc<Mutex<Option<ScriptedOutcome>>>,
    requests: Arc<Mutex<Vec<DeliveryRequest>>>,
}

impl ScriptedTransport {
    /// Creates a transport that plays back `outcomes`.
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            script: Arc::new(Mutex::new(outcomes.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Creates a transport that answers with these status codes in order.
    pub fn statuses(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self::new(statuses.into_iter().map(ScriptedOutcome::status))
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let mut last = self.last.lock().unwrap();
        if let Some(outcome) = self.script.lock().unwrap().pop_front() {
            *last = Some(outcome);
        }
        last.clone().unwrap_or_else(|| ScriptedOutcome::status(200))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: DeliveryRequest) -> turnstay_delivery::Result<DeliveryResponse> {
        self.requests.lock().unwrap().push(request);

        match self.next_outcome() {
            ScriptedOutcome::Respond { status, headers } => Ok(DeliveryResponse {
                status_code: status,
                headers,
                body: String::new(),
                duration: Duration::from_millis(1),
            }),
            ScriptedOutcome::Fail(error) => Err(error),
            ScriptedOutcome::Hang => std::future::pending().await,
        }
    }
}
