//! Event envelope model and strongly-typed identifiers.
//!
//! The envelope is the JSON document a producer serializes once, signs, and
//! sends as the request body. Subscribers get it back only after the
//! signature over the raw body has been checked. The `data.object` payload is
//! opaque here: it is carried through unmodified and never interpreted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Value of the `object` discriminator on every envelope.
pub const EVENT_OBJECT: &str = "event";

/// Prefix for generated event identifiers.
const EVENT_ID_PREFIX: &str = "evt_";

/// Maximum accepted length of an event type string.
const MAX_EVENT_TYPE_LEN: usize = 128;

/// Strongly-typed event identifier.
///
/// Producers generate identifiers of the form `evt_<32 hex chars>`. Received
/// envelopes may carry any string, since the identifier is chosen by the
/// sender and only used for deduplication.
///
/// # Example
///
/// ```
/// use turnstay_core::EventId;
///
/// let id = EventId::generate();
/// assert!(id.as_str().starts_with("evt_"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Creates a new random event ID backed by a UUID v4.
    pub fn generate() -> Self {
        Self(format!("{EVENT_ID_PREFIX}{}", Uuid::new_v4().simple()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Data section of an event.
///
/// `object` is the resource the event is about; `previous_attributes` holds
/// the changed fields for update-style events. Both are opaque JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// The resource snapshot carried by the event.
    pub object: Value,

    /// Prior values of fields changed by this event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<Value>,
}

impl EventData {
    /// Wraps a resource snapshot with no previous attributes.
    pub fn new(object: Value) -> Self {
        Self { object, previous_attributes: None }
    }

    /// Attaches the previous values of changed fields.
    #[must_use]
    pub fn with_previous_attributes(mut self, previous: Value) -> Self {
        self.previous_attributes = Some(previous);
        self
    }
}

/// Accepts either a bare resource or a value already in the `data` shape.
///
/// A map whose keys are `object` (itself a map) and optionally
/// `previous_attributes` is taken as-is. Anything else becomes `object`,
/// including resources that carry a string `"object": "<kind>"` tag.
impl From<Value> for EventData {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut map) if is_data_shaped(&map) => {
                let object = map.remove("object").unwrap_or_default();
                let previous_attributes = map.remove("previous_attributes");
                Self { object, previous_attributes }
            },
            other => Self::new(other),
        }
    }
}

fn is_data_shaped(map: &serde_json::Map<String, Value>) -> bool {
    map.get("object").is_some_and(Value::is_object)
        && map.keys().all(|key| matches!(key.as_str(), "object" | "previous_attributes"))
}

/// A webhook event as it travels on the wire.
///
/// Field order is fixed by declaration order, so serializing the same
/// envelope always yields the same bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier, stable across delivery attempts.
    pub id: EventId,

    /// Always `"event"`.
    #[serde(default = "default_object")]
    pub object: String,

    /// Dotted, namespaced event type such as `payment_intent.succeeded`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Creation time in unix seconds.
    pub created: i64,

    /// API version the payload was rendered with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Event payload.
    pub data: EventData,
}

fn default_object() -> String {
    EVENT_OBJECT.to_string()
}

impl EventEnvelope {
    /// Builds a new envelope with a generated identifier.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidEventType` if `event_type` is not a dotted,
    /// namespaced identifier.
    pub fn new(event_type: impl Into<String>, data: EventData, created: i64) -> Result<Self> {
        let event_type = event_type.into();
        validate_event_type(&event_type)?;

        Ok(Self {
            id: EventId::generate(),
            object: default_object(),
            event_type,
            created,
            api_version: None,
            data,
        })
    }

    /// Replaces the generated identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the API version.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Creation time as a UTC datetime, if representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.created, 0)
    }

    /// Serializes the envelope to the exact bytes that get signed and sent.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the payload cannot be encoded.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from raw bytes without any signature check.
    ///
    /// Only use this on bytes that have already been authenticated.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Serialization` if the bytes are not an envelope.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Event id={} type={}>", self.id, self.event_type)
    }
}

/// Checks that an event type is a dotted, namespaced identifier.
///
/// Segments are non-empty runs of lowercase ASCII letters, digits and
/// underscores, and there are at least two of them.
///
/// # Errors
///
/// Returns `CoreError::InvalidEventType` describing the first violation.
pub fn validate_event_type(event_type: &str) -> Result<()> {
    let reject = |reason| {
        Err(CoreError::InvalidEventType { event_type: event_type.to_string(), reason })
    };

    if event_type.is_empty() {
        return reject("must not be empty");
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return reject("too long");
    }
    if !event_type.contains('.') {
        return reject("must be namespaced with '.'");
    }

    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    };
    if !event_type.split('.').all(valid_segment) {
        return reject("segments must be non-empty [a-z0-9_]");
    }

    Ok(())
}
