//! Typed messaging containers and their wire format.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::trace::TraceContext;
use weft_core::{Error, Result};

/// A typed value carried in a container's value table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TypedValue {
    String(String),
    Integer(i64),
    Double(f64),
    Bool(bool),
    Nested(Box<MessagingContainer>),
}

impl From<&str> for TypedValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for TypedValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for TypedValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for TypedValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<bool> for TypedValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

mod payload_encoding {
    //! The opaque payload section travels base64-encoded inside the
    //! self-describing document.

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// A routable message: required headers, a typed value table, and an
/// optional opaque payload.
///
/// The topic must be non-empty; this is validated on creation and again
/// when deserializing, so a container observed anywhere in the fabric
/// always satisfies the invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingContainer {
    source: String,
    target: String,
    topic: String,
    trace_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    values: HashMap<String, TypedValue>,
    #[serde(default, with = "payload_encoding", skip_serializing_if = "Bytes::is_empty")]
    payload: Bytes,
}

impl MessagingContainer {
    /// Create a container with the required headers.
    ///
    /// The trace id is taken from the calling thread's trace context when
    /// one is installed, otherwise a fresh UUIDv4 is generated.
    pub fn create(
        source: impl Into<String>,
        target: impl Into<String>,
        topic: impl Into<String>,
    ) -> Result<Self> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(Error::invalid_message("topic cannot be empty"));
        }

        let ambient = TraceContext::current();
        let trace_id = if ambient.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            ambient
        };

        Ok(Self {
            source: source.into(),
            target: target.into(),
            topic,
            trace_id,
            headers: HashMap::new(),
            values: HashMap::new(),
            payload: Bytes::new(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Look up a typed value by key.
    pub fn value(&self, key: &str) -> Option<&TypedValue> {
        self.values.get(key)
    }

    /// The typed value table.
    pub fn values(&self) -> &HashMap<String, TypedValue> {
        &self.values
    }

    /// The opaque payload section.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encode the container into its self-describing byte form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    /// Decode a container, revalidating the topic invariant.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::serialization("cannot deserialize empty data"));
        }

        let container: Self = serde_json::from_slice(data)?;
        if container.topic.is_empty() {
            return Err(Error::invalid_message(
                "deserialized container missing required 'topic' field",
            ));
        }
        Ok(container)
    }
}

/// Fluent assembler for [`MessagingContainer`].
///
/// Accumulates headers and values and emits a container only after the
/// invariants pass.
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    source: String,
    target: String,
    topic: String,
    trace_id: Option<String>,
    headers: HashMap<String, String>,
    values: HashMap<String, TypedValue>,
    payload: Bytes,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Override the trace id instead of inheriting the ambient one.
    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn value(mut self, key: impl Into<String>, value: impl Into<TypedValue>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Validate invariants and assemble the container.
    pub fn build(self) -> Result<MessagingContainer> {
        let mut container = MessagingContainer::create(self.source, self.target, self.topic)?;
        if let Some(trace_id) = self.trace_id {
            container.trace_id = trace_id;
        }
        container.headers = self.headers;
        container.values = self.values;
        container.payload = self.payload;
        Ok(container)
    }
}
