//! CloudEvent envelope
//!
//! CloudEvents 1.0, structured JSON mode. Attribute names are the
//! lowercase wire names, so the struct serializes directly into the body
//! of an `application/cloudevents+json` request.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CloudEvents `specversion`
pub const CLOUDEVENTS_SPEC_VERSION: &str = "1.0";

/// Source attribute of every event published by the binding
pub const EVENT_SOURCE: &str = "/dapr/system";

/// Type attribute of every event published by the binding
pub const EVENT_TYPE: &str = "dev.knative.dapr.binding";

/// Media type of a structured-mode CloudEvent
pub const CLOUDEVENTS_JSON_CONTENT_TYPE: &str = "application/cloudevents+json";

const JSON_CONTENT_TYPE: &str = "application/json";
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,

    pub id: String,

    pub source: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

impl CloudEvent {
    /// Create an event without data, with a fresh id and the current time
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            specversion: CLOUDEVENTS_SPEC_VERSION.to_string(),
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            datacontenttype: None,
            time: Some(Utc::now()),
            data: None,
            data_base64: None,
        }
    }

    /// An event carrying the binding's fixed source and type
    pub fn binding_event() -> Self {
        Self::new(EVENT_SOURCE, EVENT_TYPE)
    }

    pub fn with_json_data(mut self, data: serde_json::Value) -> Self {
        self.datacontenttype = Some(JSON_CONTENT_TYPE.to_string());
        self.data = Some(data);
        self.data_base64 = None;
        self
    }

    pub fn with_binary_data(mut self, data: &[u8]) -> Self {
        self.datacontenttype = Some(BINARY_CONTENT_TYPE.to_string());
        self.data_base64 = Some(STANDARD.encode(data));
        self.data = None;
        self
    }

    /// Attach an invocation body: JSON goes into `data`, anything else into
    /// `data_base64`, and an empty body leaves the event without data.
    pub fn with_payload(self, body: &[u8]) -> Self {
        if body.is_empty() {
            return self;
        }
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) => self.with_json_data(value),
            Err(_) => self.with_binary_data(body),
        }
    }

    /// Decoded `data_base64`, if present and well formed
    pub fn binary_data(&self) -> Option<Vec<u8>> {
        self.data_base64
            .as_ref()
            .and_then(|encoded| STANDARD.decode(encoded).ok())
    }

    /// Structured-mode request body
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
