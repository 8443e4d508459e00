//! Transport - CloudEvent delivery over HTTP
//!
//! One POST per event in structured mode:
//! - `Content-Type: application/cloudevents+json`
//! - body is the JSON-encoded [`CloudEvent`]
//!
//! No retries. Whatever the broker answers is reported back as a
//! [`DeliveryResult`] and the caller decides what to do with it.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tracing::{debug, info, warn};

use kb_config::HttpSettings;

use crate::error::BindingError;
use crate::event::{CloudEvent, CLOUDEVENTS_JSON_CONTENT_TYPE};
use crate::Result;

/// Longest response body kept in a rejection message
const MAX_REJECTION_BODY: usize = 256;

/// What happened to an event handed to a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    /// The broker answered 2xx
    Accepted { status: u16 },
    /// The broker answered, but not with 2xx
    Rejected { status: u16, message: String },
    /// The request never completed (connect error, timeout, ...)
    Undelivered { reason: String },
}

impl DeliveryResult {
    pub fn is_undelivered(&self) -> bool {
        matches!(self, DeliveryResult::Undelivered { .. })
    }
}

/// Sends one CloudEvent to one target.
///
/// `Err` is reserved for failures before anything reaches the network,
/// such as a target that is not a valid URL. Everything the network
/// reports is a [`DeliveryResult`].
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, target: &str, event: &CloudEvent) -> Result<DeliveryResult>;
}

/// reqwest-backed structured-mode transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .connect_timeout(settings.connect_timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(BindingError::TransportConstructionFailed)?;

        info!(
            timeout_ms = settings.timeout_ms,
            connect_timeout_ms = settings.connect_timeout_ms,
            "HttpTransport initialized"
        );

        Ok(Self { client })
    }
}

#[async_trait]
impl EventTransport for HttpTransport {
    async fn send(&self, target: &str, event: &CloudEvent) -> Result<DeliveryResult> {
        let body = event.to_json_bytes()?;

        debug!(
            event_id = %event.id,
            target = %target,
            bytes = body.len(),
            "Posting CloudEvent"
        );

        let response = self
            .client
            .post(target)
            .header(CONTENT_TYPE, CLOUDEVENTS_JSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await;

        let result = match response {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    DeliveryResult::Accepted {
                        status: status.as_u16(),
                    }
                } else {
                    let text = read_body_prefix(response, event, target).await;
                    let mut message = format!("HTTP {}", status.as_u16());
                    let text = text.trim();
                    if !text.is_empty() {
                        message.push_str(": ");
                        message.push_str(text);
                    }
                    warn!(
                        event_id = %event.id,
                        target = %target,
                        status_code = status.as_u16(),
                        "Broker rejected event"
                    );
                    DeliveryResult::Rejected {
                        status: status.as_u16(),
                        message,
                    }
                }
            }
            Err(e) if e.is_builder() => {
                warn!(event_id = %event.id, target = %target, error = %e, "Invalid broker target");
                return Err(BindingError::InvalidTarget {
                    target: target.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    "Request timeout".to_string()
                } else if e.is_connect() {
                    format!("Connection error: {}", e)
                } else {
                    format!("Request failed: {}", e)
                };
                warn!(
                    event_id = %event.id,
                    target = %target,
                    error = %e,
                    "Event undelivered"
                );
                DeliveryResult::Undelivered { reason }
            }
        };

        Ok(result)
    }
}

/// First [`MAX_REJECTION_BODY`] characters of a response body. Only as many
/// chunks as needed are read.
async fn read_body_prefix(mut response: Response, event: &CloudEvent, target: &str) -> String {
    // Four bytes per char covers any UTF-8 text
    let limit = MAX_REJECTION_BODY * 4;
    let mut buf: Vec<u8> = Vec::new();

    while buf.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                warn!(
                    event_id = %event.id,
                    target = %target,
                    error = %e,
                    "Failed to read rejection body"
                );
                break;
            }
        }
    }
    buf.truncate(limit);

    String::from_utf8_lossy(&buf)
        .chars()
        .take(MAX_REJECTION_BODY)
        .collect()
}
