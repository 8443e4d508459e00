use kb_common::Interrupted;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("the {0} parameter is required")]
    MissingConfiguration(String),

    #[error("invalid value for the {key} parameter: {message}")]
    InvalidConfiguration { key: String, message: String },

    #[error("Binding not initialized")]
    NotInitialized,

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Broker {broker} not found in namespace {namespace}")]
    BrokerNotFound { namespace: String, broker: String },

    #[error("Broker {broker} in namespace {namespace} has no address yet")]
    BrokerNotReady { namespace: String, broker: String },

    #[error("Cluster lookup failed: {0}")]
    ClusterLookup(#[from] kube::Error),

    #[error("invalid broker target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to send to {target}: {reason}")]
    DeliveryFailed { target: String, reason: String },

    #[error("Failed to build HTTP transport: {0}")]
    TransportConstructionFailed(#[source] reqwest::Error),

    #[error("Invocation cancelled: {0}")]
    Cancelled(#[from] Interrupted),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BindingError {
    pub fn invalid_configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the same invocation could succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BindingError::DeliveryFailed { .. }
                | BindingError::ClusterLookup(_)
                | BindingError::BrokerNotReady { .. }
                | BindingError::Cancelled(_)
        )
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BindingError::MissingConfiguration(_) => "missing_configuration",
            BindingError::InvalidConfiguration { .. } => "invalid_configuration",
            BindingError::NotInitialized => "not_initialized",
            BindingError::UnsupportedOperation(_) => "unsupported_operation",
            BindingError::BrokerNotFound { .. } => "broker_not_found",
            BindingError::BrokerNotReady { .. } => "broker_not_ready",
            BindingError::ClusterLookup(_) => "cluster_lookup",
            BindingError::InvalidTarget { .. } => "invalid_target",
            BindingError::DeliveryFailed { .. } => "delivery_failed",
            BindingError::TransportConstructionFailed(_) => "transport_construction",
            BindingError::Cancelled(_) => "cancelled",
            BindingError::Serialization(_) => "serialization",
        }
    }
}
