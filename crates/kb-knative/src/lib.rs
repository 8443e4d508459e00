//! Knative Broker Output Binding
//!
//! Publishes one CloudEvent per invocation to a Knative Eventing broker:
//! - KnativeBinding: init from component properties, single `create` operation
//! - BrokerResolver: cluster lookup of the Broker address, or a fixed ingress URL template
//! - EventTransport: structured-mode CloudEvents over HTTP
//! - BindingError: every failure is returned to the caller, nothing is fatal

pub mod binding;
pub mod binding_metrics;
pub mod config;
pub mod error;
pub mod event;
pub mod resolver;
pub mod transport;

pub use binding::{demo_payload, KnativeBinding};
pub use config::BindingConfig;
pub use error::BindingError;
pub use event::{CloudEvent, CLOUDEVENTS_JSON_CONTENT_TYPE, EVENT_SOURCE, EVENT_TYPE};
pub use resolver::{BrokerResolver, ClusterResolver, TemplateResolver};
pub use transport::{DeliveryResult, EventTransport, HttpTransport};

pub use kb_common::{
    BindingMetadata, InvokeContext, InvokeRequest, InvokeResponse, OperationKind, OutputBinding,
};
pub use kb_config::{BindingSettings, PayloadMode, Resolution};

pub type Result<T> = std::result::Result<T, BindingError>;
