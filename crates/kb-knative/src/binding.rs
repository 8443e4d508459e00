//! KnativeBinding - the broker dispatcher
//!
//! Lifecycle:
//! 1. [`KnativeBinding::new`] builds the HTTP transport
//! 2. `init` reads the component properties and picks a resolver
//! 3. every `invoke` builds one CloudEvent, resolves the broker and posts it
//!
//! A failed delivery is returned to the caller as
//! [`BindingError::DeliveryFailed`]; the binding never retries.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, info_span, warn, Instrument};

use kb_common::{
    BindingMetadata, InvokeContext, InvokeRequest, InvokeResponse, OperationKind, OutputBinding,
};
use kb_config::{BindingSettings, PayloadMode, Resolution};

use crate::binding_metrics;
use crate::config::BindingConfig;
use crate::error::BindingError;
use crate::event::CloudEvent;
use crate::resolver::{BrokerResolver, ClusterResolver, TemplateResolver};
use crate::transport::{DeliveryResult, EventTransport, HttpTransport};
use crate::Result;

/// Data of every event sent with `payload=demo`
pub fn demo_payload() -> serde_json::Value {
    json!({"hello": "Dapr"})
}

struct Initialized {
    config: BindingConfig,
    resolver: Arc<dyn BrokerResolver>,
}

pub struct KnativeBinding {
    settings: BindingSettings,
    transport: Arc<dyn EventTransport>,
    resolver_override: Option<Arc<dyn BrokerResolver>>,
    state: Option<Initialized>,
}

impl KnativeBinding {
    /// Create a binding that delivers over HTTP.
    ///
    /// Fails with [`BindingError::TransportConstructionFailed`] when the HTTP
    /// client cannot be built from `settings.http`.
    pub fn new(settings: BindingSettings) -> Result<Self> {
        let transport = HttpTransport::new(&settings.http)?;
        Ok(Self::with_transport(settings, Arc::new(transport)))
    }

    pub fn with_transport(settings: BindingSettings, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            settings,
            transport,
            resolver_override: None,
            state: None,
        }
    }

    /// Use `resolver` instead of the one selected by the `resolution` property
    pub fn with_resolver(mut self, resolver: Arc<dyn BrokerResolver>) -> Self {
        self.resolver_override = Some(resolver);
        self
    }

    pub fn config(&self) -> Option<&BindingConfig> {
        self.state.as_ref().map(|state| &state.config)
    }

    pub fn broker_name(&self) -> Option<&str> {
        self.config().map(|config| config.broker_name.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.config().map(|config| config.namespace.as_str())
    }

    /// Strategy of the active resolver, once initialized
    pub fn resolution(&self) -> Option<Resolution> {
        self.state.as_ref().map(|state| state.resolver.strategy())
    }

    async fn build_resolver(&self, config: &BindingConfig) -> Result<Arc<dyn BrokerResolver>> {
        if let Some(resolver) = &self.resolver_override {
            return Ok(resolver.clone());
        }

        let resolver: Arc<dyn BrokerResolver> = match config.resolution {
            Resolution::Template => Arc::new(TemplateResolver::new(config.ingress_host.clone())),
            Resolution::Cluster => {
                Arc::new(ClusterResolver::from_settings(&self.settings.cluster).await?)
            }
        };
        Ok(resolver)
    }

    fn build_event(config: &BindingConfig, request: &InvokeRequest) -> CloudEvent {
        let event = CloudEvent::binding_event();
        match config.payload_mode {
            PayloadMode::Demo => event.with_json_data(demo_payload()),
            PayloadMode::Forward => event.with_payload(&request.data),
        }
    }

    async fn send_cloud_event(
        &self,
        state: &Initialized,
        ctx: &InvokeContext,
        request: &InvokeRequest,
    ) -> Result<()> {
        let config = &state.config;
        let event = Self::build_event(config, request);

        let span = info_span!(
            "knative_send",
            event_id = %event.id,
            namespace = %config.namespace,
            broker = %config.broker_name,
        );

        async {
            let target = ctx
                .run(state.resolver.resolve(&config.namespace, &config.broker_name))
                .await??;

            debug!(target = %target, strategy = %state.resolver.strategy(), "Broker target resolved");

            let started = Instant::now();
            let delivery = ctx.run(self.transport.send(&target, &event)).await??;
            binding_metrics::record_delivery_latency(started.elapsed());

            match delivery {
                DeliveryResult::Accepted { status } => {
                    info!(target = %target, status_code = status, "Event delivered");
                    Ok(())
                }
                DeliveryResult::Rejected { message, .. } => Err(BindingError::DeliveryFailed {
                    target,
                    reason: message,
                }),
                DeliveryResult::Undelivered { reason } => {
                    Err(BindingError::DeliveryFailed { target, reason })
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl OutputBinding for KnativeBinding {
    type Error = BindingError;

    async fn init(&mut self, metadata: &BindingMetadata) -> Result<()> {
        let config = BindingConfig::from_metadata(metadata, &self.settings.broker)?;
        let resolver = self.build_resolver(&config).await?;

        info!(
            component = %metadata.name,
            broker = %config.broker_name,
            namespace = %config.namespace,
            resolution = %resolver.strategy(),
            payload = %config.payload_mode,
            "Knative binding initialized"
        );

        self.state = Some(Initialized { config, resolver });
        Ok(())
    }

    fn operations(&self) -> Vec<OperationKind> {
        vec![OperationKind::Create]
    }

    async fn invoke(
        &self,
        ctx: &InvokeContext,
        request: &InvokeRequest,
    ) -> Result<Option<InvokeResponse>> {
        let state = self.state.as_ref().ok_or(BindingError::NotInitialized)?;

        if request.operation != OperationKind::Create {
            return Err(BindingError::UnsupportedOperation(request.operation.to_string()));
        }

        let result = self.send_cloud_event(state, ctx, request).await;

        match &result {
            Ok(()) => binding_metrics::record_event_sent("delivered"),
            Err(e) => {
                warn!(
                    namespace = %state.config.namespace,
                    broker = %state.config.broker_name,
                    error = %e,
                    "Failed to send event"
                );
                binding_metrics::record_event_sent(e.kind());
            }
        }

        result.map(|()| None)
    }
}
