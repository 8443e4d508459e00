//! Broker target resolution
//!
//! Two interchangeable strategies behind [`BrokerResolver`]:
//! - [`ClusterResolver`] reads the address a Broker advertises in its status
//! - [`TemplateResolver`] formats the ingress URL without asking the cluster

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind};
use kube::Client;
use tracing::{debug, warn};

use kb_config::{ClusterSettings, Resolution};

use crate::binding_metrics;
use crate::error::BindingError;
use crate::Result;

pub const BROKER_GROUP: &str = "eventing.knative.dev";
pub const BROKER_VERSION: &str = "v1";
pub const BROKER_KIND: &str = "Broker";

/// Produces the URL events for `(namespace, broker)` are posted to
#[async_trait]
pub trait BrokerResolver: Send + Sync {
    async fn resolve(&self, namespace: &str, broker: &str) -> Result<String>;

    fn strategy(&self) -> Resolution;
}

/// `http://{ingress_host}/{namespace}/{broker}`. Never fails; a broker that
/// does not exist only shows up when delivery is attempted.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    ingress_host: String,
}

impl TemplateResolver {
    pub fn new(ingress_host: impl Into<String>) -> Self {
        Self {
            ingress_host: ingress_host.into(),
        }
    }

    pub fn ingress_host(&self) -> &str {
        &self.ingress_host
    }

    pub fn ingress_url(&self, namespace: &str, broker: &str) -> String {
        format!("http://{}/{}/{}", self.ingress_host, namespace, broker)
    }
}

#[async_trait]
impl BrokerResolver for TemplateResolver {
    async fn resolve(&self, namespace: &str, broker: &str) -> Result<String> {
        Ok(self.ingress_url(namespace, broker))
    }

    fn strategy(&self) -> Resolution {
        Resolution::Template
    }
}

/// Looks up the `eventing.knative.dev/v1` Broker through the Kubernetes API
#[derive(Clone)]
pub struct ClusterResolver {
    client: Client,
    resource: ApiResource,
}

impl ClusterResolver {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(BROKER_GROUP, BROKER_VERSION, BROKER_KIND);
        Self {
            client,
            resource: ApiResource::from_gvk(&gvk),
        }
    }

    /// Client from the local kubeconfig or the in-cluster service account
    pub async fn infer() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// Client talking to an explicit API server without credentials
    pub fn with_api_server(url: &str) -> Result<Self> {
        let uri = url
            .parse::<http::Uri>()
            .map_err(|e| BindingError::invalid_configuration("cluster.api_server_url", e.to_string()))?;
        let client = Client::try_from(kube::Config::new(uri))?;
        Ok(Self::new(client))
    }

    pub async fn from_settings(settings: &ClusterSettings) -> Result<Self> {
        match settings.api_server_url() {
            Some(url) => Self::with_api_server(url),
            None => Self::infer().await,
        }
    }
}

#[async_trait]
impl BrokerResolver for ClusterResolver {
    async fn resolve(&self, namespace: &str, broker: &str) -> Result<String> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);

        let object = match api.get_opt(broker).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                warn!(namespace, broker, "Broker not found");
                binding_metrics::record_resolution_failure("not_found");
                return Err(BindingError::BrokerNotFound {
                    namespace: namespace.to_string(),
                    broker: broker.to_string(),
                });
            }
            Err(e) => {
                binding_metrics::record_resolution_failure("lookup_error");
                return Err(e.into());
            }
        };

        match broker_address(&object) {
            Some(url) => {
                debug!(namespace, broker, url = %url, "Resolved broker address");
                Ok(url)
            }
            None => {
                warn!(namespace, broker, "Broker has no address yet");
                binding_metrics::record_resolution_failure("not_ready");
                Err(BindingError::BrokerNotReady {
                    namespace: namespace.to_string(),
                    broker: broker.to_string(),
                })
            }
        }
    }

    fn strategy(&self) -> Resolution {
        Resolution::Cluster
    }
}

/// `status.address.url`, falling back to the first of `status.addresses`
pub fn broker_address(object: &DynamicObject) -> Option<String> {
    let status = object.data.get("status")?;

    let primary = status
        .get("address")
        .and_then(|address| address.get("url"))
        .and_then(|url| url.as_str());

    let fallback = || {
        status
            .get("addresses")
            .and_then(|addresses| addresses.as_array())
            .and_then(|addresses| addresses.first())
            .and_then(|address| address.get("url"))
            .and_then(|url| url.as_str())
    };

    primary
        .filter(|url| !url.is_empty())
        .or_else(|| fallback().filter(|url| !url.is_empty()))
        .map(str::to_string)
}
