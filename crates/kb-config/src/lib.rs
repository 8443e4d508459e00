//! Knative Binding Configuration
//!
//! Process-level settings for the broker dispatcher: HTTP client tuning,
//! broker resolution defaults and Kubernetes API access. Values come from an
//! optional TOML file and are then overridden by `KNATIVE_BINDING_*`
//! environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Ingress service fronting Kafka-backed brokers.
pub const DEFAULT_INGRESS_HOST: &str = "kafka-broker-ingress.knative-eventing.svc.cluster.local";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// How the dispatcher finds the address of a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Read `status.address.url` from the Broker resource in the cluster
    #[default]
    #[serde(alias = "dynamic")]
    Cluster,
    /// Format the ingress URL from namespace and broker name
    #[serde(alias = "templated")]
    Template,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" | "dynamic" => Ok(Resolution::Cluster),
            "template" | "templated" => Ok(Resolution::Template),
            other => Err(format!("unknown resolution '{}', expected 'cluster' or 'template'", other)),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Cluster => f.write_str("cluster"),
            Resolution::Template => f.write_str("template"),
        }
    }
}

/// What goes into the data of the outbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadMode {
    /// Forward the invocation body
    #[default]
    Forward,
    /// Always send the fixed `{"hello":"Dapr"}` payload
    Demo,
}

impl FromStr for PayloadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(PayloadMode::Forward),
            "demo" => Ok(PayloadMode::Demo),
            other => Err(format!("unknown payload mode '{}', expected 'forward' or 'demo'", other)),
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadMode::Forward => f.write_str("forward"),
            PayloadMode::Demo => f.write_str("demo"),
        }
    }
}

/// Root settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingSettings {
    pub http: HttpSettings,
    pub broker: BrokerSettings,
    pub cluster: ClusterSettings,
}

/// HTTP client used for event delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            pool_max_idle_per_host: 10,
            user_agent: format!("knative-binding/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Defaults for properties a binding component may leave unset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub resolution: Resolution,
    pub ingress_host: String,
    pub payload: PayloadMode,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::Cluster,
            ingress_host: DEFAULT_INGRESS_HOST.to_string(),
            payload: PayloadMode::Forward,
        }
    }
}

/// Kubernetes API access for cluster resolution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Explicit API server URL. Empty means infer from kubeconfig or the
    /// in-cluster service account.
    pub api_server_url: String,
}

impl ClusterSettings {
    pub fn api_server_url(&self) -> Option<&str> {
        let url = self.api_server_url.trim();
        if url.is_empty() {
            None
        } else {
            Some(url)
        }
    }
}

impl BindingSettings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: BindingSettings = toml::from_str(content)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "http.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.http.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "http.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.broker.ingress_host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "broker.ingress_host must not be empty".to_string(),
            ));
        }
        if let Some(url) = self.cluster.api_server_url() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "cluster.api_server_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BindingSettings::default();
        assert_eq!(settings.http.timeout_ms, 30_000);
        assert_eq!(settings.broker.resolution, Resolution::Cluster);
        assert_eq!(settings.broker.ingress_host, DEFAULT_INGRESS_HOST);
        assert_eq!(settings.broker.payload, PayloadMode::Forward);
        assert!(settings.cluster.api_server_url().is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let settings = BindingSettings::from_toml(
            r#"
            [http]
            timeout_ms = 5000

            [broker]
            resolution = "template"
            payload = "demo"
            "#,
        )
        .unwrap();

        assert_eq!(settings.http.timeout(), Duration::from_secs(5));
        assert_eq!(settings.http.connect_timeout_ms, 10_000);
        assert_eq!(settings.broker.resolution, Resolution::Template);
        assert_eq!(settings.broker.payload, PayloadMode::Demo);
        assert_eq!(settings.broker.ingress_host, DEFAULT_INGRESS_HOST);
    }

    #[test]
    fn test_unknown_resolution_in_toml_is_rejected() {
        let result = BindingSettings::from_toml("[broker]\nresolution = \"dns\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_resolution_aliases_match_between_toml_and_env() {
        for (alias, expected) in [("dynamic", Resolution::Cluster), ("templated", Resolution::Template)] {
            let toml = format!("[broker]\nresolution = \"{}\"\n", alias);
            let settings = BindingSettings::from_toml(&toml).unwrap();
            assert_eq!(settings.broker.resolution, expected);
            assert_eq!(alias.parse::<Resolution>().unwrap(), expected);
        }
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!("Cluster".parse::<Resolution>().unwrap(), Resolution::Cluster);
        assert_eq!("template".parse::<Resolution>().unwrap(), Resolution::Template);
        assert!("static".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_payload_mode_from_str() {
        assert_eq!("DEMO".parse::<PayloadMode>().unwrap(), PayloadMode::Demo);
        assert!("echo".parse::<PayloadMode>().is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut settings = BindingSettings::default();
        settings.http.timeout_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = BindingSettings::default();
        settings.broker.ingress_host = "  ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = BindingSettings::default();
        settings.cluster.api_server_url = "kubernetes.default.svc".to_string();
        assert!(settings.validate().is_err());
    }
}
