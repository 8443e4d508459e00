//! Binding component properties
//!
//! Required: `broker`, `namespace`.
//! Optional: `resolution`, `ingressHost`, `payload`; unset values fall back
//! to the process-level [`BrokerSettings`].

use std::str::FromStr;

use kb_common::BindingMetadata;
use reqwest::Url;
use kb_config::{BrokerSettings, PayloadMode, Resolution};

use crate::error::BindingError;
use crate::Result;

pub const BROKER_KEY: &str = "broker";
pub const NAMESPACE_KEY: &str = "namespace";
pub const RESOLUTION_KEY: &str = "resolution";
pub const INGRESS_HOST_KEY: &str = "ingressHost";
pub const PAYLOAD_KEY: &str = "payload";

/// Configuration fixed at initialization and read by every invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    pub broker_name: String,
    pub namespace: String,
    pub resolution: Resolution,
    pub ingress_host: String,
    pub payload_mode: PayloadMode,
}

impl BindingConfig {
    pub fn from_metadata(metadata: &BindingMetadata, defaults: &BrokerSettings) -> Result<Self> {
        let broker_name = required_property(metadata, BROKER_KEY)?;
        let namespace = required_property(metadata, NAMESPACE_KEY)?;

        let resolution = optional_property(metadata, RESOLUTION_KEY)?.unwrap_or(defaults.resolution);
        let payload_mode = optional_property(metadata, PAYLOAD_KEY)?.unwrap_or(defaults.payload);
        let ingress_host = match metadata.property(INGRESS_HOST_KEY).map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => defaults.ingress_host.clone(),
        };
        validate_ingress_host(&ingress_host)?;

        Ok(Self {
            broker_name,
            namespace,
            resolution,
            ingress_host,
            payload_mode,
        })
    }
}

/// Value of a required property. Absent, empty and whitespace-only values
/// are all reported as missing.
pub fn required_property(metadata: &BindingMetadata, key: &str) -> Result<String> {
    match metadata.property(key) {
        Some(value) if !value.trim().is_empty() => Ok(value.to_string()),
        _ => Err(BindingError::MissingConfiguration(key.to_string())),
    }
}

/// The host must form a valid `http://{host}/` URL with nothing but an
/// authority in it.
fn validate_ingress_host(host: &str) -> Result<()> {
    let invalid = |message: String| BindingError::invalid_configuration(INGRESS_HOST_KEY, message);

    let url = Url::parse(&format!("http://{}/", host))
        .map_err(|e| invalid(format!("'{}' is not a valid host: {}", host, e)))?;

    let authority_only = url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none()
        && url.username().is_empty();
    if !authority_only {
        return Err(invalid(format!("'{}' must be a host with an optional port", host)));
    }
    Ok(())
}

fn optional_property<T>(metadata: &BindingMetadata, key: &str) -> Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    match metadata.property(key).map(str::trim) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|message| BindingError::invalid_configuration(key, message)),
        _ => Ok(None),
    }
}
