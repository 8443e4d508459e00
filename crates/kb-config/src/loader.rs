//! Settings loader with file and environment variable support

use crate::{BindingSettings, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "KNATIVE_BINDING_CONFIG";

/// Standard settings file search paths
const CONFIG_PATHS: &[&str] = &[
    "knative-binding.toml",
    "./config/knative-binding.toml",
    "/etc/knative-binding/config.toml",
];

/// Settings loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    search_standard_paths: bool,
}

impl ConfigLoader {
    /// Create a new settings loader
    pub fn new() -> Self {
        Self {
            config_path: None,
            search_standard_paths: true,
        }
    }

    /// Create a loader with a specific settings file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
            search_standard_paths: true,
        }
    }

    /// Only consider the explicit path and `KNATIVE_BINDING_CONFIG`
    pub fn without_standard_paths(mut self) -> Self {
        self.search_standard_paths = false;
        self
    }

    /// Load settings from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<BindingSettings, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) but reads variables through `lookup`.
    pub fn load_with<F>(&self, lookup: F) -> Result<BindingSettings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = BindingSettings::default();

        if let Some(path) = self.find_config_file(&lookup) {
            info!(?path, "Loading binding settings from file");
            settings = BindingSettings::from_file(&path)?;
        }

        apply_env_overrides(&mut settings, &lookup)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Find the settings file to use
    fn find_config_file<F>(&self, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            debug!(?path, "Explicit settings path does not exist");
        }

        if let Some(path) = lookup(CONFIG_PATH_ENV).map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        if !self.search_standard_paths {
            return None;
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::EnvError(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Apply environment variable overrides
fn apply_env_overrides<F>(settings: &mut BindingSettings, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(timeout) = parse_env(lookup, "KNATIVE_BINDING_HTTP_TIMEOUT_MS")? {
        settings.http.timeout_ms = timeout;
    }
    if let Some(timeout) = parse_env(lookup, "KNATIVE_BINDING_HTTP_CONNECT_TIMEOUT_MS")? {
        settings.http.connect_timeout_ms = timeout;
    }
    if let Some(idle) = parse_env(lookup, "KNATIVE_BINDING_HTTP_POOL_MAX_IDLE")? {
        settings.http.pool_max_idle_per_host = idle;
    }
    if let Some(val) = lookup("KNATIVE_BINDING_HTTP_USER_AGENT") {
        settings.http.user_agent = val;
    }

    // Broker
    if let Some(resolution) = parse_env(lookup, "KNATIVE_BINDING_RESOLUTION")? {
        settings.broker.resolution = resolution;
    }
    if let Some(val) = lookup("KNATIVE_BINDING_INGRESS_HOST") {
        settings.broker.ingress_host = val;
    }
    if let Some(payload) = parse_env(lookup, "KNATIVE_BINDING_PAYLOAD")? {
        settings.broker.payload = payload;
    }

    // Cluster
    if let Some(val) = lookup("KNATIVE_BINDING_API_SERVER_URL") {
        settings.cluster.api_server_url = val;
    }

    Ok(())
}
