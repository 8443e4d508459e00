use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod logging;

// ============================================================================
// Binding Contract
// ============================================================================

/// Operation an output binding can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Get,
    Delete,
    List,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Get => "get",
            OperationKind::Delete => "delete",
            OperationKind::List => "list",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "get" => Ok(OperationKind::Get),
            "delete" => Ok(OperationKind::Delete),
            "list" => Ok(OperationKind::List),
            other => Err(format!("unknown operation: {}", other)),
        }
    }
}

/// Component metadata handed to a binding at initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingMetadata {
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl BindingMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A single invocation forwarded by the hosting runtime.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub operation: OperationKind,
    pub data: Bytes,
    /// Per-request metadata set by the host; the broker binding does not read it
    pub metadata: HashMap<String, String>,
}

impl InvokeRequest {
    pub fn new(operation: OperationKind, data: impl Into<Bytes>) -> Self {
        Self {
            operation,
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for a `create` invocation carrying `data`.
    pub fn create(data: impl Into<Bytes>) -> Self {
        Self::new(OperationKind::Create, data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvokeResponse {
    pub data: Bytes,
    pub metadata: HashMap<String, String>,
}

/// Output binding lifecycle: configure once, then invoke any number of times.
#[async_trait]
pub trait OutputBinding: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn init(&mut self, metadata: &BindingMetadata) -> Result<(), Self::Error>;

    fn operations(&self) -> Vec<OperationKind>;

    async fn invoke(
        &self,
        ctx: &InvokeContext,
        request: &InvokeRequest,
    ) -> Result<Option<InvokeResponse>, Self::Error>;
}

// ============================================================================
// Invocation Context
// ============================================================================

/// Why an invocation stopped before its work completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("cancelled by caller")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Caller-supplied cancellation and deadline for one invocation.
///
/// Every network call made on behalf of the invocation runs through
/// [`InvokeContext::run`], so it is abandoned as soon as the token is
/// cancelled or the deadline passes.
#[derive(Debug, Clone, Default)]
pub struct InvokeContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl InvokeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Check without awaiting anything.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancellation.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` to completion unless the invocation is cancelled first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}
