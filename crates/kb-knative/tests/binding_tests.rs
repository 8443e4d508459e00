//! KnativeBinding Tests
//!
//! Tests for:
//! - Initialization from component properties
//! - Operation enumeration
//! - Event construction (fixed source/type, forwarded and demo payloads)
//! - Delivery classification (accepted, rejected, undelivered)
//! - Resolution failures stopping the send
//! - Cancellation and deadlines

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recorder::Recorder;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use kb_knative::{
    BindingError, BindingMetadata, BindingSettings, BrokerResolver, CloudEvent, DeliveryResult,
    EventTransport, InvokeContext, InvokeRequest, KnativeBinding, OperationKind, OutputBinding,
    PayloadMode, Resolution,
};

mod recorder {
    use std::sync::Mutex;

    use kb_knative::CloudEvent;

    /// Events captured by the fake transport, with the target each went to
    #[derive(Default)]
    pub struct Recorder {
        sent: Mutex<Vec<(String, CloudEvent)>>,
    }

    impl Recorder {
        pub fn push(&self, target: &str, event: &CloudEvent) {
            self.sent
                .lock()
                .unwrap()
                .push((target.to_string(), event.clone()));
        }

        pub fn sent(&self) -> Vec<(String, CloudEvent)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }
}

/// Transport answering every send with a fixed result
struct FakeTransport {
    result: DeliveryResult,
    delay: Option<Duration>,
    recorder: Recorder,
}

impl FakeTransport {
    fn new(result: DeliveryResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            delay: None,
            recorder: Recorder::default(),
        })
    }

    fn accepting() -> Arc<Self> {
        Self::new(DeliveryResult::Accepted { status: 202 })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: DeliveryResult::Accepted { status: 202 },
            delay: Some(delay),
            recorder: Recorder::default(),
        })
    }
}

#[async_trait]
impl EventTransport for FakeTransport {
    async fn send(&self, target: &str, event: &CloudEvent) -> kb_knative::Result<DeliveryResult> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.recorder.push(target, event);
        Ok(self.result.clone())
    }
}

/// Resolver that reports every broker as missing
struct MissingBrokerResolver {
    calls: AtomicUsize,
}

#[async_trait]
impl BrokerResolver for MissingBrokerResolver {
    async fn resolve(&self, namespace: &str, broker: &str) -> kb_knative::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BindingError::BrokerNotFound {
            namespace: namespace.to_string(),
            broker: broker.to_string(),
        })
    }

    fn strategy(&self) -> Resolution {
        Resolution::Cluster
    }
}

/// Resolver whose cluster lookup takes `delay` before answering
struct SlowResolver {
    delay: Duration,
    finished: AtomicUsize,
}

#[async_trait]
impl BrokerResolver for SlowResolver {
    async fn resolve(&self, namespace: &str, broker: &str) -> kb_knative::Result<String> {
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "http://broker-ingress.knative-eventing.svc.cluster.local/{}/{}",
            namespace, broker
        ))
    }

    fn strategy(&self) -> Resolution {
        Resolution::Cluster
    }
}

fn template_settings() -> BindingSettings {
    let mut settings = BindingSettings::default();
    settings.broker.resolution = Resolution::Template;
    settings
}

fn metadata(broker: &str, namespace: &str) -> BindingMetadata {
    BindingMetadata::new("knative")
        .with_property("broker", broker)
        .with_property("namespace", namespace)
}

async fn initialized_binding(transport: Arc<FakeTransport>) -> KnativeBinding {
    let mut binding = KnativeBinding::with_transport(template_settings(), transport);
    binding.init(&metadata("broker1", "ns1")).await.unwrap();
    binding
}

#[tokio::test]
async fn test_init_retains_configured_values() {
    for (broker, namespace) in [("default", "apps"), ("broker1", "ns1"), ("kafka-broker", "team-a")] {
        let mut binding =
            KnativeBinding::with_transport(template_settings(), FakeTransport::accepting());

        binding.init(&metadata(broker, namespace)).await.unwrap();

        assert_eq!(binding.broker_name(), Some(broker));
        assert_eq!(binding.namespace(), Some(namespace));
        assert_eq!(binding.resolution(), Some(Resolution::Template));
    }
}

#[tokio::test]
async fn test_init_missing_broker() {
    let mut binding = KnativeBinding::with_transport(template_settings(), FakeTransport::accepting());
    let metadata = BindingMetadata::new("knative").with_property("namespace", "ns1");

    let err = binding.init(&metadata).await.unwrap_err();

    assert!(matches!(err, BindingError::MissingConfiguration(ref key) if key == "broker"));
    assert!(binding.config().is_none());
}

#[tokio::test]
async fn test_init_missing_namespace() {
    let mut binding = KnativeBinding::with_transport(template_settings(), FakeTransport::accepting());
    let metadata = BindingMetadata::new("knative").with_property("broker", "broker1");

    let err = binding.init(&metadata).await.unwrap_err();

    assert!(matches!(err, BindingError::MissingConfiguration(ref key) if key == "namespace"));
}

#[tokio::test]
async fn test_init_empty_values() {
    let mut binding = KnativeBinding::with_transport(template_settings(), FakeTransport::accepting());

    let err = binding.init(&metadata("", "ns1")).await.unwrap_err();
    assert!(matches!(err, BindingError::MissingConfiguration(ref key) if key == "broker"));

    let err = binding.init(&metadata("broker1", " ")).await.unwrap_err();
    assert!(matches!(err, BindingError::MissingConfiguration(ref key) if key == "namespace"));
}

#[tokio::test]
async fn test_operations_is_create_only() {
    let binding = KnativeBinding::with_transport(template_settings(), FakeTransport::accepting());
    assert_eq!(binding.operations(), vec![OperationKind::Create]);
}

#[tokio::test]
async fn test_invoke_before_init() {
    let transport = FakeTransport::accepting();
    let binding = KnativeBinding::with_transport(template_settings(), transport.clone());

    let err = binding
        .invoke(&InvokeContext::new(), &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, BindingError::NotInitialized));
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test]
async fn test_invoke_unsupported_operation() {
    let transport = FakeTransport::accepting();
    let binding = initialized_binding(transport.clone()).await;

    let err = binding
        .invoke(&InvokeContext::new(), &InvokeRequest::new(OperationKind::Delete, "{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, BindingError::UnsupportedOperation(ref op) if op == "delete"));
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test]
async fn test_accepted_delivery() {
    let transport = FakeTransport::accepting();
    let binding = initialized_binding(transport.clone()).await;

    let response = binding
        .invoke(&InvokeContext::new(), &InvokeRequest::create(r#"{"orderId":42}"#))
        .await
        .unwrap();

    assert!(response.is_none());

    let sent = transport.recorder.sent();
    assert_eq!(sent.len(), 1);
    let (target, event) = &sent[0];
    assert_eq!(
        target,
        "http://kafka-broker-ingress.knative-eventing.svc.cluster.local/ns1/broker1"
    );
    assert_eq!(event.source, "/dapr/system");
    assert_eq!(event.event_type, "dev.knative.dapr.binding");
    assert_eq!(event.data, Some(json!({"orderId": 42})));
}

#[tokio::test]
async fn test_demo_payload_mode() {
    let transport = FakeTransport::accepting();
    let mut binding = KnativeBinding::with_transport(template_settings(), transport.clone());
    binding
        .init(&metadata("broker1", "ns1").with_property("payload", "demo"))
        .await
        .unwrap();

    assert_eq!(
        binding.config().map(|c| c.payload_mode),
        Some(PayloadMode::Demo)
    );

    binding
        .invoke(&InvokeContext::new(), &InvokeRequest::create("ignored"))
        .await
        .unwrap();

    let (_, event) = &transport.recorder.sent()[0];
    assert_eq!(event.data, Some(json!({"hello": "Dapr"})));
}

#[tokio::test]
async fn test_undelivered_is_returned_not_fatal() {
    let transport = FakeTransport::new(DeliveryResult::Undelivered {
        reason: "Connection error: connection refused".to_string(),
    });
    let binding = initialized_binding(transport.clone()).await;

    for _ in 0..2 {
        let err = binding
            .invoke(&InvokeContext::new(), &InvokeRequest::create("{}"))
            .await
            .unwrap_err();

        match err {
            BindingError::DeliveryFailed { target, reason } => {
                assert!(target.ends_with("/ns1/broker1"));
                assert!(reason.contains("connection refused"));
            }
            other => panic!("expected DeliveryFailed, got {:?}", other),
        }
    }

    // Still here, and the binding kept accepting invocations
    assert_eq!(transport.recorder.count(), 2);
}

#[tokio::test]
async fn test_rejected_delivery() {
    let transport = FakeTransport::new(DeliveryResult::Rejected {
        status: 404,
        message: "HTTP 404".to_string(),
    });
    let binding = initialized_binding(transport).await;

    let err = binding
        .invoke(&InvokeContext::new(), &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, BindingError::DeliveryFailed { ref reason, .. } if reason == "HTTP 404"));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_broker_not_found_skips_delivery() {
    let transport = FakeTransport::accepting();
    let resolver = Arc::new(MissingBrokerResolver {
        calls: AtomicUsize::new(0),
    });
    let mut binding = KnativeBinding::with_transport(BindingSettings::default(), transport.clone())
        .with_resolver(resolver.clone());
    binding.init(&metadata("ghost", "ns1")).await.unwrap();

    let err = binding
        .invoke(&InvokeContext::new(), &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BindingError::BrokerNotFound { ref namespace, ref broker } if namespace == "ns1" && broker == "ghost"
    ));
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test]
async fn test_cancelled_before_send() {
    let transport = FakeTransport::accepting();
    let binding = initialized_binding(transport.clone()).await;

    let token = CancellationToken::new();
    token.cancel();
    let ctx = InvokeContext::new().with_cancellation(token);

    let err = binding
        .invoke(&ctx, &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(err, BindingError::Cancelled(_)));
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_slow_delivery() {
    let transport = FakeTransport::slow(Duration::from_secs(60));
    let binding = initialized_binding(transport.clone()).await;

    let ctx = InvokeContext::new().with_timeout(Duration::from_secs(1));
    let err = binding
        .invoke(&ctx, &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BindingError::Cancelled(kb_common::Interrupted::DeadlineExceeded)
    ));
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_aborts_slow_lookup() {
    let transport = FakeTransport::accepting();
    let resolver = Arc::new(SlowResolver {
        delay: Duration::from_secs(60),
        finished: AtomicUsize::new(0),
    });
    let mut binding = KnativeBinding::with_transport(BindingSettings::default(), transport.clone())
        .with_resolver(resolver.clone());
    binding.init(&metadata("broker1", "ns1")).await.unwrap();

    let ctx = InvokeContext::new().with_timeout(Duration::from_secs(1));
    let err = binding
        .invoke(&ctx, &InvokeRequest::create("{}"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BindingError::Cancelled(kb_common::Interrupted::DeadlineExceeded)
    ));
    assert_eq!(resolver.finished.load(Ordering::SeqCst), 0);
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test]
async fn test_cancellation_aborts_slow_lookup() {
    let transport = FakeTransport::accepting();
    let resolver = Arc::new(SlowResolver {
        delay: Duration::from_secs(60),
        finished: AtomicUsize::new(0),
    });
    let mut binding = KnativeBinding::with_transport(BindingSettings::default(), transport.clone())
        .with_resolver(resolver.clone());
    binding.init(&metadata("broker1", "ns1")).await.unwrap();

    let token = CancellationToken::new();
    let ctx = InvokeContext::new().with_cancellation(token.clone());
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = binding
        .invoke(&ctx, &InvokeRequest::create("{}"))
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, BindingError::Cancelled(kb_common::Interrupted::Cancelled)));
    assert_eq!(resolver.finished.load(Ordering::SeqCst), 0);
    assert_eq!(transport.recorder.count(), 0);
}

#[tokio::test]
async fn test_concurrent_invocations_share_binding() {
    let transport = FakeTransport::accepting();
    let binding = Arc::new(initialized_binding(transport.clone()).await);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let binding = binding.clone();
            tokio::spawn(async move {
                binding
                    .invoke(
                        &InvokeContext::new(),
                        &InvokeRequest::create(format!(r#"{{"n":{}}}"#, i)),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    let sent = transport.recorder.sent();
    assert_eq!(sent.len(), 8);
    let mut ids: Vec<_> = sent.iter().map(|(_, e)| e.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn test_transport_construction_failure_is_visible() {
    let mut settings = BindingSettings::default();
    settings.http.user_agent = "bad\nagent".to_string();

    let result = KnativeBinding::new(settings);

    assert!(matches!(result, Err(BindingError::TransportConstructionFailed(_))));
}

#[tokio::test]
async fn test_constructor_with_default_settings() {
    kb_common::logging::init_test_logging();
    assert!(KnativeBinding::new(BindingSettings::default()).is_ok());
}
