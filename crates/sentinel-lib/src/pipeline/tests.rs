use super::*;
use crate::action::{ActionKind, PolicyRejection};
use crate::advisory::{AdviceSeverity, ProviderError};
use crate::bus::ChannelBus;
use crate::models::{ContainerDescriptor, LifecycleEvent, LogStream, Severity};
use crate::runtime::tests::{wait_until, MockRuntime};
use crate::runtime::{
    encode_frame, ContainerFilter, ContainerRuntime, LifecycleEventStream, LogChunkStream,
    RuntimeResult, StreamSupervisor, SupervisorConfig,
};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

type Script = Box<dyn Fn(&AnalysisContext) -> Result<String, ProviderError> + Send + Sync>;

/// Provider answering from a closure
struct ScriptedProvider {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn answering(raw: &'static str) -> Self {
        Self {
            script: Box::new(move |_| Ok(raw.to_string())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn diagnose(&self, context: &AnalysisContext) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(context)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

const DB_OUTAGE: &str = r#"```json
{"summary":"DB outage","severity":"high","confidence":0.9,"shouldIgnore":false}
```"#;

fn raw(message: &str) -> RawLine {
    RawLine {
        container_id: "c1".to_string(),
        container_name: "api".to_string(),
        timestamp: Utc::now(),
        stream: LogStream::Stdout,
        message: message.to_string(),
    }
}

fn classified(message: &str) -> ClassifiedLine {
    LogClassifier::new().classify(parse_line(raw(message)))
}

fn control_loop(provider: Arc<ScriptedProvider>, runtime: Arc<MockRuntime>) -> ControlLoop {
    ControlLoop::new(
        provider,
        ActionExecutor::new(runtime),
        Arc::new(CooldownStore::new()),
        LoopConfig::default(),
    )
}

#[tokio::test]
async fn test_database_timeout_ends_in_skipped_noop() {
    let provider = Arc::new(ScriptedProvider::answering(DB_OUTAGE));
    let runtime = Arc::new(MockRuntime::default());
    runtime.add("c1", "api", &[]);
    let control = control_loop(provider.clone(), runtime.clone());

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        let line = classified("Database connection timeout");
        assert_eq!(line.severity, Severity::Error);
        outcomes.extend(control.ingest(line).await);
    }

    let CycleOutcome::Handled {
        advice,
        decision,
        action,
    } = &outcomes[0]
    else {
        panic!("expected the first cycle to reach the policy, got {:?}", outcomes[0]);
    };
    assert_eq!(advice.severity, AdviceSeverity::Critical);
    assert_eq!(advice.explanation, "DB outage");
    assert_eq!(action.proposal.action, ActionKind::Noop);
    assert_eq!(decision.reason, Some(PolicyRejection::Noop));
    assert!(!action.executed);
    assert_eq!(action.skipped_reason.as_deref(), Some("No-op action"));

    // Identical advice inside the cooldown window is suppressed
    assert!(outcomes[1..]
        .iter()
        .all(|o| matches!(o, CycleOutcome::AdviceSuppressed { .. })));
    assert!(runtime.restarts.lock().is_empty());

    let decisions = control.recent_decisions();
    assert_eq!(decisions[0].action, "policy_rejected");
    assert!(decisions[0]
        .explain_why
        .reasons
        .iter()
        .any(|r| r == "No-op action"));
    assert_eq!(decisions[0].explain_why.signals["container"], "api");
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn test_memory_advice_restarts_container() {
    let provider = Arc::new(ScriptedProvider::answering(
        r#"{"summary":"Memory usage grows until the worker is killed","severity":"high","confidence":0.9}"#,
    ));
    let runtime = Arc::new(MockRuntime::default());
    runtime.add("c1", "api", &[]);
    let control = control_loop(provider, runtime.clone());

    let outcome = control
        .ingest(classified("FATAL: out of memory"))
        .await
        .expect("critical line triggers analysis");

    let action = outcome.action().expect("action handled");
    assert_eq!(action.proposal.action, ActionKind::RestartContainer);
    assert!(action.executed);
    assert_eq!(*runtime.restarts.lock(), vec!["c1".to_string()]);
    assert_eq!(control.policy().history().len(), 1);
    assert_eq!(
        control.recent_decisions().last().map(|d| d.action.clone()),
        Some("action_executed".to_string())
    );
}

#[tokio::test]
async fn test_low_confidence_diagnosis_is_ignored() {
    let provider = Arc::new(ScriptedProvider::answering(
        r#"{"summary":"maybe","severity":"high","confidence":0.59}"#,
    ));
    let control = control_loop(provider, Arc::new(MockRuntime::default()));

    let outcome = control
        .ingest(classified("Database connection timeout"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::AdviceIgnored(IgnoreReason::LowConfidence { .. })
    ));
    assert_eq!(control.recent_decisions()[0].action, "advice_ignored");
}

#[tokio::test]
async fn test_garbage_diagnosis_is_ignored() {
    let provider = Arc::new(ScriptedProvider::answering("I could not decide"));
    let control = control_loop(provider, Arc::new(MockRuntime::default()));

    let outcome = control
        .ingest(classified("Database connection timeout"))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::AdviceIgnored(IgnoreReason::Unparseable(_))
    ));
}

#[tokio::test]
async fn test_provider_failure_and_timeout_drop_the_cycle() {
    let failing = Arc::new(ScriptedProvider {
        script: Box::new(|_| Err(ProviderError::EmptyResponse)),
        delay: None,
        calls: AtomicUsize::new(0),
    });
    let control = control_loop(failing, Arc::new(MockRuntime::default()));
    let outcome = control
        .ingest(classified("Database connection timeout"))
        .await
        .unwrap();
    assert!(matches!(outcome, CycleOutcome::DiagnosisFailed { .. }));

    let slow = Arc::new(ScriptedProvider {
        script: Box::new(|_| Ok(DB_OUTAGE.to_string())),
        delay: Some(Duration::from_secs(5)),
        calls: AtomicUsize::new(0),
    });
    let control = ControlLoop::new(
        slow,
        ActionExecutor::new(Arc::new(MockRuntime::default())),
        Arc::new(CooldownStore::new()),
        LoopConfig {
            ai_timeout: Duration::from_millis(20),
            ..Default::default()
        },
    );
    let CycleOutcome::DiagnosisFailed { reason } = control
        .ingest(classified("Database connection timeout"))
        .await
        .unwrap()
    else {
        panic!("expected a diagnosis failure");
    };
    assert!(reason.contains("timed out"));
    assert_eq!(control.recent_decisions()[0].action, "diagnosis_failed");
}

#[tokio::test]
async fn test_lines_are_published_and_bus_failures_do_not_block_analysis() {
    let provider = Arc::new(ScriptedProvider::answering(DB_OUTAGE));
    let (bus, mut rx) = ChannelBus::new(8);
    let control = control_loop(provider.clone(), Arc::new(MockRuntime::default()))
        .with_bus(Arc::new(bus));

    assert!(control.ingest(classified("Server started")).await.is_none());
    let message = rx.recv().await.unwrap();
    assert_eq!(message.attributes["severity"], "INFO");

    drop(rx);
    let outcome = control.ingest(classified("Database connection timeout")).await;
    assert!(outcome.is_some());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_stream_end_discards_window() {
    let provider = Arc::new(ScriptedProvider::answering(DB_OUTAGE));
    let control = control_loop(provider.clone(), Arc::new(MockRuntime::default()));

    control.on_line(raw("Server started")).await;
    control.on_line(raw("Listening on :8080")).await;
    assert_eq!(control.windower().buffered("c1"), 2);

    control.on_stream_end("c1").await;
    assert_eq!(control.windower().buffered("c1"), 0);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_supervised_stream_feeds_the_loop() {
    let provider = Arc::new(ScriptedProvider::answering(DB_OUTAGE));
    let runtime = Arc::new(MockRuntime::default());
    runtime.add("c1", "api", &[]);
    let control = Arc::new(control_loop(provider.clone(), runtime.clone()));

    let supervisor = StreamSupervisor::new(
        runtime.clone(),
        control.clone(),
        ContainerFilter::default(),
        SupervisorConfig::default(),
    );
    assert!(supervisor.ensure_streaming("c1").await.unwrap());
    wait_until(|| runtime.sender("c1").is_some()).await;

    let frame = encode_frame(2, b"upstream request timed out\n");
    let tx = runtime.sender("c1").unwrap();
    tx.send(Ok(Bytes::copy_from_slice(&frame[..5]))).unwrap();
    tx.send(Ok(Bytes::copy_from_slice(&frame[5..]))).unwrap();

    wait_until(|| provider.calls() == 1).await;
    wait_until(|| !control.recent_decisions().is_empty()).await;
    assert_eq!(control.recent_decisions()[0].action, "policy_rejected");

    supervisor.shutdown_all();
}

/// Runtime that reports the container as dead while a restart is in flight
struct RestartingRuntime {
    inner: Arc<MockRuntime>,
    events: mpsc::UnboundedSender<RuntimeResult<LifecycleEvent>>,
}

#[async_trait]
impl ContainerRuntime for RestartingRuntime {
    async fn list_containers(&self, all: bool) -> RuntimeResult<Vec<ContainerDescriptor>> {
        self.inner.list_containers(all).await
    }

    async fn inspect(&self, container_id: &str) -> RuntimeResult<ContainerDescriptor> {
        self.inner.inspect(container_id).await
    }

    async fn stream_logs(&self, container_id: &str) -> RuntimeResult<LogChunkStream> {
        self.inner.stream_logs(container_id).await
    }

    async fn watch_events(&self) -> RuntimeResult<LifecycleEventStream> {
        self.inner.watch_events().await
    }

    async fn restart(&self, container_id: &str) -> RuntimeResult<()> {
        let _ = self.events.send(Ok(LifecycleEvent {
            kind: "container".to_string(),
            action: "die".to_string(),
            actor_id: container_id.to_string(),
            attributes: HashMap::new(),
        }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.inner.restart(container_id).await
    }

    async fn ping(&self) -> RuntimeResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_restart_completes_when_its_stream_is_aborted() {
    let provider = Arc::new(ScriptedProvider::answering(
        r#"{"summary":"Memory usage grows until the worker is killed","severity":"high","confidence":0.9}"#,
    ));
    let mock = Arc::new(MockRuntime::default());
    mock.add("c1", "api", &[]);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    *mock.events.lock() = Some(event_rx);
    let runtime = Arc::new(RestartingRuntime {
        inner: mock.clone(),
        events: event_tx,
    });

    let control = Arc::new(ControlLoop::new(
        provider,
        ActionExecutor::new(runtime.clone()),
        Arc::new(CooldownStore::new()),
        LoopConfig::default(),
    ));
    let supervisor = Arc::new(StreamSupervisor::new(
        runtime,
        control.clone(),
        ContainerFilter::default(),
        SupervisorConfig {
            poll_interval: Duration::from_millis(20),
            event_retry_delay: Duration::from_millis(20),
            ..Default::default()
        },
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = tokio::spawn(supervisor.clone().run(shutdown_tx.subscribe()));

    wait_until(|| mock.sender("c1").is_some()).await;
    let frame = encode_frame(1, b"FATAL: out of memory\n");
    mock.sender("c1")
        .unwrap()
        .send(Ok(Bytes::copy_from_slice(&frame)))
        .unwrap();

    wait_until(|| {
        control
            .recent_decisions()
            .iter()
            .any(|d| d.action == "action_executed")
    })
    .await;
    assert_eq!(*mock.restarts.lock(), vec!["c1".to_string()]);
    assert_eq!(control.policy().history().len(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}
