//! Executors and wiring shared by the scheduler scenarios.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use vigil::{
    CancellationToken, ChannelBroadcaster, CheckDescriptor, CheckExecutor, CheckResult,
    ExecutorError, ExecutorRegistry, InMemoryDescriptorStore, InMemoryResultStore,
    MonotonicClock, Scheduler, SchedulerSettings,
};

/// Always healthy, records when it was called
#[derive(Default)]
pub struct RecordingPing {
    pub calls: Mutex<Vec<(String, Instant)>>,
}

impl RecordingPing {
    pub fn calls_for(&self, id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(check_id, _)| check_id == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait::async_trait]
impl CheckExecutor for RecordingPing {
    fn check_type(&self) -> &str {
        "ping"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        self.calls.lock().unwrap().push((descriptor.id.clone(), Instant::now()));
        Ok(CheckResult::healthy(&descriptor.id, "Ping OK").with_metric("latency_ms", 10.0))
    }
}

/// Sleeps without looking at the cancellation token
pub struct Sleepy {
    pub delay: Duration,
    pub started: AtomicUsize,
    pub running: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Sleepy {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl CheckExecutor for Sleepy {
    fn check_type(&self) -> &str {
        "sleepy"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(CheckResult::healthy(&descriptor.id, "finally"))
    }
}

/// Reports an internal fault
pub struct Broken;

#[async_trait::async_trait]
impl CheckExecutor for Broken {
    fn check_type(&self) -> &str {
        "broken"
    }

    async fn execute(
        &self,
        _descriptor: &CheckDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        Err(ExecutorError::Fault("driver exploded".into()))
    }
}

/// Panics mid-execution
pub struct Panicky;

#[async_trait::async_trait]
impl CheckExecutor for Panicky {
    fn check_type(&self) -> &str {
        "panicky"
    }

    async fn execute(
        &self,
        _descriptor: &CheckDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        panic!("index out of bounds")
    }
}

pub struct Harness {
    pub descriptors: Arc<InMemoryDescriptorStore>,
    pub results: Arc<InMemoryResultStore>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub scheduler: Scheduler,
}

/// Settings fast enough for second-scale scenarios
pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        poll_interval: Duration::from_millis(250),
        min_interval: Duration::from_millis(500),
        execution_timeout: Some(Duration::from_secs(30)),
        ..SchedulerSettings::default()
    }
}

pub fn harness(
    executors: Vec<Arc<dyn CheckExecutor>>,
    descriptors: Vec<CheckDescriptor>,
    settings: SchedulerSettings,
) -> Harness {
    let descriptors = Arc::new(InMemoryDescriptorStore::with_descriptors(descriptors));
    let results = Arc::new(InMemoryResultStore::new(200));
    let broadcaster = Arc::new(ChannelBroadcaster::new(1024));
    let scheduler = Scheduler::new(
        descriptors.clone(),
        results.clone(),
        Arc::new(ExecutorRegistry::new(executors)),
        broadcaster.clone(),
    )
    .with_settings(settings)
    .with_clock(Arc::new(MonotonicClock::new()));

    Harness { descriptors, results, broadcaster, scheduler }
}

/// Cancel `token` after `after` of (possibly paused) tokio time
pub fn cancel_after(token: &CancellationToken, after: Duration) {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        token.cancel();
    });
}
