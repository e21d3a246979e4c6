//! The scheduling and execution engine.
//!
//! A single control loop polls the descriptor store on a fixed tick, works
//! out which checks are due and hands each one to its own task. The loop
//! never waits on an execution: results find their way to the result store
//! and the broadcaster from the execution task.

mod dispatch;
mod plan;
mod settings;

pub use settings::SchedulerSettings;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::clock::{Clock, SystemClock};
use crate::descriptor::CheckDescriptor;
use crate::registry::ExecutorRegistry;
use crate::store::{DescriptorStore, ResultStore};

use dispatch::{Counters, Execution, InFlightGuard};
use plan::SchedulePlan;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Snapshot of the scheduler's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub dispatched: u64,
    pub completed: u64,
    /// Executions that errored, panicked or timed out
    pub faults: u64,
    /// Due checks skipped because the previous run was still outstanding
    pub skipped_overlap: u64,
    /// Due checks skipped because no executor handles their type
    pub skipped_unresolved: u64,
}

pub struct Scheduler {
    descriptors: Arc<dyn DescriptorStore>,
    results: Arc<dyn ResultStore>,
    registry: Arc<ExecutorRegistry>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    plan: SchedulePlan,
    permits: Arc<Semaphore>,
    running: Arc<DashSet<String>>,
    tasks: JoinSet<()>,
    /// Handed to every execution, cancelled on shutdown
    executions: CancellationToken,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Create a scheduler with default settings and the wall clock
    pub fn new(
        descriptors: Arc<dyn DescriptorStore>,
        results: Arc<dyn ResultStore>,
        registry: Arc<ExecutorRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let settings = SchedulerSettings::default();
        Self {
            descriptors,
            results,
            registry,
            broadcaster,
            clock: Arc::new(SystemClock),
            plan: SchedulePlan::new(settings.min_interval, settings.cron_fallback),
            permits: Arc::new(Semaphore::new(settings.max_concurrency.max(1))),
            settings,
            running: Arc::new(DashSet::new()),
            tasks: JoinSet::new(),
            executions: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Replace the settings. Call before the first poll: scheduling state
    /// is reset.
    ///
    /// A zero poll interval is raised to 1ms and `max_concurrency` is held
    /// within `1..=Semaphore::MAX_PERMITS`.
    pub fn with_settings(mut self, mut settings: SchedulerSettings) -> Self {
        settings.poll_interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
        settings.max_concurrency = settings.max_concurrency.clamp(1, Semaphore::MAX_PERMITS);

        self.plan = SchedulePlan::new(settings.min_interval, settings.cron_fallback);
        self.permits = Arc::new(Semaphore::new(settings.max_concurrency));
        self.settings = settings;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Next run of a check, if the scheduler is tracking it
    pub fn next_run_at(&self, check_id: &str) -> Option<DateTime<Utc>> {
        self.plan.next_run_at(check_id)
    }

    /// Dispatched executions that have not been reaped yet
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Relaxed);
        SchedulerStats {
            dispatched: load(&self.counters.dispatched),
            completed: load(&self.counters.completed),
            faults: load(&self.counters.faults),
            skipped_overlap: load(&self.counters.skipped_overlap),
            skipped_unresolved: load(&self.counters.skipped_unresolved),
        }
    }

    /// Poll until `shutdown` is cancelled, then cancel outstanding
    /// executions and wait for them up to the shutdown grace period.
    pub async fn run(mut self, shutdown: CancellationToken) -> SchedulerStats {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_concurrency = self.settings.max_concurrency,
            executors = ?self.registry.registered_types(),
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        self.drain().await;
        let stats = self.stats();
        info!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            faults = stats.faults,
            "Scheduler stopped"
        );
        stats
    }

    /// Run one poll tick: dispatch every due check. Returns how many
    /// executions were started.
    pub async fn poll_once(&mut self) -> usize {
        self.reap_finished();

        let descriptors = self.descriptors.list().await;
        let now = self.clock.now();
        let due: Vec<CheckDescriptor> =
            self.plan.due(now, &descriptors).into_iter().cloned().collect();

        let due_count = due.len();
        let mut dispatched = 0;
        for descriptor in due {
            if self.dispatch(descriptor) {
                dispatched += 1;
            }
        }

        let stats = self.stats();
        debug!(
            descriptors = descriptors.len(),
            tracked = self.plan.len(),
            due = due_count,
            dispatched,
            outstanding = self.tasks.len(),
            total_dispatched = stats.dispatched,
            completed = stats.completed,
            faults = stats.faults,
            skipped_overlap = stats.skipped_overlap,
            skipped_unresolved = stats.skipped_unresolved,
            "Poll tick"
        );
        dispatched
    }

    fn dispatch(&mut self, descriptor: CheckDescriptor) -> bool {
        let Some(executor) = self.registry.resolve(&descriptor.check_type) else {
            Counters::bump(&self.counters.skipped_unresolved);
            warn!(
                check_id = %descriptor.id,
                check_type = %descriptor.check_type,
                "No executor registered for check type, skipping"
            );
            return false;
        };

        let in_flight = if self.settings.skip_overlapping {
            match InFlightGuard::acquire(&self.running, &descriptor.id) {
                Some(guard) => Some(guard),
                None => {
                    Counters::bump(&self.counters.skipped_overlap);
                    info!(check_id = %descriptor.id, "Previous run still in flight, skipping this one");
                    return false;
                }
            }
        } else {
            None
        };

        debug!(check_id = %descriptor.id, check_type = %descriptor.check_type, "Dispatching check");
        let execution = Execution {
            descriptor,
            executor,
            results: self.results.clone(),
            broadcaster: self.broadcaster.clone(),
            permits: self.permits.clone(),
            cancel: self.executions.clone(),
            timeout: self.settings.execution_timeout,
            counters: self.counters.clone(),
        };
        self.tasks.spawn(execution.run(in_flight));
        Counters::bump(&self.counters.dispatched);
        true
    }

    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(join_error) = joined {
                if join_error.is_panic() {
                    error!("Execution task panicked outside the executor: {join_error}");
                }
            }
        }
    }

    async fn drain(&mut self) {
        self.executions.cancel();
        if self.tasks.is_empty() {
            return;
        }

        info!(outstanding = self.tasks.len(), "Waiting for outstanding checks to stop");
        let grace = self.settings.shutdown_grace;
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace_ms = grace.as_millis() as u64,
                "Shutdown grace elapsed, aborting remaining checks"
            );
            self.tasks.shutdown().await;
        }
    }
}
