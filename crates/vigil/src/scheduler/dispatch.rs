//! One dispatched execution: admission, fault boundary, result routing.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broadcast::Broadcaster;
use crate::descriptor::CheckDescriptor;
use crate::executor::CheckExecutor;
use crate::result::CheckResult;
use crate::store::ResultStore;

/// Marks a check id as running for as long as it is alive
pub(super) struct InFlightGuard {
    running: Arc<DashSet<String>>,
    id: String,
}

impl InFlightGuard {
    /// `None` when the id is already running
    pub(super) fn acquire(running: &Arc<DashSet<String>>, id: &str) -> Option<Self> {
        running
            .insert(id.to_string())
            .then(|| Self { running: running.clone(), id: id.to_string() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}

#[derive(Debug, Default)]
pub(super) struct Counters {
    pub(super) dispatched: AtomicU64,
    pub(super) completed: AtomicU64,
    pub(super) faults: AtomicU64,
    pub(super) skipped_overlap: AtomicU64,
    pub(super) skipped_unresolved: AtomicU64,
}

impl Counters {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum Outcome {
    Completed(CheckResult),
    Fault(String),
    Panicked(String),
    TimedOut(Duration),
}

pub(super) struct Execution {
    pub(super) descriptor: CheckDescriptor,
    pub(super) executor: Arc<dyn CheckExecutor>,
    pub(super) results: Arc<dyn ResultStore>,
    pub(super) broadcaster: Arc<dyn Broadcaster>,
    pub(super) permits: Arc<Semaphore>,
    pub(super) cancel: CancellationToken,
    pub(super) timeout: Option<Duration>,
    pub(super) counters: Arc<Counters>,
}

impl Execution {
    pub(super) async fn run(self, _in_flight: Option<InFlightGuard>) {
        let Execution { descriptor, executor, results, broadcaster, permits, cancel, timeout, counters } =
            self;

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(check_id = %descriptor.id, "Shutdown before check started, dropping it");
                return;
            }
            permit = permits.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(check_id = %descriptor.id, "Shutdown while check was running, abandoning it");
                return;
            }
            outcome = guarded(executor.as_ref(), &descriptor, &cancel, timeout) => outcome,
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Outcome::Completed(result) if result.check_id == descriptor.id => result,
            Outcome::Completed(mut result) => {
                warn!(
                    check_id = %descriptor.id,
                    reported = %result.check_id,
                    "Executor reported a result for another check, re-tagging it"
                );
                result.check_id = descriptor.id.clone();
                result
            }
            Outcome::Fault(message) => {
                Counters::bump(&counters.faults);
                error!(check_id = %descriptor.id, check_type = %descriptor.check_type, "Check faulted: {message}");
                CheckResult::unhealthy(&descriptor.id, format!("Exception: {message}"))
            }
            Outcome::Panicked(message) => {
                Counters::bump(&counters.faults);
                error!(check_id = %descriptor.id, check_type = %descriptor.check_type, "Check panicked: {message}");
                CheckResult::unhealthy(&descriptor.id, format!("Exception: executor panicked: {message}"))
            }
            Outcome::TimedOut(limit) => {
                Counters::bump(&counters.faults);
                warn!(check_id = %descriptor.id, timeout_ms = limit.as_millis() as u64, "Check timed out");
                CheckResult::unhealthy(
                    &descriptor.id,
                    format!("Timed out after {}ms", limit.as_millis()),
                )
                .with_metric("latency_ms", elapsed_ms)
            }
        };

        debug!(
            check_id = %result.check_id,
            status = %result.status,
            elapsed_ms,
            "Check finished"
        );
        Counters::bump(&counters.completed);

        results.append(result.clone()).await;
        broadcaster.publish(&result);
    }
}

/// Run the executor, turning errors, panics and an expired deadline into
/// an [`Outcome`]
async fn guarded(
    executor: &dyn CheckExecutor,
    descriptor: &CheckDescriptor,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Outcome {
    let call = AssertUnwindSafe(executor.execute(descriptor, cancel)).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(caught) => caught,
            Err(_) => return Outcome::TimedOut(limit),
        },
        None => call.await,
    };

    match caught {
        Ok(Ok(result)) => Outcome::Completed(result),
        Ok(Err(error)) => Outcome::Fault(error.to_string()),
        Err(panic) => Outcome::Panicked(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_released_on_drop() {
        let running = Arc::new(DashSet::new());

        let guard = InFlightGuard::acquire(&running, "a");
        assert!(guard.is_some());
        assert!(InFlightGuard::acquire(&running, "a").is_none());
        assert!(InFlightGuard::acquire(&running, "b").is_some());

        drop(guard);
        assert!(InFlightGuard::acquire(&running, "a").is_some());
    }

    #[test]
    fn panic_messages_are_extracted() {
        let from_str = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(from_str.as_ref()), "boom");

        let from_string = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(panic_message(from_string.as_ref()), "code 7");
    }
}
