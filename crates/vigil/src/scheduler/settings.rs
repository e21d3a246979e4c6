use std::time::Duration;

/// Tuning knobs of the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// How often the descriptor store is polled for due checks
    pub poll_interval: Duration,

    /// Floor applied to interval schedules
    pub min_interval: Duration,

    /// Delay before retrying a cron schedule that is malformed or has no
    /// upcoming occurrence
    pub cron_fallback: Duration,

    /// Upper bound on executions running at the same time
    pub max_concurrency: usize,

    /// Skip a due check while its previous run is still outstanding
    pub skip_overlapping: bool,

    /// Deadline for a single execution, `None` for no deadline
    pub execution_timeout: Option<Duration>,

    /// How long shutdown waits for cancelled executions to wind down
    pub shutdown_grace: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(5),
            cron_fallback: Duration::from_secs(5 * 60),
            max_concurrency: 32,
            skip_overlapping: true,
            execution_timeout: Some(Duration::from_secs(30)),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}
