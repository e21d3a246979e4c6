//! When each descriptor runs next.
//!
//! Pure bookkeeping with no I/O: given the current descriptors and "now",
//! decide which are due and move their next run forward.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::cron::{CronError, CronExpression};
use crate::descriptor::{CheckDescriptor, Schedule};

#[derive(Debug)]
struct Entry {
    /// Schedule `next_run_at` was computed from
    schedule: Schedule,
    next_run_at: DateTime<Utc>,
    /// Parsed on first use and kept for the lifetime of the entry
    cron: Option<Result<CronExpression, CronError>>,
}

#[derive(Debug)]
pub(crate) struct SchedulePlan {
    entries: HashMap<String, Entry>,
    min_interval: Duration,
    cron_fallback: Duration,
}

impl SchedulePlan {
    pub(crate) fn new(min_interval: Duration, cron_fallback: Duration) -> Self {
        Self { entries: HashMap::new(), min_interval, cron_fallback }
    }

    /// Descriptors due at `now`, in input order. Each returned descriptor
    /// has its next run recomputed.
    pub(crate) fn due<'a>(
        &mut self,
        now: DateTime<Utc>,
        descriptors: &'a [CheckDescriptor],
    ) -> Vec<&'a CheckDescriptor> {
        self.reconcile(descriptors);

        let (min_interval, cron_fallback) = (self.min_interval, self.cron_fallback);
        let mut due = Vec::new();
        for descriptor in descriptors.iter().filter(|d| d.enabled) {
            let entry = self.entries.entry(descriptor.id.clone()).or_insert_with(|| Entry {
                schedule: descriptor.schedule.clone(),
                next_run_at: now,
                cron: None,
            });

            if now >= entry.next_run_at {
                entry.next_run_at =
                    next_run_at(entry, &descriptor.id, now, min_interval, cron_fallback);
                due.push(descriptor);
            }
        }
        due
    }

    pub(crate) fn next_run_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(id).map(|entry| entry.next_run_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop state of descriptors that disappeared or were disabled, and of
    /// those whose schedule changed so the new schedule applies right away.
    fn reconcile(&mut self, descriptors: &[CheckDescriptor]) {
        let live: HashMap<&str, &Schedule> = descriptors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| (d.id.as_str(), &d.schedule))
            .collect();

        self.entries.retain(|id, entry| match live.get(id.as_str()) {
            Some(schedule) if **schedule == entry.schedule => true,
            Some(schedule) => {
                debug!(check_id = %id, from = %entry.schedule, to = %schedule, "Schedule changed, rescheduling");
                false
            }
            None => {
                debug!(check_id = %id, "Check removed or disabled, dropping its schedule");
                false
            }
        });
    }
}

fn next_run_at(
    entry: &mut Entry,
    id: &str,
    now: DateTime<Utc>,
    min_interval: Duration,
    cron_fallback: Duration,
) -> DateTime<Utc> {
    match &entry.schedule {
        Schedule::Interval(every) => offset(now, (*every).max(min_interval)),
        Schedule::Cron(expression) => {
            let parsed = entry.cron.get_or_insert_with(|| CronExpression::parse(expression));
            match parsed {
                Ok(cron) => cron.next_after(now).unwrap_or_else(|| {
                    warn!(
                        check_id = %id,
                        cron = %expression,
                        retry_in_secs = cron_fallback.as_secs(),
                        "Cron expression has no upcoming occurrence"
                    );
                    offset(now, cron_fallback)
                }),
                Err(error) => {
                    warn!(
                        check_id = %id,
                        cron = %expression,
                        retry_in_secs = cron_fallback.as_secs(),
                        "Invalid cron expression: {error}"
                    );
                    offset(now, cron_fallback)
                }
            }
        }
    }
}

fn offset(now: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| now.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
