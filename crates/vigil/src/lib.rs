//! vigil - check scheduling and execution engine
//!
//! Runs a heterogeneous set of checks on independent schedules, keeps a
//! bounded window of their recent results and fans every result out to live
//! subscribers.
//!
//! The pieces, leaves first:
//! - [`DescriptorStore`]: the current set of check definitions
//! - [`ResultStore`]: bounded per-check result history
//! - [`CheckExecutor`] and [`ExecutorRegistry`]: pluggable probe logic by type tag
//! - [`Scheduler`]: decides when each check runs and routes its result
//! - [`Broadcaster`]: push delivery of each new result

pub mod broadcast;
pub mod clock;
pub mod cron;
pub mod descriptor;
pub mod executor;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod store;

pub use broadcast::{Broadcaster, ChannelBroadcaster};
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use cron::{CronError, CronExpression};
pub use descriptor::{CheckDescriptor, Schedule};
pub use executor::{CheckExecutor, ExecutorError};
pub use registry::{ExecutorRegistry, RegistryBuilder};
pub use result::{CheckResult, CheckStatus};
pub use scheduler::{Scheduler, SchedulerSettings, SchedulerStats};
pub use store::{DescriptorStore, InMemoryDescriptorStore, InMemoryResultStore, ResultStore};

/// Re-exported so executor implementations share the scheduler's token type
pub use tokio_util::sync::CancellationToken;
