use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Interval used when a definition carries neither an interval nor a cron expression
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// When a check should run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Schedule {
    /// Fixed delay between dispatches, floored by the scheduler
    Interval(Duration),
    /// Calendar pattern, see [`crate::cron::CronExpression`]
    Cron(String),
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Interval(DEFAULT_INTERVAL)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Interval(every) => write!(f, "every {}s", every.as_secs_f64()),
            Schedule::Cron(expression) => write!(f, "cron '{expression}'"),
        }
    }
}

/// Declarative definition of one monitored target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckDescriptor {
    /// Unique, stable identifier (primary key)
    pub id: String,

    /// Selects the executor, matched case-insensitively
    pub check_type: String,

    /// Human readable label
    pub name: String,

    pub schedule: Schedule,

    /// Executor specific settings, opaque to the scheduler
    pub parameters: BTreeMap<String, String>,

    /// Informational only
    pub tags: Vec<String>,

    /// Disabled descriptors are never dispatched
    pub enabled: bool,
}

impl CheckDescriptor {
    /// Create an enabled descriptor on the default interval
    pub fn new(id: impl Into<String>, check_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            check_type: check_type.into(),
            name: name.into(),
            schedule: Schedule::default(),
            parameters: BTreeMap::new(),
            tags: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_interval(mut self, every: Duration) -> Self {
        self.schedule = Schedule::Interval(every);
        self
    }

    pub fn with_cron(mut self, expression: impl Into<String>) -> Self {
        self.schedule = Schedule::Cron(expression.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    /// Look up a parameter, treating blank values as missing
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Parse a parameter, falling back to `default` when it is missing or unparsable
    pub fn parameter_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.parameter(key)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(default)
    }
}
