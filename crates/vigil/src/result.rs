use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single check execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// The probed operation completed and met its success criteria
    Healthy,
    /// Explicitly partial or borderline, neither clear success nor failure
    Degraded,
    /// The probed operation failed or faulted
    Unhealthy,
    /// Could not be determined: missing configuration, target not found
    Unknown,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Healthy => write!(f, "healthy"),
            CheckStatus::Degraded => write!(f, "degraded"),
            CheckStatus::Unhealthy => write!(f, "unhealthy"),
            CheckStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of one check execution, immutable once produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Id of the descriptor that produced this result. The descriptor may
    /// no longer exist.
    pub check_id: String,

    /// Completion time
    pub observed_at: DateTime<Utc>,

    pub status: CheckStatus,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Numeric measurements such as `latency_ms`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,

    /// Labels such as `url` or `status_code`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimensions: BTreeMap<String, String>,
}

impl CheckResult {
    /// Create a result observed now
    pub fn new(check_id: impl Into<String>, status: CheckStatus) -> Self {
        Self {
            check_id: check_id.into(),
            observed_at: Utc::now(),
            status,
            message: None,
            metrics: BTreeMap::new(),
            dimensions: BTreeMap::new(),
        }
    }

    pub fn healthy(check_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check_id, CheckStatus::Healthy).with_message(message)
    }

    pub fn degraded(check_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check_id, CheckStatus::Degraded).with_message(message)
    }

    pub fn unhealthy(check_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check_id, CheckStatus::Unhealthy).with_message(message)
    }

    pub fn unknown(check_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check_id, CheckStatus::Unknown).with_message(message)
    }

    /// Unknown result naming the parameters an executor needed but did not get
    pub fn missing_parameters(check_id: impl Into<String>, keys: &[&str]) -> Self {
        Self::unknown(check_id, format!("{} missing", keys.join(" or ")))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Override the observation time
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_displays_lowercase() {
        assert_eq!(CheckStatus::Healthy.to_string(), "healthy");
        assert_eq!(CheckStatus::Unhealthy.to_string(), "unhealthy");
        assert_eq!(serde_json::to_string(&CheckStatus::Degraded).unwrap(), "\"degraded\"");
    }

    #[test]
    fn missing_parameters_message_names_keys() {
        let result = CheckResult::missing_parameters("job-1", &["connectionString", "jobName"]);
        assert_eq!(result.status, CheckStatus::Unknown);
        assert_eq!(result.message.as_deref(), Some("connectionString or jobName missing"));
    }

    #[test]
    fn empty_maps_are_not_serialized() {
        let value = serde_json::to_value(CheckResult::healthy("a", "ok")).unwrap();
        assert!(value.get("metrics").is_none());
        assert!(value.get("dimensions").is_none());

        let value = serde_json::to_value(
            CheckResult::healthy("a", "ok")
                .with_metric("latency_ms", 12.5)
                .with_dimension("url", "https://example.com"),
        )
        .unwrap();
        assert_eq!(value["metrics"]["latency_ms"], 12.5);
        assert_eq!(value["dimensions"]["url"], "https://example.com");
    }
}
