//! Turns `[[checks]]` tables into descriptors and hands them to the store.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;
use vigil::{CheckDescriptor, CronExpression, DescriptorStore};

use crate::config::CheckEntry;

const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("check #{index} has a blank id")]
    BlankId { index: usize },
    #[error("check #{index} reuses id '{id}'")]
    DuplicateId { index: usize, id: String },
}

/// Outcome of reading the configured checks
#[derive(Debug, Default)]
pub struct Loaded {
    pub descriptors: Vec<CheckDescriptor>,
    /// Accepted as-is, but probably not what was meant
    pub warnings: Vec<String>,
    pub rejected: Vec<LoadError>,
}

/// Build descriptors from config entries. `min_interval` is the scheduler's
/// floor, only used to warn about intervals it will raise.
pub fn parse_entries(entries: &[CheckEntry], min_interval: Duration) -> Loaded {
    let mut loaded = Loaded::default();
    let mut seen = HashSet::new();

    for (index, entry) in entries.iter().enumerate() {
        let id = match entry.id.as_deref() {
            Some(id) if id.trim().is_empty() => {
                loaded.rejected.push(LoadError::BlankId { index });
                continue;
            }
            Some(id) => id.trim().to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        if !seen.insert(id.clone()) {
            loaded.rejected.push(LoadError::DuplicateId { index, id });
            continue;
        }

        let check_type = entry.check_type.clone().unwrap_or_else(|| "unknown".to_string());
        let name = entry.name.clone().unwrap_or_else(|| id.clone());
        let mut descriptor = CheckDescriptor::new(&id, check_type, name)
            .with_enabled(entry.enabled.unwrap_or(true));

        if let Some(cron) = entry.cron.as_deref().filter(|cron| !cron.trim().is_empty()) {
            if let Err(error) = CronExpression::parse(cron) {
                loaded.warnings.push(format!(
                    "{id}: cron '{cron}' is invalid ({error}), it will run on the fallback interval"
                ));
            }
            descriptor = descriptor.with_cron(cron.trim());
        } else if let Some(seconds) = entry.interval_seconds {
            let every = Duration::from_secs(seconds);
            if let Some(warning) = validate_interval(every, min_interval) {
                loaded.warnings.push(format!("{id}: {warning}"));
            }
            descriptor = descriptor.with_interval(every);
        }

        for tag in &entry.tags {
            descriptor = descriptor.with_tag(tag);
        }
        for (key, value) in &entry.parameters {
            match parameter_string(value) {
                Some(value) => descriptor = descriptor.with_parameter(key, value),
                None => loaded
                    .warnings
                    .push(format!("{id}: parameter '{key}' is not a scalar, ignoring it")),
            }
        }

        loaded.descriptors.push(descriptor);
    }

    loaded
}

/// Log the outcome and push accepted descriptors into the store
pub async fn apply(store: &dyn DescriptorStore, loaded: Loaded) -> usize {
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    for rejected in &loaded.rejected {
        error!("Skipping check: {rejected}");
    }

    let count = loaded.descriptors.len();
    store.upsert_many(loaded.descriptors).await;
    info!(count, rejected = loaded.rejected.len(), "Loaded checks from configuration");
    count
}

fn validate_interval(every: Duration, floor: Duration) -> Option<String> {
    if every < floor {
        return Some(format!(
            "interval of {}s is below the {}s minimum and will be raised",
            every.as_secs(),
            floor.as_secs()
        ));
    }

    if every > MAX_INTERVAL {
        return Some(format!("interval of {}s is longer than 24 hours", every.as_secs()));
    }

    None
}

fn parameter_string(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(value) => Some(value.clone()),
        toml::Value::Integer(value) => Some(value.to_string()),
        toml::Value::Float(value) => Some(value.to_string()),
        toml::Value::Boolean(value) => Some(value.to_string()),
        toml::Value::Datetime(value) => Some(value.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vigil::{InMemoryDescriptorStore, Schedule};

    const FLOOR: Duration = Duration::from_secs(5);

    fn entry(id: Option<&str>) -> CheckEntry {
        CheckEntry { id: id.map(String::from), ..CheckEntry::default() }
    }

    #[test]
    fn missing_fields_get_defaults() {
        let loaded = parse_entries(&[entry(None)], FLOOR);
        let descriptor = &loaded.descriptors[0];

        assert_eq!(descriptor.id.len(), 32);
        assert!(descriptor.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(descriptor.check_type, "unknown");
        assert_eq!(descriptor.name, descriptor.id);
        assert!(descriptor.enabled);
        assert_eq!(descriptor.schedule, Schedule::default());
    }

    #[test]
    fn cron_wins_over_interval() {
        let both = CheckEntry {
            cron: Some("*/5 * * * *".into()),
            interval_seconds: Some(30),
            ..entry(Some("both"))
        };
        let loaded = parse_entries(&[both], FLOOR);

        assert_eq!(loaded.descriptors[0].schedule, Schedule::Cron("*/5 * * * *".into()));
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn suspicious_schedules_warn_but_load() {
        let entries = [
            CheckEntry { interval_seconds: Some(1), ..entry(Some("fast")) },
            CheckEntry { interval_seconds: Some(2 * 86_400), ..entry(Some("slow")) },
            CheckEntry { cron: Some("every tuesday".into()), ..entry(Some("bad-cron")) },
        ];
        let loaded = parse_entries(&entries, FLOOR);

        assert_eq!(loaded.descriptors.len(), 3);
        assert_eq!(loaded.warnings.len(), 3);
        assert!(loaded.warnings[0].starts_with("fast: interval of 1s is below"));
        assert!(loaded.warnings[2].starts_with("bad-cron: cron 'every tuesday' is invalid"));
    }

    #[test]
    fn blank_and_duplicate_ids_are_rejected() {
        let entries = [entry(Some("a")), entry(Some("  ")), entry(Some("a"))];
        let loaded = parse_entries(&entries, FLOOR);

        assert_eq!(loaded.descriptors.len(), 1);
        assert_eq!(
            loaded.rejected,
            vec![LoadError::BlankId { index: 1 }, LoadError::DuplicateId { index: 2, id: "a".into() }]
        );
    }

    #[test]
    fn scalar_parameters_are_stringified() {
        let mut parameters = BTreeMap::new();
        parameters.insert("url".to_string(), toml::Value::String("https://example.com".into()));
        parameters.insert("timeoutMs".to_string(), toml::Value::Integer(2500));
        parameters.insert("nested".to_string(), toml::Value::Array(vec![]));
        let loaded = parse_entries(&[CheckEntry { parameters, ..entry(Some("p")) }], FLOOR);

        let descriptor = &loaded.descriptors[0];
        assert_eq!(descriptor.parameter("url"), Some("https://example.com"));
        assert_eq!(descriptor.parameter("timeoutMs"), Some("2500"));
        assert_eq!(descriptor.parameter("nested"), None);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[tokio::test]
    async fn apply_upserts_accepted_descriptors() {
        let store = InMemoryDescriptorStore::new();
        let entries = [
            CheckEntry { check_type: Some("ping".into()), ..entry(Some("one")) },
            entry(Some("")),
        ];

        let count = apply(&store, parse_entries(&entries, FLOOR)).await;

        assert_eq!(count, 1);
        assert_eq!(store.get("one").await.map(|d| d.check_type), Some("ping".to_string()));
    }
}
