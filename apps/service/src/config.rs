use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fmt, fs, io, path};

use serde::{Deserialize, Serialize};
use vigil::SchedulerSettings;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: io::Error },
    #[error("failed to parse config {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path given and neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: Scheduler,
    pub results: Results,
    pub http: Http,
    pub logging: Logging,
    /// Tables must follow plain values in TOML, keep this last
    pub checks: Vec<CheckEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub poll_interval_ms: u64,
    pub min_interval_seconds: u64,
    pub cron_fallback_seconds: u64,
    pub max_concurrency: usize,
    pub skip_overlapping: bool,
    /// 0 disables the per-execution deadline
    pub execution_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Results {
    pub capacity_per_check: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    pub user_agent: String,
    pub default_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// `compact` or `json`
    pub format: String,
}

/// One `[[checks]]` table. Everything is optional here, the loader fills
/// in what is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub tags: Vec<String>,
    /// Scalars of any type, stringified on load
    pub parameters: BTreeMap<String, toml::Value>,
}

impl Default for Scheduler {
    fn default() -> Self {
        let defaults = SchedulerSettings::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            min_interval_seconds: defaults.min_interval.as_secs(),
            cron_fallback_seconds: defaults.cron_fallback.as_secs(),
            max_concurrency: defaults.max_concurrency,
            skip_overlapping: defaults.skip_overlapping,
            execution_timeout_seconds: defaults
                .execution_timeout
                .map(|timeout| timeout.as_secs())
                .unwrap_or(0),
            shutdown_grace_seconds: defaults.shutdown_grace.as_secs(),
        }
    }
}

impl Scheduler {
    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            min_interval: Duration::from_secs(self.min_interval_seconds),
            cron_fallback: Duration::from_secs(self.cron_fallback_seconds.max(1)),
            max_concurrency: self.max_concurrency.max(1),
            skip_overlapping: self.skip_overlapping,
            execution_timeout: (self.execution_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.execution_timeout_seconds)),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
        }
    }
}

impl Default for Results {
    fn default() -> Self {
        Self { capacity_per_check: vigil::store::DEFAULT_CAPACITY_PER_CHECK }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            user_agent: concat!("vigil/", env!("CARGO_PKG_VERSION")).into(),
            default_timeout_ms: 10_000,
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self { format: "compact".into() }
    }
}

impl CheckEntry {
    fn sample_ping() -> Self {
        Self {
            id: Some("ping-1".into()),
            check_type: Some("ping".into()),
            name: Some("Scheduler heartbeat".into()),
            interval_seconds: Some(60),
            ..Self::default()
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Poll Interval (ms)", &self.scheduler.poll_interval_ms)?;
        write_1(f, "Minimum Interval (s)", &self.scheduler.min_interval_seconds)?;
        write_1(f, "Cron Fallback (s)", &self.scheduler.cron_fallback_seconds)?;
        write_1(f, "Max Concurrency", &self.scheduler.max_concurrency)?;
        write_1(f, "Skip Overlapping", &self.scheduler.skip_overlapping)?;
        write_1(f, "Execution Timeout (s)", &self.scheduler.execution_timeout_seconds)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;
        write_title_1(f, "Results")?;
        write_1(f, "Capacity Per Check", &self.results.capacity_per_check)?;
        write_title_1(f, "HTTP")?;
        write_1(f, "User Agent", &self.http.user_agent)?;
        write_1(f, "Default Timeout (ms)", &self.http.default_timeout_ms)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Format", &self.logging.format)?;
        write_title_1(f, "Checks")?;
        for entry in &self.checks {
            let label = entry.id.as_deref().unwrap_or("<generated id>");
            let check_type = entry.check_type.as_deref().unwrap_or("unknown");
            let schedule = match (&entry.cron, entry.interval_seconds) {
                (Some(cron), _) => format!("cron '{cron}'"),
                (None, Some(seconds)) => format!("every {seconds}s"),
                (None, None) => "default interval".to_string(),
            };
            let enabled = if entry.enabled.unwrap_or(true) { "" } else { ", disabled" };
            write_2(f, label, &format!("{check_type}, {schedule}{enabled}"))?;
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| Error::ParseFailed { path: config_path, source })
        } else {
            let config = Self { checks: vec![CheckEntry::sample_ping()], ..Self::default() };
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/vigil");

        let config = Config::from_config(Some(&path)).unwrap();
        assert_eq!(config.checks.len(), 1);
        assert!(dir.path().join("nested/vigil.toml").exists());

        let reread = Config::from_config(Some(&path)).unwrap();
        assert_eq!(reread.checks[0].id.as_deref(), Some("ping-1"));
        assert_eq!(reread.scheduler.max_concurrency, config.scheduler.max_concurrency);
    }

    #[test]
    fn partial_file_uses_defaults_for_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[scheduler]
max_concurrency = 4
execution_timeout_seconds = 0

[[checks]]
id = "api-health"
type = "http"
interval_seconds = 30

[checks.parameters]
url = "https://example.com/health"
timeoutMs = 2500
"#,
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();
        let settings = config.scheduler.settings();
        assert_eq!(settings.max_concurrency, 4);
        assert_eq!(settings.execution_timeout, None);
        assert_eq!(settings.poll_interval, SchedulerSettings::default().poll_interval);
        assert_eq!(config.results.capacity_per_check, 200);

        let entry = &config.checks[0];
        assert_eq!(entry.check_type.as_deref(), Some("http"));
        assert_eq!(entry.parameters["timeoutMs"], toml::Value::Integer(2500));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[scheduler\nmax_concurrency = ").unwrap();

        let error = Config::from_config(Some(&path)).unwrap_err();
        assert!(matches!(error, Error::ParseFailed { .. }));
        assert!(error.to_string().contains("broken.toml"));
    }

    #[test]
    fn display_lists_checks() {
        let config = Config { checks: vec![CheckEntry::sample_ping()], ..Config::default() };
        let rendered = config.to_string();
        assert!(rendered.contains("Max Concurrency: 32"));
        assert!(rendered.contains("ping-1: ping, every 60s"));
    }
}
