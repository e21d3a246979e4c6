//! Database probes over libsql.
//!
//! A connection string is either a local database path or a remote
//! `libsql://`, `http://` or `https://` URL, with the matching auth token
//! parameter for remotes.

use anyhow::{Context, Result, anyhow, bail};
use libsql::{Builder, Connection, Value, params};
use tokio_util::sync::CancellationToken;
use vigil::{CheckDescriptor, CheckExecutor, CheckResult, CheckStatus, ExecutorError};

use super::unless_cancelled;

const DEFAULT_HISTORY_COUNT: u32 = 30;

async fn connect(connection_string: &str, auth_token: Option<&str>) -> Result<Connection> {
    let target = connection_string.trim();
    let remote = ["libsql://", "http://", "https://"].iter().any(|scheme| target.starts_with(scheme));
    let database = if remote {
        Builder::new_remote(target.to_string(), auth_token.unwrap_or_default().to_string())
            .build()
            .await?
    } else {
        Builder::new_local(target).build().await?
    };
    Ok(database.connect()?)
}

/// First column of the first row as a number, NULL or no rows count as 0
async fn scalar(conn: &Connection, query: &str) -> Result<f64> {
    let mut rows = conn.query(query, ()).await?;
    match rows.next().await? {
        Some(row) => Ok(number(row.get_value(0)?)?.unwrap_or(0.0)),
        None => Ok(0.0),
    }
}

fn number(value: Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(value) => Ok(Some(value as f64)),
        Value::Real(value) => Ok(Some(value)),
        Value::Text(text) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("expected a number, got '{text}'")),
        Value::Blob(_) => bail!("expected a number, got a blob"),
    }
}

/// Opens the database and optionally runs `testQuery`
pub struct DbConnectionExecutor;

#[async_trait::async_trait]
impl CheckExecutor for DbConnectionExecutor {
    fn check_type(&self) -> &str {
        "db-connection"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let Some(connection_string) = descriptor.parameter("connectionString") else {
            return Ok(CheckResult::missing_parameters(&descriptor.id, &["connectionString"]));
        };
        let auth_token = descriptor.parameter("authToken");
        let test_query = descriptor.parameter("testQuery");

        let attempt = async {
            let conn = connect(connection_string, auth_token).await?;
            if let Some(query) = test_query {
                let mut rows = conn.query(query, ()).await?;
                rows.next().await?;
            }
            Ok::<_, anyhow::Error>(())
        };

        Ok(match unless_cancelled(cancel, attempt).await {
            None => CheckResult::unknown(&descriptor.id, "Cancelled"),
            Some(Ok(())) => CheckResult::healthy(&descriptor.id, "Connected"),
            Some(Err(e)) => CheckResult::unhealthy(&descriptor.id, format!("Exception: {e:#}")),
        })
    }
}

/// Compares two scalar sums, e.g. ledger totals across a replication hop
pub struct BalanceExecutor;

impl BalanceExecutor {
    const REQUIRED: [&str; 4] = ["sourceConnection", "targetConnection", "sourceQuery", "targetQuery"];
}

#[async_trait::async_trait]
impl CheckExecutor for BalanceExecutor {
    fn check_type(&self) -> &str {
        "balance"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let [Some(source_connection), Some(target_connection), Some(source_query), Some(target_query)] =
            Self::REQUIRED.map(|key| descriptor.parameter(key))
        else {
            let missing: Vec<&str> = Self::REQUIRED
                .into_iter()
                .filter(|key| descriptor.parameter(key).is_none())
                .collect();
            return Ok(CheckResult::missing_parameters(&descriptor.id, &missing));
        };
        let tolerance_pct: f64 = descriptor.parameter_or("tolerancePct", 0.0);

        let sums = async {
            let source = connect(source_connection, descriptor.parameter("sourceAuthToken"))
                .await
                .context("source")?;
            let source_sum = scalar(&source, source_query).await.context("source query")?;
            let target = connect(target_connection, descriptor.parameter("targetAuthToken"))
                .await
                .context("target")?;
            let target_sum = scalar(&target, target_query).await.context("target query")?;
            Ok::<_, anyhow::Error>((source_sum, target_sum))
        };

        let (source_sum, target_sum) = match unless_cancelled(cancel, sums).await {
            None => return Ok(CheckResult::unknown(&descriptor.id, "Cancelled")),
            Some(Err(e)) => {
                return Ok(CheckResult::unhealthy(&descriptor.id, format!("Exception: {e:#}")));
            }
            Some(Ok(sums)) => sums,
        };

        let diff = target_sum - source_sum;
        let pct_diff = if source_sum != 0.0 { (diff / source_sum * 100.0).abs() } else { 0.0 };
        let status =
            if pct_diff <= tolerance_pct { CheckStatus::Healthy } else { CheckStatus::Unhealthy };

        Ok(CheckResult::new(&descriptor.id, status)
            .with_message(format!(
                "Source={source_sum:.2}, Target={target_sum:.2}, Diff={diff:.2} ({pct_diff:.2}%)"
            ))
            .with_metric("source_sum", source_sum)
            .with_metric("target_sum", target_sum)
            .with_metric("diff", diff)
            .with_metric("pct_diff", pct_diff))
    }
}

/// Inspects recent runs of a scheduled job recorded in
/// `job_history(job_name, run_status, run_at, duration_sec)`.
///
/// `run_status`: 1 succeeded, 0 failed, 3 cancelled, anything else is
/// treated as a partial outcome.
pub struct JobHistoryExecutor;

struct JobRun {
    status: Option<i64>,
    run_at: Option<String>,
    duration_sec: Option<f64>,
}

async fn recent_runs(conn: &Connection, job: &str, take: u32) -> Result<Vec<JobRun>> {
    let mut rows = conn
        .query(
            "SELECT run_status, run_at, duration_sec FROM job_history \
             WHERE job_name = ?1 ORDER BY run_at DESC LIMIT ?2",
            params![job, take as i64],
        )
        .await?;

    let mut runs = Vec::new();
    while let Some(row) = rows.next().await? {
        let status = match row.get_value(0)? {
            Value::Null => None,
            Value::Integer(status) => Some(status),
            other => number(other)?.map(|status| status as i64),
        };
        let run_at = match row.get_value(1)? {
            Value::Null => None,
            Value::Text(text) => Some(text),
            Value::Integer(value) => Some(value.to_string()),
            other => bail!("unexpected run_at value {other:?}"),
        };
        runs.push(JobRun { status, run_at, duration_sec: number(row.get_value(2)?)? });
    }

    // Oldest first, the last entry is the latest run
    runs.reverse();
    Ok(runs)
}

fn job_status(last_status: Option<i64>) -> CheckStatus {
    match last_status {
        Some(1) => CheckStatus::Healthy,
        Some(0) => CheckStatus::Unhealthy,
        Some(3) | None => CheckStatus::Unknown,
        Some(_) => CheckStatus::Degraded,
    }
}

#[async_trait::async_trait]
impl CheckExecutor for JobHistoryExecutor {
    fn check_type(&self) -> &str {
        "job-history"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let (Some(connection_string), Some(job)) =
            (descriptor.parameter("connectionString"), descriptor.parameter("jobName"))
        else {
            return Ok(CheckResult::missing_parameters(
                &descriptor.id,
                &["connectionString", "jobName"],
            ));
        };
        let take = match descriptor.parameter_or("historyCount", DEFAULT_HISTORY_COUNT) {
            0 => DEFAULT_HISTORY_COUNT,
            take => take,
        };

        let lookup = async {
            let conn = connect(connection_string, descriptor.parameter("authToken")).await?;
            recent_runs(&conn, job, take).await
        };
        let runs = match unless_cancelled(cancel, lookup).await {
            None => return Ok(CheckResult::unknown(&descriptor.id, "Cancelled")),
            Some(Err(e)) => {
                return Ok(CheckResult::unhealthy(&descriptor.id, format!("Exception: {e:#}")));
            }
            Some(Ok(runs)) => runs,
        };

        let Some(last) = runs.last() else {
            return Ok(CheckResult::unknown(&descriptor.id, format!("Job not found: {job}")));
        };

        let last_status = last.status.map(|status| status.to_string()).unwrap_or_default();
        let mut result = CheckResult::new(&descriptor.id, job_status(last.status))
            .with_message(format!("Job '{job}' last status={last_status}"))
            .with_dimension("job", job)
            .with_dimension("last_run_at", last.run_at.clone().unwrap_or_default())
            .with_dimension("history_count", runs.len().to_string());

        let durations: Vec<f64> = runs.iter().filter_map(|run| run.duration_sec).collect();
        if let Some(last_duration) = last.duration_sec {
            result = result.with_metric("last_duration_sec", last_duration);
        }
        if !durations.is_empty() {
            let average = durations.iter().sum::<f64>() / durations.len() as f64;
            result = result.with_metric("avg_duration_sec", average);
        }

        Ok(result)
    }
}

/// Lock and disable state of a login, read from
/// `logins(name, is_disabled, lockout_time)`
pub struct ServiceAccountLockExecutor;

struct LoginState {
    disabled: bool,
    lockout_time: Option<String>,
}

async fn login_state(conn: &Connection, login: &str) -> Result<Option<LoginState>> {
    let mut rows = conn
        .query("SELECT is_disabled, lockout_time FROM logins WHERE name = ?1", params![login])
        .await?;
    let Some(row) = rows.next().await? else {
        return Ok(None);
    };

    let disabled = number(row.get_value(0)?)?.is_some_and(|flag| flag != 0.0);
    let lockout_time = match row.get_value(1)? {
        Value::Null => None,
        Value::Text(text) if text.trim().is_empty() => None,
        Value::Text(text) => Some(text),
        Value::Integer(value) => Some(value.to_string()),
        Value::Real(value) => Some(value.to_string()),
        Value::Blob(_) => bail!("expected a lockout time, got a blob"),
    };
    Ok(Some(LoginState { disabled, lockout_time }))
}

#[async_trait::async_trait]
impl CheckExecutor for ServiceAccountLockExecutor {
    fn check_type(&self) -> &str {
        "serviceaccount-locks"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let (Some(connection_string), Some(login)) =
            (descriptor.parameter("connectionString"), descriptor.parameter("login"))
        else {
            return Ok(CheckResult::missing_parameters(&descriptor.id, &["connectionString", "login"]));
        };

        let lookup = async {
            let conn = connect(connection_string, descriptor.parameter("authToken")).await?;
            login_state(&conn, login).await
        };
        let state = match unless_cancelled(cancel, lookup).await {
            None => return Ok(CheckResult::unknown(&descriptor.id, "Cancelled")),
            Some(Err(e)) => {
                return Ok(CheckResult::unhealthy(&descriptor.id, format!("Exception: {e:#}")));
            }
            Some(Ok(None)) => {
                return Ok(CheckResult::unknown(&descriptor.id, format!("Login not found: {login}")));
            }
            Some(Ok(Some(state))) => state,
        };

        let result = match (state.disabled, state.lockout_time) {
            (true, _) => CheckResult::unhealthy(&descriptor.id, "Login disabled"),
            (false, Some(at)) => CheckResult::unhealthy(&descriptor.id, format!("Locked at {at}")),
            (false, None) => CheckResult::healthy(&descriptor.id, "OK"),
        };
        Ok(result.with_dimension("login", login))
    }
}
