//! Built-in check types.

mod database;
mod http;
mod ping;
mod tcp;

use std::time::Duration;

pub use database::{
    BalanceExecutor, DbConnectionExecutor, JobHistoryExecutor, ServiceAccountLockExecutor,
};
pub use http::{ApiExecutor, HttpExecutor};
pub use ping::PingExecutor;
pub use tcp::TcpExecutor;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use vigil::ExecutorRegistry;

use crate::config;

/// Registry with every built-in check type
pub fn builtin_registry(http: &config::Http) -> Result<ExecutorRegistry> {
    let client = reqwest::Client::builder().user_agent(&http.user_agent).build()?;
    let default_timeout = Duration::from_millis(http.default_timeout_ms);

    Ok(ExecutorRegistry::builder()
        .register(PingExecutor)
        .register(HttpExecutor::new(client.clone(), default_timeout))
        .register(ApiExecutor::new(client, default_timeout))
        .register(TcpExecutor::new(default_timeout))
        .register(DbConnectionExecutor)
        .register(BalanceExecutor)
        .register(JobHistoryExecutor)
        .register(ServiceAccountLockExecutor)
        .build())
}

/// Drive `future` unless `cancel` fires first
pub(crate) async fn unless_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
