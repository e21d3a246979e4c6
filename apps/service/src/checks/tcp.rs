use std::time::{Duration, Instant};

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use vigil::{CheckDescriptor, CheckExecutor, CheckResult, ExecutorError};

use super::unless_cancelled;

/// TCP port checker, `address` is `host:port`
pub struct TcpExecutor {
    default_timeout: Duration,
}

impl TcpExecutor {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait::async_trait]
impl CheckExecutor for TcpExecutor {
    fn check_type(&self) -> &str {
        "tcp"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        let Some(address) = descriptor.parameter("address") else {
            return Ok(CheckResult::missing_parameters(&descriptor.id, &["address"]));
        };
        let timeout_duration = Duration::from_millis(
            descriptor.parameter_or("timeoutMs", self.default_timeout.as_millis() as u64),
        );

        let start = Instant::now();
        let connect = timeout(timeout_duration, tokio::net::TcpStream::connect(address));
        let Some(outcome) = unless_cancelled(cancel, connect).await else {
            return Ok(CheckResult::unknown(&descriptor.id, "Cancelled"));
        };
        let latency = start.elapsed().as_secs_f64() * 1000.0;

        let result = match outcome {
            Ok(Ok(_stream)) => CheckResult::healthy(&descriptor.id, format!("Connected to {address}")),
            Ok(Err(e)) => {
                CheckResult::unhealthy(&descriptor.id, format!("Exception: TCP connection failed: {e}"))
            }
            Err(_) => CheckResult::unhealthy(
                &descriptor.id,
                format!("Exception: TCP connection timeout after {}ms", timeout_duration.as_millis()),
            ),
        };

        Ok(result.with_metric("latency_ms", latency).with_dimension("address", address))
    }
}
