use tokio_util::sync::CancellationToken;
use vigil::{CheckDescriptor, CheckExecutor, CheckResult, ExecutorError};

/// Always healthy. Useful to confirm the scheduler and result pipeline run.
pub struct PingExecutor;

#[async_trait::async_trait]
impl CheckExecutor for PingExecutor {
    fn check_type(&self) -> &str {
        "ping"
    }

    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError> {
        Ok(CheckResult::healthy(&descriptor.id, "Ping OK")
            .with_metric("latency_ms", 10.0)
            .with_dimension("name", &descriptor.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil::CheckStatus;

    #[tokio::test]
    async fn reports_healthy_with_name() {
        let descriptor = CheckDescriptor::new("ping-1", "ping", "Heartbeat");
        let result = PingExecutor.execute(&descriptor, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.check_id, "ping-1");
        assert_eq!(result.status, CheckStatus::Healthy);
        assert_eq!(result.dimensions["name"], "Heartbeat");
        assert_eq!(result.metrics["latency_ms"], 10.0);
    }
}
