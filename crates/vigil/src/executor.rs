use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::descriptor::CheckDescriptor;
use crate::result::CheckResult;

/// Internal fault raised by an executor.
///
/// Domain outcomes, including transport failures and missing parameters,
/// are reported as an `Ok` [`CheckResult`]. This error is reserved for the
/// executor itself being broken; the scheduler records it as an unhealthy
/// result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Probe logic for one check type
///
/// Implementations are stateless per call: they must not mutate the
/// descriptor or any other check's state, and they should return promptly
/// once `cancel` fires.
#[async_trait::async_trait]
pub trait CheckExecutor: Send + Sync {
    /// Type tag this executor is registered under
    fn check_type(&self) -> &str;

    /// Run the check described by `descriptor`
    async fn execute(
        &self,
        descriptor: &CheckDescriptor,
        cancel: &CancellationToken,
    ) -> Result<CheckResult, ExecutorError>;
}
