use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::executor::CheckExecutor;

/// Lookup table from check type to executor.
///
/// Built once at startup from an explicit registration list and immutable
/// afterwards. Type tags are matched case-insensitively and the first
/// executor registered for a tag wins.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn CheckExecutor>>,
}

impl ExecutorRegistry {
    pub fn new(executors: impl IntoIterator<Item = Arc<dyn CheckExecutor>>) -> Self {
        let mut builder = RegistryBuilder::default();
        for executor in executors {
            builder = builder.register_arc(executor);
        }
        builder.build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Find the executor for `check_type`
    pub fn resolve(&self, check_type: &str) -> Option<Arc<dyn CheckExecutor>> {
        self.executors.get(&normalize(check_type)).cloned()
    }

    /// Registered type tags, sorted
    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry").field("types", &self.registered_types()).finish()
    }
}

/// Builder for ExecutorRegistry
#[derive(Default)]
pub struct RegistryBuilder {
    executors: HashMap<String, Arc<dyn CheckExecutor>>,
}

impl RegistryBuilder {
    pub fn register<E: CheckExecutor + 'static>(self, executor: E) -> Self {
        self.register_arc(Arc::new(executor))
    }

    pub fn register_arc(mut self, executor: Arc<dyn CheckExecutor>) -> Self {
        let key = normalize(executor.check_type());
        if self.executors.contains_key(&key) {
            warn!(check_type = %key, "Executor already registered for check type, keeping the first one");
            return self;
        }
        debug!(check_type = %key, "Registered executor");
        self.executors.insert(key, executor);
        self
    }

    pub fn build(self) -> ExecutorRegistry {
        ExecutorRegistry { executors: self.executors }
    }
}

fn normalize(check_type: &str) -> String {
    check_type.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutorError;
    use crate::{CheckDescriptor, CheckResult};
    use tokio_util::sync::CancellationToken;

    struct Fixed {
        tag: &'static str,
        message: &'static str,
    }

    #[async_trait::async_trait]
    impl CheckExecutor for Fixed {
        fn check_type(&self) -> &str {
            self.tag
        }

        async fn execute(
            &self,
            descriptor: &CheckDescriptor,
            _cancel: &CancellationToken,
        ) -> Result<CheckResult, ExecutorError> {
            Ok(CheckResult::healthy(&descriptor.id, self.message))
        }
    }

    #[test]
    fn resolves_case_insensitively() {
        let registry = ExecutorRegistry::builder()
            .register(Fixed { tag: "DB-Connection", message: "db" })
            .build();

        assert!(registry.resolve("db-connection").is_some());
        assert!(registry.resolve("DB-CONNECTION").is_some());
        assert!(registry.resolve("http").is_none());
        assert_eq!(registry.registered_types(), vec!["db-connection"]);
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let registry = ExecutorRegistry::new([
            Arc::new(Fixed { tag: "ping", message: "first" }) as Arc<dyn CheckExecutor>,
            Arc::new(Fixed { tag: "PING", message: "second" }) as Arc<dyn CheckExecutor>,
        ]);
        assert_eq!(registry.len(), 1);

        let executor = registry.resolve("ping").unwrap();
        let result = executor
            .execute(&CheckDescriptor::new("p", "ping", "P"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.message.as_deref(), Some("first"));
    }
}
