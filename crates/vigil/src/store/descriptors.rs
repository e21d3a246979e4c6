use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::descriptor::CheckDescriptor;

/// Holds the current set of check definitions
#[async_trait::async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Snapshot of every descriptor, ordered by name and then id
    async fn list(&self) -> Vec<CheckDescriptor>;

    async fn get(&self, id: &str) -> Option<CheckDescriptor>;

    /// Insert, or replace the descriptor with the same id
    async fn upsert(&self, descriptor: CheckDescriptor);

    async fn upsert_many(&self, descriptors: Vec<CheckDescriptor>);

    async fn remove(&self, id: &str) -> Option<CheckDescriptor>;

    /// Replace the whole set
    async fn replace_all(&self, descriptors: Vec<CheckDescriptor>);
}

#[derive(Debug, Default)]
pub struct InMemoryDescriptorStore {
    descriptors: RwLock<HashMap<String, CheckDescriptor>>,
}

impl InMemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_descriptors(descriptors: impl IntoIterator<Item = CheckDescriptor>) -> Self {
        let descriptors = descriptors.into_iter().map(|d| (d.id.clone(), d)).collect();
        Self { descriptors: RwLock::new(descriptors) }
    }
}

#[async_trait::async_trait]
impl DescriptorStore for InMemoryDescriptorStore {
    async fn list(&self) -> Vec<CheckDescriptor> {
        let mut snapshot: Vec<CheckDescriptor> =
            self.descriptors.read().await.values().cloned().collect();
        snapshot.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        snapshot
    }

    async fn get(&self, id: &str) -> Option<CheckDescriptor> {
        self.descriptors.read().await.get(id).cloned()
    }

    async fn upsert(&self, descriptor: CheckDescriptor) {
        self.descriptors.write().await.insert(descriptor.id.clone(), descriptor);
    }

    async fn upsert_many(&self, descriptors: Vec<CheckDescriptor>) {
        let mut guard = self.descriptors.write().await;
        for descriptor in descriptors {
            guard.insert(descriptor.id.clone(), descriptor);
        }
    }

    async fn remove(&self, id: &str) -> Option<CheckDescriptor> {
        self.descriptors.write().await.remove(id)
    }

    async fn replace_all(&self, descriptors: Vec<CheckDescriptor>) {
        let replacement = descriptors.into_iter().map(|d| (d.id.clone(), d)).collect();
        *self.descriptors.write().await = replacement;
    }
}
