use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use light_dash::{
    error::TransportError,
    store::{memory::MemoryStore, DocumentStore, Subscription},
};

/// A memory store whose patches wait until the test lets them through, one
/// permit per write. Lets tests hold acknowledgments back and reorder them
/// against snapshots.
pub struct GatedStore {
    pub inner: MemoryStore,
    gate: Semaphore,
}

impl GatedStore {
    pub fn new(inner: MemoryStore) -> Self {
        GatedStore {
            inner,
            gate: Semaphore::new(0),
        }
    }

    pub fn release(&self, writes: usize) {
        self.gate.add_permits(writes);
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, TransportError> {
        self.inner.subscribe(path).await
    }

    async fn patch(&self, path: &str, fields: Value) -> Result<(), TransportError> {
        self.gate
            .acquire()
            .await
            .map_err(|_| TransportError::Closed)?
            .forget();

        self.inner.patch(path, fields).await
    }

    async fn replace(&self, path: &str, document: Value) -> Result<(), TransportError> {
        self.inner.replace(path, document).await
    }

    async fn append(&self, path: &str, record: Value) -> Result<String, TransportError> {
        self.inner.append(path, record).await
    }

    async fn query_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Value>, TransportError> {
        self.inner.query_recent(path, order_field, limit).await
    }
}
