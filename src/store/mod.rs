use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::TransportError;

pub mod memory;
pub mod rtdb;
pub mod tree;

pub type SharedStore = Arc<dyn DocumentStore>;

/// The narrow view of the hosted realtime database used by the rest of the
/// crate. Paths are slash separated and relative to the database root.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Starts delivering full snapshots of the node at `path`: the current
    /// value first, then one snapshot per applied change.
    async fn subscribe(&self, path: &str) -> Result<Subscription, TransportError>;

    /// Writes only the given child fields of `path`.
    async fn patch(&self, path: &str, fields: Value) -> Result<(), TransportError>;

    /// Replaces the whole node at `path`.
    async fn replace(&self, path: &str, document: Value) -> Result<(), TransportError>;

    /// Adds `record` under a new, time-ordered child key of `path` and returns
    /// that key.
    async fn append(&self, path: &str, record: Value) -> Result<String, TransportError>;

    /// The last `limit` children of `path` when ordered by `order_field`,
    /// returned in ascending order of that field.
    async fn query_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Value>, TransportError>;
}

/// Handle to a live stream of snapshots. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Value>,
    task: Option<JoinHandle<()>>,
    active: bool,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Value>, task: Option<JoinHandle<()>>) -> Self {
        Subscription {
            rx,
            task,
            active: true,
        }
    }

    /// Next snapshot, or `None` once the stream has ended or been cancelled.
    pub async fn next(&mut self) -> Option<Value> {
        if !self.active {
            return None;
        }

        let snapshot = self.rx.recv().await;
        if snapshot.is_none() {
            self.active = false;
        }

        snapshot
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stops delivery. Calling it more than once is harmless.
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        self.rx.close();
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Orders records by a numeric (or numeric string) field, oldest first, and
/// keeps the last `limit` of them.
pub fn order_and_limit(records: impl IntoIterator<Item = Value>, order_field: &str, limit: usize) -> Vec<Value> {
    let mut records: Vec<(f64, Value)> = records
        .into_iter()
        .map(|record| (order_key(&record, order_field), record))
        .collect();

    records.sort_by(|a, b| a.0.total_cmp(&b.0));

    let skip = records.len().saturating_sub(limit);
    records.into_iter().skip(skip).map(|(_, record)| record).collect()
}

fn order_key(record: &Value, order_field: &str) -> f64 {
    match record.get(order_field) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::MIN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(f64::MIN),
        _ => f64::MIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_and_limit_keeps_newest_ascending() {
        let records = vec![
            json!({ "timestamp": 30 }),
            json!({ "timestamp": "10" }),
            json!({ "timestamp": 20 }),
            json!({ "other": true }),
        ];

        let ordered = order_and_limit(records, "timestamp", 2);
        assert_eq!(ordered, vec![json!({ "timestamp": 20 }), json!({ "timestamp": 30 })]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, None);

        tx.send(json!(1)).unwrap();
        assert_eq!(subscription.next().await, Some(json!(1)));

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert!(tx.send(json!(2)).is_err());
        assert_eq!(subscription.next().await, None);
    }
}
