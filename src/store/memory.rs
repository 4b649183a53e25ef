use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, RwLock};

use super::{order_and_limit, tree, DocumentStore, Subscription};
use crate::error::TransportError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteKind {
    Patch,
    Replace,
    Append,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WriteRecord {
    pub kind: WriteKind,
    pub path: String,
    pub value: Value,
}

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<Value>,
    last: Value,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    writes: Vec<WriteRecord>,
    next_key: u64,
    fail_writes: bool,
}

/// In-process document store with the same notification semantics as the
/// hosted database. Keeps a log of every write it accepted.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_document(root: Value) -> Self {
        MemoryStore {
            inner: RwLock::new(Inner {
                root,
                ..Default::default()
            }),
        }
    }

    pub async fn document(&self, path: &str) -> Value {
        tree::get_or_null(&self.inner.read().await.root, path)
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.inner.read().await.writes.clone()
    }

    /// Makes every subsequent write fail with a transport error.
    pub async fn set_fail_writes(&self, fail: bool) {
        self.inner.write().await.fail_writes = fail;
    }

    /// Ends every open subscription, as a dropped connection would.
    pub async fn close_subscriptions(&self) {
        self.inner.write().await.subscribers.clear();
    }

    /// Applies a write as if another client (e.g. the device) made it. Not
    /// recorded in the write log.
    pub async fn external_patch(&self, path: &str, fields: Value) {
        let mut inner = self.inner.write().await;
        tree::patch(&mut inner.root, path, resolve_server_values(fields));
        inner.notify();
    }
}

impl Inner {
    fn check_writable(&self) -> Result<(), TransportError> {
        if self.fail_writes {
            Err(TransportError::Request("memory store is rejecting writes".to_string()))
        } else {
            Ok(())
        }
    }

    fn record(&mut self, kind: WriteKind, path: &str, value: &Value) {
        self.writes.push(WriteRecord {
            kind,
            path: path.to_string(),
            value: value.clone(),
        });
    }

    // Sends a snapshot to every subscriber whose node changed, and forgets
    // subscribers that have gone away.
    fn notify(&mut self) {
        let root = &self.root;
        self.subscribers.retain_mut(|subscriber| {
            let current = tree::get_or_null(root, &subscriber.path);
            if current == subscriber.last {
                return !subscriber.tx.is_closed();
            }

            subscriber.last = current.clone();
            subscriber.tx.send(current).is_ok()
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, TransportError> {
        let mut inner = self.inner.write().await;
        let (tx, rx) = mpsc::unbounded_channel();

        let current = tree::get_or_null(&inner.root, path);
        tx.send(current.clone()).map_err(|_| TransportError::Closed)?;

        inner.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
            last: current,
        });

        Ok(Subscription::new(rx, None))
    }

    async fn patch(&self, path: &str, fields: Value) -> Result<(), TransportError> {
        let mut inner = self.inner.write().await;
        inner.check_writable()?;
        inner.record(WriteKind::Patch, path, &fields);

        tree::patch(&mut inner.root, path, resolve_server_values(fields));
        inner.notify();

        Ok(())
    }

    async fn replace(&self, path: &str, document: Value) -> Result<(), TransportError> {
        let mut inner = self.inner.write().await;
        inner.check_writable()?;
        inner.record(WriteKind::Replace, path, &document);

        tree::put(&mut inner.root, path, resolve_server_values(document));
        inner.notify();

        Ok(())
    }

    async fn append(&self, path: &str, record: Value) -> Result<String, TransportError> {
        let mut inner = self.inner.write().await;
        inner.check_writable()?;
        inner.record(WriteKind::Append, path, &record);

        // Zero padded so lexical key order matches insertion order
        let key = format!("-{:020}", inner.next_key);
        inner.next_key += 1;

        let child_path = format!("{}/{}", path.trim_end_matches('/'), key);
        tree::put(&mut inner.root, &child_path, resolve_server_values(record));
        inner.notify();

        Ok(key)
    }

    async fn query_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Value>, TransportError> {
        let inner = self.inner.read().await;

        let records = match tree::get(&inner.root, path) {
            Some(Value::Object(children)) => children.values().cloned().collect(),
            _ => vec![],
        };

        Ok(order_and_limit(records, order_field, limit))
    }
}

/// Replaces `{".sv": "timestamp"}` placeholders with the current time in
/// milliseconds, as the hosted database does on write.
fn resolve_server_values(value: Value) -> Value {
    match value {
        Value::Object(fields) if is_server_timestamp(&fields) => Value::from(now_millis()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, resolve_server_values(v)))
                .collect::<Map<_, _>>(),
        ),
        other => other,
    }
}

fn is_server_timestamp(fields: &Map<String, Value>) -> bool {
    fields.len() == 1 && fields.get(".sv").and_then(Value::as_str) == Some("timestamp")
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
