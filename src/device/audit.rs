use log::{debug, warn};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::patch::ServerTimestamp;
use crate::store::SharedStore;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub auto_mode: bool,
    pub actor: String,
    pub timestamp: ServerTimestamp,
}

/// Best effort log of mode changes. Records are written in the background and
/// a failed write is only logged.
#[derive(Clone)]
pub struct AuditLog {
    store: SharedStore,
    path: String,
    actor: String,
}

impl AuditLog {
    pub fn new(store: SharedStore, path: &str, actor: &str) -> Self {
        AuditLog {
            store,
            path: path.to_string(),
            actor: actor.to_string(),
        }
    }

    pub fn record_auto_mode(&self, auto_mode: bool) -> JoinHandle<()> {
        let record = AuditRecord {
            auto_mode,
            actor: self.actor.clone(),
            timestamp: ServerTimestamp::now(),
        };

        let store = self.store.clone();
        let path = self.path.clone();

        tokio::spawn(async move {
            let result = match serde_json::to_value(&record) {
                Ok(value) => store.append(&path, value).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(key) => debug!("Recorded auto mode change as {path}/{key}"),
                Err(e) => warn!("Failed to write audit record for auto mode {auto_mode}: {e}"),
            }
        })
    }
}
