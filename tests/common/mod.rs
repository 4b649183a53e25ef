#![allow(dead_code)]

pub mod gated_store;

use std::{sync::Arc, time::Duration};

use serde_json::{json, Value};

use light_dash::{
    device::{
        edit_buffer::EditBuffer, LightController, SyncOptions, Synchronizer,
    },
    settings::CommitStrategy,
    store::memory::{MemoryStore, WriteKind},
};

pub const STATE_PATH: &str = "Sensor";
pub const ACTOR: &str = "dashboard:test@example.com";

pub fn manual_light(brightness: u8) -> Value {
    json!({
        STATE_PATH: {
            "powered": true,
            "brightness": brightness,
            "pwmValue": 0,
            "autoMode": false,
            "motionDetected": false,
            "ambientLight": 120.0,
        }
    })
}

pub fn sync_options() -> SyncOptions {
    SyncOptions {
        actor: ACTOR.to_string(),
        ..Default::default()
    }
}

pub fn controller(store: Arc<MemoryStore>, strategy: CommitStrategy) -> LightController {
    LightController::new(
        Synchronizer::new(store, sync_options()),
        EditBuffer::new(strategy, Duration::from_millis(300)),
    )
}

/// Patches of the device document that carry a brightness value.
pub async fn brightness_writes(store: &MemoryStore) -> Vec<Value> {
    store
        .writes()
        .await
        .into_iter()
        .filter(|write| write.kind == WriteKind::Patch && write.path == STATE_PATH)
        .map(|write| write.value)
        .filter(|value| value.get("brightness").is_some())
        .collect()
}
