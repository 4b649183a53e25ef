use derive_builder::Builder;
use serde::Serialize;

/// Serializes to the database's server timestamp placeholder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ServerTimestamp {
    #[serde(rename = ".sv")]
    sv: &'static str,
}

impl ServerTimestamp {
    pub fn now() -> Self {
        ServerTimestamp { sv: "timestamp" }
    }
}

/// Partial write of the device document. Only fields that are `Some` are
/// sent, so concurrently written telemetry fields are never clobbered.
#[derive(Builder, Clone, Debug, Default, PartialEq, Serialize)]
#[builder(setter(into, strip_option), default, build_fn(private, name = "fallible_build"))]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub powered: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm_value: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_changed_at: Option<ServerTimestamp>,
}

impl DeviceStatePatchBuilder {
    /// Every field has a default, so assembling a patch cannot fail.
    pub fn build(&self) -> DeviceStatePatch {
        self.fallible_build().unwrap_or_default()
    }
}

impl DeviceStatePatch {
    pub fn builder() -> DeviceStatePatchBuilder {
        DeviceStatePatchBuilder::default()
    }

    pub fn to_document(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_set_fields_are_serialized() {
        let patch = DeviceStatePatch::builder()
            .brightness(40u8)
            .pwm_value(102u8)
            .last_changed_at(ServerTimestamp::now())
            .build();

        assert_eq!(
            patch.to_document().unwrap(),
            json!({ "brightness": 40, "pwmValue": 102, "lastChangedAt": { ".sv": "timestamp" } })
        );
    }

    #[test]
    fn empty_patch_serializes_to_empty_object() {
        let patch = DeviceStatePatch::builder().build();
        assert_eq!(patch.to_document().unwrap(), json!({}));
    }
}
