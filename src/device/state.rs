use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

use super::pwm::{PwmMapping, MAX_BRIGHTNESS};

/// Strictly typed view of the shared device document.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub powered: bool,

    /// Requested brightness percentage (0 - 100)
    pub brightness: u8,

    /// Duty cycle derived from `brightness` (0 - 255)
    pub pwm_value: u8,

    pub auto_mode: bool,

    pub motion_detected: bool,

    /// Ambient light in lux
    pub ambient_light: f64,

    /// Milliseconds since the epoch, display only
    pub last_changed_at: Option<u64>,
}

/// The fields a client may write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Powered,
    Brightness,
    AutoMode,
}

// Older firmware revisions publish under these names.
const POWERED_KEYS: &[&str] = &["powered", "product1"];
const BRIGHTNESS_KEYS: &[&str] = &["brightness"];
const PWM_KEYS: &[&str] = &["pwmValue", "pwm"];
const AUTO_MODE_KEYS: &[&str] = &["autoMode"];
const MOTION_KEYS: &[&str] = &["motionDetected"];
const AMBIENT_LIGHT_KEYS: &[&str] = &["ambientLight", "lightSensor"];
const LAST_CHANGED_KEYS: &[&str] = &["lastChangedAt"];

fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "1"),
        _ => false,
    }
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let number = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number.filter(|n| n.is_finite())
}

impl DeviceState {
    /// Coerces a loosely typed snapshot into a `DeviceState`. Anything that
    /// is not an object (including a deleted document) reads as the default
    /// state; out of range numbers are clamped.
    pub fn from_document(document: &Value, mapping: &PwmMapping) -> DeviceState {
        let Value::Object(fields) = document else {
            return DeviceState::default();
        };

        let brightness = coerce_number(lookup(fields, BRIGHTNESS_KEYS))
            .map(|b| b.round().clamp(0.0, f64::from(MAX_BRIGHTNESS)) as u8)
            .unwrap_or(0);

        let pwm_value = mapping.pwm_for(brightness);
        if let Some(stored) = coerce_number(lookup(fields, PWM_KEYS)) {
            if stored.round() != f64::from(pwm_value) {
                debug!(
                    "Stored pwm value {stored} does not match brightness {brightness}, using {pwm_value}"
                );
            }
        }

        DeviceState {
            powered: coerce_bool(lookup(fields, POWERED_KEYS)),
            brightness,
            pwm_value,
            auto_mode: coerce_bool(lookup(fields, AUTO_MODE_KEYS)),
            motion_detected: coerce_bool(lookup(fields, MOTION_KEYS)),
            ambient_light: coerce_number(lookup(fields, AMBIENT_LIGHT_KEYS))
                .map(|lux| lux.max(0.0))
                .unwrap_or(0.0),
            last_changed_at: coerce_number(lookup(fields, LAST_CHANGED_KEYS))
                .filter(|t| *t >= 0.0)
                .map(|t| t as u64),
        }
    }

    pub fn set_brightness(&mut self, brightness: u8, mapping: &PwmMapping) {
        self.brightness = brightness.min(MAX_BRIGHTNESS);
        self.pwm_value = mapping.pwm_for(self.brightness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_current_document_layout() {
        let document = json!({
            "powered": true,
            "brightness": 40,
            "pwmValue": 102,
            "autoMode": false,
            "motionDetected": true,
            "ambientLight": 250.5,
            "lastChangedAt": 1_700_000_000_000u64,
        });

        let state = DeviceState::from_document(&document, &PwmMapping::default());
        assert_eq!(
            state,
            DeviceState {
                powered: true,
                brightness: 40,
                pwm_value: 102,
                auto_mode: false,
                motion_detected: true,
                ambient_light: 250.5,
                last_changed_at: Some(1_700_000_000_000),
            }
        );
    }

    #[test]
    fn reads_legacy_field_names() {
        let document = json!({ "product1": 1, "brightness": 70, "pwm": 179, "lightSensor": 12, "time": 1 });
        let state = DeviceState::from_document(&document, &PwmMapping::default());

        assert!(state.powered);
        assert_eq!(state.brightness, 70);
        assert_eq!(state.pwm_value, 179);
        assert_eq!(state.ambient_light, 12.0);
    }

    #[test]
    fn clamps_and_coerces_bad_values() {
        let document = json!({
            "powered": "true",
            "brightness": 180.4,
            "pwmValue": 3,
            "autoMode": 0,
            "ambientLight": -5,
            "lastChangedAt": "oops",
        });

        let state = DeviceState::from_document(&document, &PwmMapping::default());
        assert!(state.powered);
        assert_eq!(state.brightness, 100);
        assert_eq!(state.pwm_value, 255);
        assert!(!state.auto_mode);
        assert_eq!(state.ambient_light, 0.0);
        assert_eq!(state.last_changed_at, None);

        let state = DeviceState::from_document(&json!({ "brightness": -20 }), &PwmMapping::default());
        assert_eq!(state.brightness, 0);
    }

    #[test]
    fn missing_document_is_default() {
        let mapping = PwmMapping::default();
        assert_eq!(DeviceState::from_document(&Value::Null, &mapping), DeviceState::default());
        assert_eq!(DeviceState::from_document(&json!(42), &mapping), DeviceState::default());
    }

    #[test]
    fn pwm_follows_mapping_not_document() {
        let inverted = PwmMapping::new(1.0, true);
        let state = DeviceState::from_document(&json!({ "brightness": 100, "pwmValue": 255 }), &inverted);
        assert_eq!(state.pwm_value, 0);
    }
}
