use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct FirebaseSettings {
    pub api_key: String,
    pub database_url: String,

    #[serde(default = "default_identity_url")]
    pub identity_url: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// PEM bundle trusted instead of the system roots, e.g. for an emulator
    /// behind a self signed proxy
    pub ca_cert: Option<String>,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct AccountSettings {
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub register: bool,
}

#[derive(Clone, Deserialize, Debug)]
pub struct DeviceSettings {
    #[serde(default = "default_state_path")]
    pub state_path: String,

    #[serde(default = "default_audit_path")]
    pub audit_path: String,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommitStrategy {
    /// Commit after a quiet period with no further input
    Debounce,
    /// Commit only when the pointer is released
    Release,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ControlSettings {
    #[serde(default = "default_commit_strategy")]
    pub commit_strategy: CommitStrategy,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_on_brightness")]
    pub default_on_brightness: u8,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq)]
pub struct PwmSettings {
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    #[serde(default)]
    pub inverted: bool,
}

#[derive(Clone, Deserialize, Debug)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_path")]
    pub path: String,

    #[serde(default = "default_telemetry_limit")]
    pub limit: usize,

    #[serde(default = "default_tariff")]
    pub tariff_per_kwh: f64,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub firebase: FirebaseSettings,

    #[serde(default)]
    pub account: AccountSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub pwm: PwmSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

fn default_identity_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_token_url() -> String {
    "https://securetoken.googleapis.com/v1/token".to_string()
}

fn default_state_path() -> String {
    "Sensor".to_string()
}

fn default_audit_path() -> String {
    "DebugLog".to_string()
}

fn default_commit_strategy() -> CommitStrategy {
    CommitStrategy::Debounce
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_on_brightness() -> u8 {
    50
}

fn default_gamma() -> f64 {
    1.0
}

fn default_telemetry_path() -> String {
    "PowerUsage".to_string()
}

fn default_telemetry_limit() -> usize {
    500
}

fn default_tariff() -> f64 {
    300.0
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            state_path: default_state_path(),
            audit_path: default_audit_path(),
        }
    }
}

impl Default for ControlSettings {
    fn default() -> Self {
        ControlSettings {
            commit_strategy: default_commit_strategy(),
            debounce_ms: default_debounce_ms(),
            default_on_brightness: default_on_brightness(),
        }
    }
}

impl Default for PwmSettings {
    fn default() -> Self {
        PwmSettings {
            gamma: default_gamma(),
            inverted: false,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            path: default_telemetry_path(),
            limit: default_telemetry_limit(),
            tariff_per_kwh: default_tariff(),
        }
    }
}

pub fn read_settings() -> Result<Settings, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::with_name("Settings"))
        .add_source(config::Environment::with_prefix("LIGHT_DASH").separator("__"))
        .build()?
        .try_deserialize::<Settings>()
}
