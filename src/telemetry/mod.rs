use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{settings::TelemetrySettings, store::SharedStore};

pub const ORDER_FIELD: &str = "timestamp";

/// One power reading published by the device. Missing numbers read as 0.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PowerUsageSample {
    /// Milliseconds since the epoch
    #[serde(deserialize_with = "number_or_string")]
    pub timestamp: u64,

    /// Watts
    pub instant_power: f64,

    pub brightness: f64,

    pub led_strip_power: f64,
    pub system_base_power: f64,
    pub buzzer_power: f64,
    pub total_power: f64,

    /// Cumulative energy in watt hours
    #[serde(alias = "powerWh")]
    pub energy_wh: f64,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    let millis = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s.trim().parse::<f64>().map_err(serde::de::Error::custom)?,
    };

    if millis.is_finite() && millis >= 0.0 {
        Ok(millis as u64)
    } else {
        Err(serde::de::Error::custom(format!("invalid timestamp {millis}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRange {
    Day,
    Week,
    Month,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        const DAY: u64 = 24 * 60 * 60;

        match self {
            TimeRange::Day => Duration::from_secs(DAY),
            TimeRange::Week => Duration::from_secs(7 * DAY),
            TimeRange::Month => Duration::from_secs(30 * DAY),
        }
    }

    pub fn parse(s: &str) -> Option<TimeRange> {
        match s {
            "24h" | "day" => Some(TimeRange::Day),
            "7d" | "week" => Some(TimeRange::Week),
            "30d" | "month" => Some(TimeRange::Month),
            _ => None,
        }
    }
}

/// Decodes raw records, skipping (and logging) the ones that do not parse.
pub fn decode_samples(records: Vec<Value>) -> Vec<PowerUsageSample> {
    records
        .into_iter()
        .filter_map(|record| match serde_json::from_value::<PowerUsageSample>(record) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("Skipping unreadable power usage record: {e}");
                None
            }
        })
        .collect()
}

/// Samples newer than `range` before `now`, oldest first.
pub fn window(mut samples: Vec<PowerUsageSample>, range: TimeRange, now: SystemTime) -> Vec<PowerUsageSample> {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let since = now_ms.saturating_sub(range.duration().as_millis() as u64);

    samples.retain(|sample| sample.timestamp > since);
    samples.sort_by_key(|sample| sample.timestamp);

    samples
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComponentBreakdown {
    pub led_strip: f64,
    pub system_base: f64,
    pub buzzer: f64,
    /// Whatever the reported total exceeds the components by
    pub regulator_loss: f64,
}

impl ComponentBreakdown {
    pub fn from_sample(sample: &PowerUsageSample) -> Self {
        let components = sample.led_strip_power + sample.system_base_power + sample.buzzer_power;

        ComponentBreakdown {
            led_strip: sample.led_strip_power,
            system_base: sample.system_base_power,
            buzzer: sample.buzzer_power,
            regulator_loss: (sample.total_power - components).max(0.0),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnergySummary {
    pub total_wh: f64,
    /// Cost of 30 days at the latest cumulative consumption
    pub monthly_cost: f64,
}

impl EnergySummary {
    pub fn from_latest(latest: &PowerUsageSample, tariff_per_kwh: f64) -> Self {
        EnergySummary {
            total_wh: latest.energy_wh,
            monthly_cost: latest.energy_wh * 30.0 / 1000.0 * tariff_per_kwh,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryStatus {
    Loaded,
    NoData,
    /// The read failed; the rest of the dashboard carries on without it
    Unavailable(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryView {
    pub status: TelemetryStatus,
    /// Oldest first
    pub samples: Vec<PowerUsageSample>,
    pub breakdown: Option<ComponentBreakdown>,
    pub summary: Option<EnergySummary>,
}

impl TelemetryView {
    fn empty(status: TelemetryStatus) -> Self {
        TelemetryView {
            status,
            samples: vec![],
            breakdown: None,
            summary: None,
        }
    }
}

pub struct TelemetryReader {
    store: SharedStore,
    settings: TelemetrySettings,
}

impl TelemetryReader {
    pub fn new(store: SharedStore, settings: &TelemetrySettings) -> Self {
        TelemetryReader {
            store,
            settings: settings.clone(),
        }
    }

    pub async fn recent(&self, range: TimeRange, now: SystemTime) -> TelemetryView {
        let records = self
            .store
            .query_recent(&self.settings.path, ORDER_FIELD, self.settings.limit)
            .await;

        let records = match records {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to read power usage from {}: {e}", self.settings.path);
                return TelemetryView::empty(TelemetryStatus::Unavailable(e.to_string()));
            }
        };

        let samples = window(decode_samples(records), range, now);
        let Some(latest) = samples.last() else {
            return TelemetryView::empty(TelemetryStatus::NoData);
        };

        TelemetryView {
            status: TelemetryStatus::Loaded,
            breakdown: Some(ComponentBreakdown::from_sample(latest)),
            summary: Some(EnergySummary::from_latest(latest, self.settings.tariff_per_kwh)),
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::store::{memory::MemoryStore, DocumentStore};

    const HOUR_MS: u64 = 60 * 60 * 1000;
    const NOW_MS: u64 = 1_700_000_000_000;

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(NOW_MS)
    }

    #[test]
    fn decodes_string_timestamps_and_legacy_energy_field() {
        let samples = decode_samples(vec![
            json!({ "timestamp": "1700000000000", "instantPower": 2.5, "powerWh": 12.0 }),
            json!({ "timestamp": "soon" }),
        ]);

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].timestamp, NOW_MS);
        assert_eq!(samples[0].instant_power, 2.5);
        assert_eq!(samples[0].energy_wh, 12.0);
        assert_eq!(samples[0].brightness, 0.0);
    }

    #[test]
    fn window_filters_and_sorts() {
        let sample = |timestamp| PowerUsageSample {
            timestamp,
            ..Default::default()
        };
        let samples = vec![
            sample(NOW_MS - HOUR_MS),
            sample(NOW_MS - 25 * HOUR_MS),
            sample(NOW_MS - 2 * HOUR_MS),
        ];

        let day = window(samples.clone(), TimeRange::Day, now());
        assert_eq!(
            day.iter().map(|s| s.timestamp).collect::<Vec<_>>(),
            vec![NOW_MS - 2 * HOUR_MS, NOW_MS - HOUR_MS]
        );

        assert_eq!(window(samples, TimeRange::Week, now()).len(), 3);
    }

    #[test]
    fn breakdown_attributes_remainder_to_regulator() {
        let sample = PowerUsageSample {
            led_strip_power: 3.0,
            system_base_power: 0.5,
            buzzer_power: 0.25,
            total_power: 4.0,
            ..Default::default()
        };

        let breakdown = ComponentBreakdown::from_sample(&sample);
        assert_eq!(breakdown.regulator_loss, 0.25);

        let under = PowerUsageSample {
            total_power: 1.0,
            ..sample
        };
        assert_eq!(ComponentBreakdown::from_sample(&under).regulator_loss, 0.0);
    }

    #[test]
    fn monthly_cost_projection() {
        let latest = PowerUsageSample {
            energy_wh: 100.0,
            ..Default::default()
        };

        let summary = EnergySummary::from_latest(&latest, 300.0);
        assert_eq!(summary.total_wh, 100.0);
        assert_eq!(summary.monthly_cost, 900.0);
    }

    #[tokio::test]
    async fn reader_builds_view_from_store() {
        let store = Arc::new(MemoryStore::new());
        for (age, wh) in [(3, 1.0), (1, 2.0), (48, 0.5)] {
            store
                .append(
                    "PowerUsage",
                    json!({ "timestamp": NOW_MS - age * HOUR_MS, "energyWh": wh, "totalPower": 1.5 }),
                )
                .await
                .unwrap();
        }

        let reader = TelemetryReader::new(store, &TelemetrySettings::default());
        let view = reader.recent(TimeRange::Day, now()).await;

        assert_eq!(view.status, TelemetryStatus::Loaded);
        assert_eq!(view.samples.len(), 2);
        assert_eq!(view.summary.unwrap().total_wh, 2.0);
        assert_eq!(view.breakdown.unwrap().regulator_loss, 1.5);
    }

    #[tokio::test]
    async fn empty_store_reads_as_no_data() {
        let reader = TelemetryReader::new(Arc::new(MemoryStore::new()), &TelemetrySettings::default());
        let view = reader.recent(TimeRange::Month, now()).await;

        assert_eq!(view.status, TelemetryStatus::NoData);
        assert!(view.samples.is_empty());
    }
}
