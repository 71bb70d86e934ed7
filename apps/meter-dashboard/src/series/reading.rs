use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::time::parse_device_timestamp;

pub type DeviceId = i64;

/// Reading as delivered by the upstream API.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RawReading {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub device_id: DeviceId,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub object_name: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, Option<f64>>,
}

/// Upstream `data` array, decoded element by element so one malformed reading is counted and
/// dropped instead of failing the whole fetch.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub readings: Vec<RawReading>,
    pub malformed: usize,
}

impl RawBatch {
    pub fn decode(items: Vec<serde_json::Value>) -> Self {
        let mut batch = Self::default();
        for item in items {
            match serde_json::from_value::<RawReading>(item) {
                Ok(reading) => batch.readings.push(reading),
                Err(err) => {
                    tracing::debug!(error = %err, "malformed upstream reading");
                    batch.malformed += 1;
                }
            }
        }
        batch
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub device_name: Option<String>,
    pub object_name: Option<String>,
    pub values: BTreeMap<String, Option<f64>>,
}

impl Reading {
    /// Non-null values only; a null counts as absent.
    pub fn present_values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values
            .iter()
            .filter_map(|(key, value)| value.map(|value| (key.as_str(), value)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLabel {
    pub device_id: DeviceId,
    pub device_name: Option<String>,
}

impl DeviceLabel {
    pub fn display_name(&self) -> String {
        self.device_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Device {}", self.device_id))
    }
}

/// Snapshot of one fetch, sorted by timestamp. Replaced wholesale, never appended to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleStore {
    readings: Vec<Reading>,
    skipped: usize,
}

impl SampleStore {
    /// Malformed elements and readings without a usable timestamp all count as skipped.
    pub fn from_batch<Tz: TimeZone>(tz: &Tz, batch: RawBatch) -> Self {
        let mut skipped = batch.malformed;
        let mut readings = Vec::with_capacity(batch.readings.len());
        for item in batch.readings {
            let timestamp = item
                .timestamp
                .as_deref()
                .and_then(|raw| parse_device_timestamp(tz, raw));
            match timestamp {
                Some(timestamp) => readings.push(Reading {
                    timestamp,
                    device_id: item.device_id,
                    device_name: item.device_name,
                    object_name: item.object_name,
                    values: item.values,
                }),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "dropped malformed or undated readings");
        }
        let mut store = Self::from_readings(readings);
        store.skipped = skipped;
        store
    }

    pub fn from_readings(mut readings: Vec<Reading>) -> Self {
        readings.sort_by_key(|reading| reading.timestamp);
        Self {
            readings,
            skipped: 0,
        }
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.readings.first()?;
        let last = self.readings.last()?;
        Some((first.timestamp, last.timestamp))
    }

    /// Devices in order of first appearance, each with the first name seen for it.
    pub fn devices(&self) -> Vec<DeviceLabel> {
        let mut labels: Vec<DeviceLabel> = Vec::new();
        for reading in &self.readings {
            match labels
                .iter_mut()
                .find(|label| label.device_id == reading.device_id)
            {
                Some(label) => {
                    if label.device_name.is_none() {
                        label.device_name = reading.device_name.clone();
                    }
                }
                None => labels.push(DeviceLabel {
                    device_id: reading.device_id,
                    device_name: reading.device_name.clone(),
                }),
            }
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_store(readings: Vec<RawReading>) -> SampleStore {
        let batch = RawBatch {
            readings,
            malformed: 0,
        };
        SampleStore::from_batch(&chrono_tz::UTC, batch)
    }

    fn raw(timestamp: &str, device_id: DeviceId, name: Option<&str>) -> RawReading {
        RawReading {
            timestamp: Some(timestamp.to_string()),
            device_id,
            device_name: name.map(str::to_string),
            object_name: None,
            values: BTreeMap::from([("P".to_string(), Some(1.0))]),
        }
    }

    #[test]
    fn deserializes_upstream_shape() {
        let parsed: RawReading = serde_json::from_str(
            r#"{"timestamp":"2025-06-02T09:05:00","deviceId":7,"deviceName":"Meter A","objectName":"Plant","values":{"IL1":1.25,"IL2":null}}"#,
        )
        .expect("reading");
        assert_eq!(parsed.device_id, 7);
        assert_eq!(parsed.values.get("IL1"), Some(&Some(1.25)));
        assert_eq!(parsed.values.get("IL2"), Some(&None));
    }

    #[test]
    fn bad_elements_are_skipped_without_losing_siblings() {
        let items: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {"timestamp":null,"deviceId":1,"values":{"IL1":1.0}},
                {"deviceId":1,"values":{"IL1":1.0}},
                {"timestamp":"2025-06-02T09:05:00Z","deviceId":1,"values":{"IL1":"high"}},
                {"timestamp":"2025-06-02T09:10:00Z","values":{}},
                {"timestamp":"2025-06-02T09:15:00Z","deviceId":2,"values":{"IL1":2.5}}
            ]"#,
        )
        .expect("items");

        let batch = RawBatch::decode(items);
        assert_eq!(batch.readings.len(), 3);
        assert_eq!(batch.malformed, 2);
        assert_eq!(batch.readings[0].timestamp, None);

        let store = SampleStore::from_batch(&chrono_tz::UTC, batch);
        assert_eq!(store.len(), 1);
        assert_eq!(store.skipped(), 4);
        assert_eq!(store.readings()[0].device_id, 2);
        assert_eq!(store.readings()[0].values["IL1"], Some(2.5));
    }

    #[test]
    fn sorts_by_time_and_counts_skipped() {
        let store = utc_store(vec![
            raw("2025-06-02T11:00:00Z", 1, Some("A")),
            raw("garbage", 1, Some("A")),
            raw("2025-06-02T09:00:00Z", 2, Some("B")),
            raw("2025-06-02T09:00:00Z", 1, Some("A")),
        ]);

        assert_eq!(store.len(), 3);
        assert_eq!(store.skipped(), 1);
        let order: Vec<DeviceId> = store.readings().iter().map(|r| r.device_id).collect();
        // Stable: equal timestamps keep fetch order.
        assert_eq!(order, vec![2, 1, 1]);

        let (min, max) = store.time_range().expect("range");
        assert!(min < max);
    }

    #[test]
    fn devices_keep_first_appearance_order_and_fallback_names() {
        let store = utc_store(vec![
            raw("2025-06-02T09:00:00Z", 5, None),
            raw("2025-06-02T09:01:00Z", 3, Some("Boiler")),
            raw("2025-06-02T09:02:00Z", 5, Some("Pump")),
        ]);

        let devices = store.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, 5);
        assert_eq!(devices[0].display_name(), "Pump");
        assert_eq!(devices[1].display_name(), "Boiler");

        let anonymous = DeviceLabel {
            device_id: 9,
            device_name: Some("  ".to_string()),
        };
        assert_eq!(anonymous.display_name(), "Device 9");
    }
}
