use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use super::intervals::Interval;
use super::reading::{DeviceId, Reading};

/// `(parameter, device)` pair. Serializes as `"{parameter}_{device_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub parameter: String,
    pub device_id: DeviceId,
}

impl SeriesKey {
    pub fn new(parameter: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            parameter: parameter.into(),
            device_id,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.parameter, self.device_id)
    }
}

impl Serialize for SeriesKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedValue {
    pub value: f64,
    pub device_name: Option<String>,
    pub object_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPoint {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub values: BTreeMap<SeriesKey, AggregatedValue>,
}

impl AggregatedPoint {
    pub fn value(&self, parameter: &str, device_id: DeviceId) -> Option<f64> {
        self.values
            .get(&SeriesKey::new(parameter, device_id))
            .map(|entry| entry.value)
    }
}

fn interval_index(intervals: &[Interval], instant: DateTime<Utc>) -> Option<usize> {
    let idx = intervals.partition_point(|interval| interval.start <= instant);
    let idx = idx.checked_sub(1)?;
    intervals[idx].contains(instant).then_some(idx)
}

/// One point per interval that received at least one reading, in interval order.
///
/// Within an interval the first non-null value seen for each `(parameter, device)` pair wins;
/// later readings of the same pair are not averaged in. Readings are scanned in the order
/// given, which is timestamp order for a `SampleStore`.
pub fn aggregate_buckets(intervals: &[Interval], readings: &[Reading]) -> Vec<AggregatedPoint> {
    let mut points: BTreeMap<usize, AggregatedPoint> = BTreeMap::new();

    for reading in readings {
        let Some(idx) = interval_index(intervals, reading.timestamp) else {
            continue;
        };
        let interval = intervals[idx];
        let point = points.entry(idx).or_insert_with(|| AggregatedPoint {
            start: interval.start,
            end: interval.end,
            values: BTreeMap::new(),
        });
        for (parameter, value) in reading.present_values() {
            if let Entry::Vacant(slot) = point
                .values
                .entry(SeriesKey::new(parameter, reading.device_id))
            {
                slot.insert(AggregatedValue {
                    value,
                    device_name: reading.device_name.clone(),
                    object_name: reading.object_name.clone(),
                });
            }
        }
    }

    points.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::intervals::{generate_intervals, Granularity};
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, 0).single().expect("utc")
    }

    fn reading(timestamp: DateTime<Utc>, device_id: DeviceId, values: &[(&str, Option<f64>)]) -> Reading {
        Reading {
            timestamp,
            device_id,
            device_name: Some(format!("Meter {device_id}")),
            object_name: Some("Plant".to_string()),
            values: values
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        }
    }

    fn hourly(readings: &[Reading]) -> Vec<AggregatedPoint> {
        let min = readings.iter().map(|r| r.timestamp).min().expect("min");
        let max = readings.iter().map(|r| r.timestamp).max().expect("max");
        let intervals =
            generate_intervals(&chrono_tz::UTC, min, max, Granularity::Hour).expect("intervals");
        aggregate_buckets(&intervals, readings)
    }

    #[test]
    fn single_interval_keeps_first_reading() {
        let readings = vec![
            reading(at(9, 10), 1, &[("IL1", Some(1.0))]),
            reading(at(9, 40), 1, &[("IL1", Some(3.0))]),
        ];
        let points = hourly(&readings);

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].start, at(9, 0));
        assert_eq!(points[0].end, at(10, 0));
        assert_eq!(points[0].value("IL1", 1), Some(1.0));
    }

    #[test]
    fn empty_intervals_produce_no_point() {
        let readings = vec![
            reading(at(9, 5), 1, &[("P", Some(10.0))]),
            reading(at(11, 5), 1, &[("P", Some(20.0))]),
        ];
        let points = hourly(&readings);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].start, at(9, 0));
        assert_eq!(points[1].start, at(11, 0));
        assert_eq!(points[1].value("P", 1), Some(20.0));
    }

    #[test]
    fn devices_sharing_an_interval_stay_separate() {
        let readings = vec![
            reading(at(9, 5), 1, &[("IL1", Some(1.0))]),
            reading(at(9, 5), 2, &[("IL1", Some(2.0))]),
        ];
        let points = hourly(&readings);

        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value("IL1", 1), Some(1.0));
        assert_eq!(points[0].value("IL1", 2), Some(2.0));

        let json = serde_json::to_value(&points[0]).expect("json");
        assert_eq!(json["values"]["IL1_1"]["value"], 1.0);
        assert_eq!(json["values"]["IL1_2"]["device_name"], "Meter 2");
    }

    #[test]
    fn boundary_reading_goes_to_later_interval() {
        let readings = vec![
            reading(at(9, 30), 1, &[("P", Some(1.0))]),
            reading(at(10, 0), 1, &[("P", Some(2.0))]),
        ];
        let points = hourly(&readings);

        assert_eq!(points.len(), 2);
        assert_eq!(points[1].start, at(10, 0));
        assert_eq!(points[1].value("P", 1), Some(2.0));
    }

    #[test]
    fn later_reading_fills_keys_missing_from_the_first() {
        let readings = vec![
            reading(at(9, 5), 1, &[("IL1", Some(1.0)), ("IL2", None)]),
            reading(at(9, 20), 1, &[("IL1", Some(5.0)), ("IL2", Some(7.0))]),
        ];
        let points = hourly(&readings);

        assert_eq!(points[0].value("IL1", 1), Some(1.0));
        assert_eq!(points[0].value("IL2", 1), Some(7.0));
    }

    #[test]
    fn every_pair_appears_exactly_where_it_was_observed() {
        let readings = vec![
            reading(at(8, 15), 1, &[("IL1", Some(1.0)), ("U", Some(230.0))]),
            reading(at(8, 45), 2, &[("IL1", Some(2.0))]),
            reading(at(9, 5), 2, &[("U", Some(229.0))]),
            reading(at(11, 59), 1, &[("IL1", Some(4.0)), ("P", None)]),
            reading(at(12, 0), 3, &[("P", Some(12.0))]),
        ];
        let intervals = generate_intervals(&chrono_tz::UTC, at(8, 15), at(12, 0), Granularity::Hour)
            .expect("intervals");
        let points = aggregate_buckets(&intervals, &readings);

        for point in &points {
            let expected: BTreeSet<SeriesKey> = readings
                .iter()
                .filter(|r| point.start <= r.timestamp && r.timestamp < point.end)
                .flat_map(|r| {
                    r.present_values()
                        .map(|(key, _)| SeriesKey::new(key, r.device_id))
                        .collect::<Vec<_>>()
                })
                .collect();
            let actual: BTreeSet<SeriesKey> = point.values.keys().cloned().collect();
            assert_eq!(actual, expected, "interval starting {}", point.start);
        }

        let starts: Vec<_> = points.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![at(8, 0), at(9, 0), at(11, 0), at(12, 0)]);
    }
}
