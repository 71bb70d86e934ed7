use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::reading::{DeviceId, Reading};
use super::PipelineError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownsampledPoint {
    pub timestamp: DateTime<Utc>,
    pub device_id: DeviceId,
    pub device_name: Option<String>,
    pub object_name: Option<String>,
    pub values: BTreeMap<String, f64>,
}

impl DownsampledPoint {
    fn from_reading(reading: &Reading) -> Self {
        Self {
            timestamp: reading.timestamp,
            device_id: reading.device_id,
            device_name: reading.device_name.clone(),
            object_name: reading.object_name.clone(),
            values: reading
                .present_values()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: usize,
}

/// Reduces a single device's readings to at most `target` points by averaging equal-size index
/// segments.
///
/// Each point takes the timestamp of the middle element of its segment. Nulls and missing keys
/// contribute to neither the sum nor the count.
pub fn downsample(
    readings: &[Reading],
    target: usize,
) -> Result<Vec<DownsampledPoint>, PipelineError> {
    if target == 0 {
        return Err(PipelineError::ZeroTargetPoints);
    }

    let mut device_ids: Vec<DeviceId> = Vec::new();
    for reading in readings {
        if !device_ids.contains(&reading.device_id) {
            device_ids.push(reading.device_id);
        }
    }
    if device_ids.len() > 1 {
        return Err(PipelineError::MultipleDevices { device_ids });
    }

    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|reading| reading.timestamp);

    let len = sorted.len();
    if len <= target {
        return Ok(sorted
            .into_iter()
            .map(DownsampledPoint::from_reading)
            .collect());
    }

    let segment_size = len.div_ceil(target);
    let mut points = Vec::with_capacity(target);
    for segment in 0..target {
        let start = segment * segment_size;
        if start >= len {
            break;
        }
        let end = (start + segment_size).min(len);
        let slice = &sorted[start..end];

        let mut means: BTreeMap<&str, Mean> = BTreeMap::new();
        for reading in slice {
            for (key, value) in reading.present_values() {
                let mean = means.entry(key).or_default();
                mean.sum += value;
                mean.count += 1;
            }
        }

        let middle = sorted[(start + end - 1) / 2];
        points.push(DownsampledPoint {
            timestamp: middle.timestamp,
            device_id: middle.device_id,
            device_name: middle.device_name.clone(),
            object_name: middle.object_name.clone(),
            values: means
                .into_iter()
                .map(|(key, mean)| (key.to_string(), mean.sum / mean.count as f64))
                .collect(),
        });
    }
    Ok(points)
}
