use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::aggregate::{AggregatedPoint, SeriesKey};
use super::downsample::DownsampledPoint;
use super::intervals::Granularity;
use super::reading::{DeviceId, DeviceLabel};

pub const MISSING_CELL: &str = "0.000";
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

const DEVICE_PALETTE: [&str; 16] = [
    "#ff6b35", "#4ecdc4", "#45b7d1", "#96ceb4", "#feca57", "#ff9ff3", "#54a0ff", "#5f27cd",
    "#ff4757", "#2ed573", "#1e90ff", "#ffa502", "#ff6348", "#32cd32", "#4169e1", "#daa520",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ParameterInfo {
    pub code: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ParameterGroup {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterInfo>,
}

fn lookup_parameter<'a>(
    catalog: &'a [ParameterGroup],
    code: &str,
) -> Option<(&'a ParameterGroup, &'a ParameterInfo)> {
    catalog.iter().find_map(|group| {
        group
            .parameters
            .iter()
            .find(|param| param.code == code)
            .map(|param| (group, param))
    })
}

/// "Voltage phase L1" and "Voltage line" share the chart "Voltage".
pub fn chart_group_name(group_name: &str) -> &str {
    group_name.split_whitespace().next().unwrap_or(group_name)
}

pub fn device_color(device_id: DeviceId) -> &'static str {
    DEVICE_PALETTE[device_id.rem_euclid(DEVICE_PALETTE.len() as i64) as usize]
}

/// Three decimals, display only.
pub fn format_value(value: f64) -> String {
    format!("{value:.3}")
}

pub fn format_axis_time<Tz: TimeZone>(
    tz: &Tz,
    instant: DateTime<Utc>,
    granularity: Granularity,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let local = instant.with_timezone(tz);
    let format = match granularity {
        Granularity::Minute => "%d.%m, %H:%M",
        Granularity::Hour => "%d.%m, %H",
        Granularity::Day => "%d.%m",
    };
    local.format(format).to_string()
}

pub fn format_table_time<Tz: TimeZone>(tz: &Tz, instant: DateTime<Utc>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    instant
        .with_timezone(tz)
        .format("%d.%m.%Y, %H:%M:%S")
        .to_string()
}

/// Common row shape for bucketed and downsampled points.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRow {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<SeriesKey, f64>,
}

impl From<&AggregatedPoint> for SeriesRow {
    fn from(point: &AggregatedPoint) -> Self {
        Self {
            timestamp: point.start,
            values: point
                .values
                .iter()
                .map(|(key, entry)| (key.clone(), entry.value))
                .collect(),
        }
    }
}

impl From<&DownsampledPoint> for SeriesRow {
    fn from(point: &DownsampledPoint) -> Self {
        Self {
            timestamp: point.timestamp,
            values: point
                .values
                .iter()
                .map(|(key, value)| (SeriesKey::new(key.clone(), point.device_id), *value))
                .collect(),
        }
    }
}

/// Collapses time-sorted rows sharing a timestamp; the first value per key is kept.
pub fn merge_rows(rows: Vec<SeriesRow>) -> Vec<SeriesRow> {
    let mut merged: Vec<SeriesRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match merged.last_mut() {
            Some(last) if last.timestamp == row.timestamp => {
                for (key, value) in row.values {
                    last.values.entry(key).or_insert(value);
                }
            }
            _ => merged.push(row),
        }
    }
    merged
}

fn unique_selection(selected: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    selected
        .iter()
        .map(|code| code.trim())
        .filter(|code| !code.is_empty() && seen.insert(*code))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ChartLine {
    pub data_key: String,
    pub parameter: String,
    pub device_id: DeviceId,
    pub name: String,
    pub color: String,
    pub connect_nulls: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ChartGroup {
    pub name: String,
    pub lines: Vec<ChartLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub display_time: String,
    /// Keyed by `ChartLine::data_key`; a missing key is a gap in that line.
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct ChartProjection {
    pub groups: Vec<ChartGroup>,
    pub points: Vec<ChartPoint>,
}

/// One chart per parameter group, one line per selected parameter and device. Parameters
/// missing from the catalog are not charted.
pub fn project_chart<Tz: TimeZone>(
    tz: &Tz,
    rows: &[SeriesRow],
    devices: &[DeviceLabel],
    catalog: &[ParameterGroup],
    selected: &[String],
    granularity: Granularity,
) -> ChartProjection
where
    Tz::Offset: std::fmt::Display,
{
    let mut groups: Vec<ChartGroup> = Vec::new();
    let mut charted: HashSet<SeriesKey> = HashSet::new();

    for code in unique_selection(selected) {
        let Some((group, param)) = lookup_parameter(catalog, code) else {
            continue;
        };
        let group_name = chart_group_name(&group.name);
        let idx = match groups.iter().position(|g| g.name == group_name) {
            Some(idx) => idx,
            None => {
                groups.push(ChartGroup {
                    name: group_name.to_string(),
                    lines: Vec::new(),
                });
                groups.len() - 1
            }
        };
        for device in devices {
            let key = SeriesKey::new(code, device.device_id);
            groups[idx].lines.push(ChartLine {
                data_key: key.to_string(),
                parameter: code.to_string(),
                device_id: device.device_id,
                name: format!("{} - {}", param.full_name, device.display_name()),
                color: device_color(device.device_id).to_string(),
                connect_nulls: false,
            });
            charted.insert(key);
        }
    }

    let points = rows
        .iter()
        .map(|row| ChartPoint {
            timestamp: row.timestamp,
            display_time: format_axis_time(tz, row.timestamp, granularity),
            values: row
                .values
                .iter()
                .filter(|(key, _)| charted.contains(*key))
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        })
        .collect();

    ChartProjection { groups, points }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct TableColumn {
    pub key: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct TableRow {
    pub timestamp: DateTime<Utc>,
    pub display_time: String,
    pub cells: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct TableProjection {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

impl TableProjection {
    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let header = std::iter::once(TIMESTAMP_COLUMN)
            .chain(self.columns.iter().map(|column| column.title.as_str()));
        writer.write_record(header)?;
        for row in &self.rows {
            let record = std::iter::once(row.display_time.as_str())
                .chain(row.cells.iter().map(String::as_str));
            writer.write_record(record)?;
        }
        writer
            .into_inner()
            .map_err(|err| csv::Error::from(err.into_error()))
    }
}

/// Every selected parameter times every device, with `MISSING_CELL` where a row has no value.
pub fn project_table<Tz: TimeZone>(
    tz: &Tz,
    rows: &[SeriesRow],
    devices: &[DeviceLabel],
    catalog: &[ParameterGroup],
    selected: &[String],
) -> TableProjection
where
    Tz::Offset: std::fmt::Display,
{
    let mut keys: Vec<SeriesKey> = Vec::new();
    let mut columns: Vec<TableColumn> = Vec::new();
    for code in unique_selection(selected) {
        let title = lookup_parameter(catalog, code)
            .map(|(_, param)| param.full_name.as_str())
            .unwrap_or(code);
        for device in devices {
            let key = SeriesKey::new(code, device.device_id);
            columns.push(TableColumn {
                key: key.to_string(),
                title: format!("{title} - {}", device.display_name()),
            });
            keys.push(key);
        }
    }

    let rows = rows
        .iter()
        .map(|row| TableRow {
            timestamp: row.timestamp,
            display_time: format_table_time(tz, row.timestamp),
            cells: keys
                .iter()
                .map(|key| {
                    row.values
                        .get(key)
                        .map(|value| format_value(*value))
                        .unwrap_or_else(|| MISSING_CELL.to_string())
                })
                .collect(),
        })
        .collect();

    TableProjection { columns, rows }
}
