use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::series::reading::DeviceId;

pub use crate::series::projection::{ParameterGroup, ParameterInfo};

pub const DEFAULT_METER_TYPE: &str = "electrical";

const FORM_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct MeterInfo {
    pub id: DeviceId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub meter_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ObjectInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub devices: Vec<MeterInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeviceTypeInfo {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub device_type: String,
}

/// Meters of the selected objects, then narrowed to the selected types. An empty selection
/// means "all".
pub fn filter_meters(
    objects: &[ObjectInfo],
    object_ids: &[i64],
    device_types: &[String],
) -> Vec<MeterInfo> {
    objects
        .iter()
        .filter(|object| object_ids.is_empty() || object_ids.contains(&object.id))
        .flat_map(|object| object.devices.iter())
        .filter(|meter| {
            device_types.is_empty()
                || meter
                    .meter_type
                    .as_ref()
                    .is_some_and(|kind| device_types.contains(kind))
        })
        .cloned()
        .collect()
}

/// Type of the first selected meter, or `electrical` when it is unknown.
pub fn resolve_meter_type(meters: &[MeterInfo], meter_ids: &[DeviceId]) -> String {
    meter_ids
        .first()
        .and_then(|first| meters.iter().find(|meter| meter.id == *first))
        .and_then(|meter| meter.meter_type.as_deref())
        .map(str::trim)
        .filter(|kind| !kind.is_empty())
        .unwrap_or(DEFAULT_METER_TYPE)
        .to_string()
}

/// Time window presets understood by the upstream. Only `Custom` carries dates; the upstream
/// resolves the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Period {
    #[default]
    Last2Days,
    LastDay,
    LastWeek,
    Last2Weeks,
    LastMonth,
    ThisMonth,
    Custom {
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
}

fn parse_form_datetime(label: &str, raw: &str) -> Result<NaiveDateTime, AppError> {
    let trimmed = raw.trim();
    FORM_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| AppError::bad_request(format!("Invalid {label}: {trimmed}")))
}

impl Period {
    pub fn parse(
        period: Option<&str>,
        date_from: Option<&str>,
        date_to: Option<&str>,
    ) -> Result<Self, AppError> {
        let raw = period.map(str::trim).filter(|value| !value.is_empty());
        match raw {
            None | Some("last2days") => Ok(Self::Last2Days),
            Some("lastDay") => Ok(Self::LastDay),
            Some("lastWeek") => Ok(Self::LastWeek),
            Some("last2weeks") => Ok(Self::Last2Weeks),
            Some("lastMonth") => Ok(Self::LastMonth),
            Some("thisMonth") => Ok(Self::ThisMonth),
            Some("custom") => {
                let from = date_from
                    .ok_or_else(|| AppError::bad_request("dateFrom is required for custom period"))
                    .and_then(|raw| parse_form_datetime("dateFrom", raw))?;
                let to = date_to
                    .ok_or_else(|| AppError::bad_request("dateTo is required for custom period"))
                    .and_then(|raw| parse_form_datetime("dateTo", raw))?;
                if from > to {
                    return Err(AppError::bad_request(
                        "dateTo cannot be earlier than dateFrom",
                    ));
                }
                Ok(Self::Custom { from, to })
            }
            Some(other) => Err(AppError::bad_request(format!("Unknown period: {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Last2Days => "last2days",
            Self::LastDay => "lastDay",
            Self::LastWeek => "lastWeek",
            Self::Last2Weeks => "last2weeks",
            Self::LastMonth => "lastMonth",
            Self::ThisMonth => "thisMonth",
            Self::Custom { .. } => "custom",
        }
    }

    /// `(dateFrom, dateTo)` in the form the upstream expects.
    pub fn custom_bounds(&self) -> Option<(String, String)> {
        match self {
            Self::Custom { from, to } => Some((
                from.format("%Y-%m-%dT%H:%M").to_string(),
                to.format("%Y-%m-%dT%H:%M").to_string(),
            )),
            _ => None,
        }
    }
}
