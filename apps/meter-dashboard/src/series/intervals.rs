use chrono::{DateTime, TimeZone, Utc};

use super::PipelineError;
use crate::time::{floor_to_granularity, next_boundary};

pub const MAX_INTERVALS: usize = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

/// Half-open bucket `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Contiguous buckets from the floor of `min` through the bucket containing `max`.
pub fn generate_intervals<Tz: TimeZone>(
    tz: &Tz,
    min: DateTime<Utc>,
    max: DateTime<Utc>,
    granularity: Granularity,
) -> Result<Vec<Interval>, PipelineError> {
    if min > max {
        return Err(PipelineError::InvalidRange { min, max });
    }

    let mut intervals = Vec::new();
    let mut start = floor_to_granularity(tz, min, granularity);
    while start <= max {
        if intervals.len() >= MAX_INTERVALS {
            return Err(PipelineError::TooManyIntervals {
                count: intervals.len() + 1,
                max: MAX_INTERVALS,
            });
        }
        let end = next_boundary(tz, start, granularity);
        intervals.push(Interval { start, end });
        start = end;
    }
    Ok(intervals)
}
