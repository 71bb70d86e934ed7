//! Pure transformation from a fetched sample set to display-ready series.
//!
//! Nothing in here performs I/O or holds state between calls: a `SampleStore` goes in, a
//! `SeriesView` comes out.

pub mod aggregate;
pub mod downsample;
pub mod intervals;
pub mod projection;
pub mod reading;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use aggregate::{aggregate_buckets, AggregatedPoint};
use downsample::{downsample, DownsampledPoint};
use intervals::{generate_intervals, Granularity};
use projection::{
    merge_rows, project_chart, project_table, ChartProjection, ParameterGroup, SeriesRow,
    TableProjection,
};
use reading::{DeviceId, SampleStore};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid time range: {min} is after {max}")]
    InvalidRange {
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    },
    #[error("time range needs {count} intervals (max {max}); choose a coarser aggregation")]
    TooManyIntervals { count: usize, max: usize },
    #[error("downsample target must be at least 1 point")]
    ZeroTargetPoints,
    #[error("downsampling needs a single device, got {device_ids:?}")]
    MultipleDevices { device_ids: Vec<DeviceId> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesStrategy {
    Buckets(Granularity),
    Downsample { points: usize },
}

impl SeriesStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Buckets(_) => "buckets",
            Self::Downsample { .. } => "downsample",
        }
    }

    /// Granularity used for axis labels. Downsampled series are labelled to the minute.
    pub fn display_granularity(&self) -> Granularity {
        match self {
            Self::Buckets(granularity) => *granularity,
            Self::Downsample { .. } => Granularity::Minute,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SeriesPoints {
    Buckets(Vec<AggregatedPoint>),
    Downsampled(Vec<DownsampledPoint>),
}

impl SeriesPoints {
    pub fn len(&self) -> usize {
        match self {
            Self::Buckets(points) => points.len(),
            Self::Downsampled(points) => points.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesView {
    pub interval_count: usize,
    pub points: SeriesPoints,
    pub chart: ChartProjection,
    pub table: TableProjection,
}

/// Runs the whole pipeline for one sample set. Either every stage succeeds or nothing is
/// returned.
pub fn build_series<Tz: TimeZone>(
    tz: &Tz,
    store: &SampleStore,
    strategy: SeriesStrategy,
    catalog: &[ParameterGroup],
    selected: &[String],
) -> Result<SeriesView, PipelineError>
where
    Tz::Offset: std::fmt::Display,
{
    let (interval_count, points) = match strategy {
        SeriesStrategy::Buckets(granularity) => match store.time_range() {
            Some((min, max)) => {
                let intervals = generate_intervals(tz, min, max, granularity)?;
                let points = aggregate_buckets(&intervals, store.readings());
                (intervals.len(), SeriesPoints::Buckets(points))
            }
            None => (0, SeriesPoints::Buckets(Vec::new())),
        },
        SeriesStrategy::Downsample { points } => {
            let downsampled = downsample(store.readings(), points)?;
            (0, SeriesPoints::Downsampled(downsampled))
        }
    };

    let rows = merge_rows(match &points {
        SeriesPoints::Buckets(points) => points.iter().map(SeriesRow::from).collect(),
        SeriesPoints::Downsampled(points) => points.iter().map(SeriesRow::from).collect(),
    });
    let devices = store.devices();
    let granularity = strategy.display_granularity();

    let chart = project_chart(tz, &rows, &devices, catalog, selected, granularity);
    let table = project_table(tz, &rows, &devices, catalog, selected);

    Ok(SeriesView {
        interval_count,
        points,
        chart,
        table,
    })
}
