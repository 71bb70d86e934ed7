use axum::extract::{Path, RawQuery, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use url::form_urlencoded;

use crate::auth::Session;
use crate::error::{internal_error, map_pipeline_error};
use crate::series::intervals::Granularity;
use crate::series::projection::{ChartProjection, TableProjection};
use crate::series::reading::{DeviceId, SampleStore};
use crate::series::{build_series, SeriesPoints, SeriesStrategy};
use crate::services::catalog::{
    filter_meters, resolve_meter_type, DeviceTypeInfo, MeterInfo, ObjectInfo, ParameterGroup,
    Period, DEFAULT_METER_TYPE,
};
use crate::services::upstream::{ReadingsQuery, UpstreamError};
use crate::services::views::ViewKey;
use crate::state::AppState;

const CSV_FILENAME: &str = "meter-data.csv";

/// Query string shared by the visualization endpoints. List filters arrive as repeated keys
/// (`meterIds=1&meterIds=2`); the `[]` suffix is accepted too.
#[derive(Debug, Default)]
struct VisualizationParams {
    period: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    meter_type: Option<String>,
    aggregation: Option<String>,
    object_ids: Vec<i64>,
    meter_ids: Vec<DeviceId>,
    device_types: Vec<String>,
    parameters: Vec<String>,
    strategy: Option<String>,
    points: Option<String>,
    view: Option<String>,
}

fn parse_id(key: &str, value: &str) -> Result<i64, (StatusCode, String)> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("Invalid {key} value: {value}")))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl VisualizationParams {
    fn parse(raw: Option<&str>) -> Result<Self, (StatusCode, String)> {
        let mut params = Self::default();
        let Some(raw) = raw else {
            return Ok(params);
        };
        for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
            let key = key.trim_end_matches("[]");
            match key {
                "period" => params.period = non_blank(&value),
                "dateFrom" => params.date_from = non_blank(&value),
                "dateTo" => params.date_to = non_blank(&value),
                "meterType" => params.meter_type = non_blank(&value),
                "aggregation" => params.aggregation = non_blank(&value),
                "objectIds" => params.object_ids.push(parse_id(key, &value)?),
                "meterIds" => params.meter_ids.push(parse_id(key, &value)?),
                "deviceTypes" => params.device_types.extend(non_blank(&value)),
                "parameters" => {
                    if let Some(code) = non_blank(&value) {
                        if !params.parameters.contains(&code) {
                            params.parameters.push(code);
                        }
                    }
                }
                "strategy" => params.strategy = non_blank(&value),
                "points" => params.points = non_blank(&value),
                "view" => params.view = non_blank(&value),
                _ => {}
            }
        }
        Ok(params)
    }

    fn granularity(&self, fallback: Granularity) -> Result<Granularity, (StatusCode, String)> {
        match self.aggregation.as_deref() {
            None => Ok(fallback),
            Some(raw) => Granularity::parse(raw).ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("Invalid aggregation: {raw} (expected minute, hour or day)"),
                )
            }),
        }
    }

    fn strategy(
        &self,
        granularity: Granularity,
        default_points: usize,
    ) -> Result<SeriesStrategy, (StatusCode, String)> {
        self.strategy_or(
            SeriesStrategy::Buckets(granularity),
            granularity,
            default_points,
        )
    }

    /// `shown` applies when no strategy is given. A downsampled view keeps its point count
    /// unless `points` overrides it.
    fn strategy_or(
        &self,
        shown: SeriesStrategy,
        granularity: Granularity,
        default_points: usize,
    ) -> Result<SeriesStrategy, (StatusCode, String)> {
        let default_points = match shown {
            SeriesStrategy::Downsample { points } => points,
            SeriesStrategy::Buckets(_) => default_points,
        };
        match self.strategy.as_deref().unwrap_or(shown.name()) {
            "buckets" => Ok(SeriesStrategy::Buckets(granularity)),
            "downsample" => {
                let points = match self.points.as_deref() {
                    None => default_points,
                    Some(raw) => raw.parse::<usize>().map_err(|_| {
                        (StatusCode::BAD_REQUEST, format!("Invalid points: {raw}"))
                    })?,
                };
                Ok(SeriesStrategy::Downsample { points })
            }
            other => Err((
                StatusCode::BAD_REQUEST,
                format!("Invalid strategy: {other} (expected buckets or downsample)"),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct SeriesResponse {
    pub view: String,
    pub generation: u64,
    pub strategy: String,
    pub meter_type: String,
    pub skipped_readings: usize,
    pub interval_count: usize,
    #[schema(value_type = Vec<Object>)]
    pub points: SeriesPoints,
    pub chart: ChartProjection,
    pub table: TableProjection,
}

#[utoipa::path(
    get,
    path = "/api/visualization/objects",
    tag = "visualization",
    responses(
        (status = 200, description = "Objects with their meters", body = Vec<ObjectInfo>),
        (status = 401, description = "Missing bearer token"),
        (status = 502, description = "Upstream unavailable")
    )
)]
pub(crate) async fn list_objects(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<ObjectInfo>>, (StatusCode, String)> {
    let objects = state
        .upstream
        .fetch_objects(&session)
        .await
        .map_err(UpstreamError::into_rejection)?;
    Ok(Json(objects))
}

#[utoipa::path(
    get,
    path = "/api/visualization/device-types",
    tag = "visualization",
    responses(
        (status = 200, description = "Meter types", body = Vec<DeviceTypeInfo>),
        (status = 401, description = "Missing bearer token"),
        (status = 502, description = "Upstream unavailable")
    )
)]
pub(crate) async fn list_device_types(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<DeviceTypeInfo>>, (StatusCode, String)> {
    let types = state
        .upstream
        .fetch_device_types(&session)
        .await
        .map_err(UpstreamError::into_rejection)?;
    Ok(Json(types))
}

#[utoipa::path(
    get,
    path = "/api/visualization/parameters/{meter_type}",
    tag = "visualization",
    params(("meter_type" = String, Path, description = "Meter type, e.g. electrical")),
    responses(
        (status = 200, description = "Readable parameter groups", body = Vec<ParameterGroup>),
        (status = 401, description = "Missing bearer token"),
        (status = 502, description = "Upstream unavailable")
    )
)]
pub(crate) async fn list_parameters(
    State(state): State<AppState>,
    session: Session,
    Path(meter_type): Path<String>,
) -> Result<Json<Vec<ParameterGroup>>, (StatusCode, String)> {
    let meter_type = non_blank(&meter_type).unwrap_or_else(|| DEFAULT_METER_TYPE.to_string());
    let groups = state
        .upstream
        .fetch_parameters(&session, &meter_type)
        .await
        .map_err(UpstreamError::into_rejection)?;
    Ok(Json(groups))
}

#[utoipa::path(
    get,
    path = "/api/visualization/meters",
    tag = "visualization",
    params(
        ("objectIds" = Option<Vec<i64>>, Query, description = "Repeated; empty means all objects"),
        ("deviceTypes" = Option<Vec<String>>, Query, description = "Repeated; empty means all types")
    ),
    responses(
        (status = 200, description = "Meters of the selected objects and types", body = Vec<MeterInfo>),
        (status = 400, description = "Invalid filter"),
        (status = 401, description = "Missing bearer token")
    )
)]
pub(crate) async fn list_meters(
    State(state): State<AppState>,
    session: Session,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<MeterInfo>>, (StatusCode, String)> {
    let params = VisualizationParams::parse(raw.as_deref())?;
    let objects = state
        .upstream
        .fetch_objects(&session)
        .await
        .map_err(UpstreamError::into_rejection)?;
    Ok(Json(filter_meters(
        &objects,
        &params.object_ids,
        &params.device_types,
    )))
}

#[utoipa::path(
    get,
    path = "/api/visualization/series",
    tag = "visualization",
    params(
        ("period" = Option<String>, Query, description = "last2days (default), lastDay, lastWeek, last2weeks, lastMonth, thisMonth or custom"),
        ("dateFrom" = Option<String>, Query, description = "YYYY-MM-DDTHH:MM, custom period only"),
        ("dateTo" = Option<String>, Query, description = "YYYY-MM-DDTHH:MM, custom period only"),
        ("meterType" = Option<String>, Query, description = "Defaults to the type of the first selected meter"),
        ("aggregation" = Option<String>, Query, description = "minute, hour (default) or day"),
        ("objectIds" = Option<Vec<i64>>, Query, description = "Repeated"),
        ("meterIds" = Option<Vec<i64>>, Query, description = "Repeated"),
        ("parameters" = Option<Vec<String>>, Query, description = "Repeated parameter codes"),
        ("strategy" = Option<String>, Query, description = "buckets (default) or downsample"),
        ("points" = Option<usize>, Query, description = "Downsample target"),
        ("view" = Option<String>, Query, description = "View name used to order concurrent fetches")
    ),
    responses(
        (status = 200, description = "Display-ready series", body = SeriesResponse),
        (status = 400, description = "Invalid parameters"),
        (status = 401, description = "Missing bearer token"),
        (status = 409, description = "Superseded by a newer request for the same view"),
        (status = 422, description = "Range too large for the aggregation"),
        (status = 502, description = "Upstream unavailable")
    )
)]
pub(crate) async fn get_series(
    State(state): State<AppState>,
    session: Session,
    RawQuery(raw): RawQuery,
) -> Result<Json<SeriesResponse>, (StatusCode, String)> {
    let params = VisualizationParams::parse(raw.as_deref())?;
    let period = Period::parse(
        params.period.as_deref(),
        params.date_from.as_deref(),
        params.date_to.as_deref(),
    )?;
    let aggregation = params.granularity(Granularity::Hour)?;
    let strategy = params.strategy(aggregation, state.config.default_downsample_points)?;

    let ticket = state
        .views
        .begin(ViewKey::new(&session, params.view.as_deref()));

    let meter_type = match params.meter_type {
        Some(meter_type) => meter_type,
        None if params.meter_ids.is_empty() => DEFAULT_METER_TYPE.to_string(),
        None => {
            let objects = state
                .upstream
                .fetch_objects(&session)
                .await
                .map_err(UpstreamError::into_rejection)?;
            resolve_meter_type(&filter_meters(&objects, &[], &[]), &params.meter_ids)
        }
    };

    let query = ReadingsQuery {
        period,
        meter_type,
        aggregation,
        object_ids: params.object_ids,
        meter_ids: params.meter_ids,
        parameters: params.parameters,
    };
    let (raw_readings, catalog) = tokio::try_join!(
        state.upstream.fetch_readings(&session, &query),
        state.upstream.fetch_parameters(&session, &query.meter_type),
    )
    .map_err(UpstreamError::into_rejection)?;

    let tz = state.timezone();
    let store = SampleStore::from_batch(&tz, raw_readings);
    let series = build_series(&tz, &store, strategy, &catalog, &query.parameters)
        .map_err(map_pipeline_error)?;
    let skipped_readings = store.skipped();
    let meter_type = query.meter_type.clone();

    let committed = state
        .views
        .commit(&ticket, query, strategy, store)
        .map_err(|stale| {
            tracing::info!(
                view = %ticket.key,
                ticket = stale.ticket,
                committed = stale.committed,
                "discarding superseded fetch"
            );
            (
                StatusCode::CONFLICT,
                "Superseded by a newer request for this view".to_string(),
            )
        })?;

    Ok(Json(SeriesResponse {
        view: ticket.key.view_name().to_string(),
        generation: committed.generation,
        strategy: strategy.name().to_string(),
        meter_type,
        skipped_readings,
        interval_count: series.interval_count,
        points: series.points,
        chart: series.chart,
        table: series.table,
    }))
}

#[utoipa::path(
    get,
    path = "/api/visualization/table.csv",
    tag = "visualization",
    params(
        ("view" = Option<String>, Query, description = "View whose last loaded data is exported"),
        ("aggregation" = Option<String>, Query, description = "Defaults to the aggregation of the last fetch"),
        ("parameters" = Option<Vec<String>>, Query, description = "Defaults to the parameters of the last fetch"),
        ("strategy" = Option<String>, Query, description = "buckets or downsample; defaults to the strategy of the last fetch"),
        ("points" = Option<usize>, Query, description = "Downsample target")
    ),
    responses(
        (status = 200, description = "Table as CSV", body = String, content_type = "text/csv"),
        (status = 401, description = "Missing bearer token"),
        (status = 404, description = "Nothing loaded for this view yet")
    )
)]
pub(crate) async fn export_table_csv(
    State(state): State<AppState>,
    session: Session,
    RawQuery(raw): RawQuery,
) -> Result<Response, (StatusCode, String)> {
    let params = VisualizationParams::parse(raw.as_deref())?;
    let key = ViewKey::new(&session, params.view.as_deref());
    let committed = state.views.committed(&key).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            format!("No data loaded for view {}", key.view_name()),
        )
    })?;

    let aggregation = params.granularity(committed.query.aggregation)?;
    let strategy = params.strategy_or(
        committed.strategy,
        aggregation,
        state.config.default_downsample_points,
    )?;
    let selected = if params.parameters.is_empty() {
        committed.query.parameters.clone()
    } else {
        params.parameters
    };
    let catalog = state
        .upstream
        .fetch_parameters(&session, &committed.query.meter_type)
        .await
        .map_err(UpstreamError::into_rejection)?;

    let tz = state.timezone();
    let series = build_series(&tz, &committed.store, strategy, &catalog, &selected)
        .map_err(map_pipeline_error)?;
    let body = series.table.to_csv().map_err(internal_error)?;

    Ok((
        [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{CSV_FILENAME}\""),
            ),
        ],
        body,
    )
        .into_response())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/visualization/objects", get(list_objects))
        .route("/visualization/device-types", get(list_device_types))
        .route(
            "/visualization/parameters/{meter_type}",
            get(list_parameters),
        )
        .route("/visualization/meters", get(list_meters))
        .route("/visualization/series", get(get_series))
        .route("/visualization/table.csv", get(export_table_csv))
}
