use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes::{devices, health, visualization};
use crate::series::intervals::Granularity;
use crate::series::projection::{
    ChartGroup, ChartLine, ChartPoint, ChartProjection, ParameterGroup, ParameterInfo,
    TableColumn, TableProjection, TableRow,
};
use crate::services::catalog::{DeviceTypeInfo, MeterInfo, ObjectInfo};
use crate::services::live::{DeviceBoard, DeviceStatus};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(title = "Meter Dashboard API"),
    paths(
        health::healthz_handler,
        visualization::list_objects,
        visualization::list_device_types,
        visualization::list_parameters,
        visualization::list_meters,
        visualization::get_series,
        visualization::export_table_csv,
        devices::get_board,
        devices::stream_board,
    ),
    components(schemas(
        health::HealthResponse,
        visualization::SeriesResponse,
        Granularity,
        ObjectInfo,
        MeterInfo,
        DeviceTypeInfo,
        ParameterGroup,
        ParameterInfo,
        ChartProjection,
        ChartGroup,
        ChartLine,
        ChartPoint,
        TableProjection,
        TableColumn,
        TableRow,
        DeviceBoard,
        DeviceStatus,
    )),
    tags(
        (name = "visualization", description = "Meter readings, catalogs and display-ready series"),
        (name = "devices", description = "Live device status board")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    serde_json::to_value(ApiDoc::openapi()).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize openapi document");
        serde_json::json!({})
    })
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
