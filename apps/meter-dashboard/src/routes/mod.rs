pub mod devices;
pub mod health;
pub mod visualization;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(visualization::router())
                .merge(devices::router())
                .merge(crate::openapi::router()),
        )
        .with_state(state)
}
