use crate::config::DashboardConfig;
use crate::state::AppState;
use url::Url;

/// Points at the discard port so a stray upstream call fails fast instead of hanging.
pub fn test_config() -> DashboardConfig {
    DashboardConfig {
        upstream_url: Url::parse("http://127.0.0.1:9").expect("upstream url"),
        upstream_timeout_seconds: 2,
        upstream_service_token: None,
        timezone: chrono_tz::UTC,
        static_root: None,
        enable_device_feed: false,
        device_feed_poll_interval_seconds: 10,
        default_downsample_points: 500,
        max_tracked_views: 16,
    }
}

pub fn test_state() -> AppState {
    AppState::new(test_config()).expect("test state")
}

pub fn test_state_with_upstream(upstream_url: Url) -> AppState {
    let mut config = test_config();
    config.upstream_url = upstream_url;
    AppState::new(config).expect("test state")
}

/// Serves `app` on an ephemeral loopback port. `None` when the sandbox forbids binding.
pub async fn spawn_upstream(app: axum::Router) -> Option<Url> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.ok()?;
    let addr = listener.local_addr().ok()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Url::parse(&format!("http://{addr}")).ok()
}
