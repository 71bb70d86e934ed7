use crate::config::DashboardConfig;
use crate::services::live::LiveHub;
use crate::services::upstream::UpstreamClient;
use crate::services::views::ViewRegistry;
use anyhow::{Context, Result};
use axum::extract::FromRef;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: DashboardConfig,
    pub upstream: UpstreamClient,
    pub views: Arc<ViewRegistry>,
    pub live: Arc<LiveHub>,
}

impl AppState {
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let upstream = UpstreamClient::new(
            config.upstream_url.clone(),
            Duration::from_secs(config.upstream_timeout_seconds),
        )
        .context("failed to build upstream client")?;
        let views = Arc::new(ViewRegistry::new(config.max_tracked_views));
        Ok(Self {
            config,
            upstream,
            views,
            live: Arc::new(LiveHub::default()),
        })
    }

    /// Zone used for parsing naive device timestamps and for bucket boundaries.
    pub fn timezone(&self) -> Tz {
        self.config.timezone
    }
}

impl FromRef<AppState> for Arc<LiveHub> {
    fn from_ref(state: &AppState) -> Arc<LiveHub> {
        state.live.clone()
    }
}
