use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_SETUP_CONFIG_PATH: &str = "/etc/meter-dashboard/config.json";
const DEFAULT_UPSTREAM_URL: &str = "http://localhost:5000";

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn setup_config_path(env: EnvLookup<'_>) -> PathBuf {
    env_optional_string(env, "DASHBOARD_SETUP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETUP_CONFIG_PATH))
}

/// Optional JSON file written by the installer. Environment variables take precedence.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct SetupConfigOverrides {
    #[serde(default)]
    upstream_url: Option<String>,
    #[serde(default)]
    upstream_timeout_seconds: Option<u64>,
    #[serde(default)]
    upstream_service_token: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    static_root: Option<String>,
    #[serde(default)]
    enable_device_feed: Option<bool>,
    #[serde(default)]
    device_feed_poll_interval_seconds: Option<u64>,
    #[serde(default)]
    default_downsample_points: Option<u64>,
    #[serde(default)]
    max_tracked_views: Option<u64>,
}

fn load_setup_config_overrides(path: &Path) -> Option<SetupConfigOverrides> {
    if !path.exists() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to read setup config; using env defaults"
            );
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to parse setup config; using env defaults"
            );
            None
        }
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub upstream_url: Url,
    pub upstream_timeout_seconds: u64,
    pub upstream_service_token: Option<String>,
    pub timezone: Tz,
    pub static_root: Option<PathBuf>,
    pub enable_device_feed: bool,
    pub device_feed_poll_interval_seconds: u64,
    pub default_downsample_points: usize,
    pub max_tracked_views: usize,
}

impl DashboardConfig {
    pub fn from_env(cli_static_root: Option<PathBuf>) -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let overrides = load_setup_config_overrides(&setup_config_path(&env));
        Self::from_sources(&env, overrides.unwrap_or_default(), cli_static_root)
    }

    fn from_sources(
        env: EnvLookup<'_>,
        overrides: SetupConfigOverrides,
        cli_static_root: Option<PathBuf>,
    ) -> Result<Self> {
        let upstream_raw = env_optional_string(env, "DASHBOARD_UPSTREAM_URL")
            .or_else(|| non_empty(overrides.upstream_url.as_ref()))
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
        let upstream_url = parse_upstream_url(&upstream_raw)?;

        let upstream_timeout_seconds = env_u64(env, "DASHBOARD_UPSTREAM_TIMEOUT_SECONDS")
            .or(overrides.upstream_timeout_seconds)
            .unwrap_or(15)
            .clamp(1, 300);
        let upstream_service_token = env_optional_string(env, "DASHBOARD_UPSTREAM_SERVICE_TOKEN")
            .or_else(|| non_empty(overrides.upstream_service_token.as_ref()));

        let timezone = match env_optional_string(env, "DASHBOARD_TIMEZONE")
            .or_else(|| non_empty(overrides.timezone.as_ref()))
        {
            Some(name) => parse_timezone(&name)?,
            None => host_timezone(),
        };

        let static_root = cli_static_root
            .or_else(|| env_optional_string(env, "DASHBOARD_STATIC_ROOT").map(PathBuf::from))
            .or_else(|| non_empty(overrides.static_root.as_ref()).map(PathBuf::from));

        let enable_device_feed = env_bool(env, "DASHBOARD_ENABLE_DEVICE_FEED")
            .or(overrides.enable_device_feed)
            .unwrap_or(true);
        let device_feed_poll_interval_seconds =
            env_u64(env, "DASHBOARD_DEVICE_FEED_POLL_INTERVAL_SECONDS")
                .or(overrides.device_feed_poll_interval_seconds)
                .unwrap_or(10)
                .clamp(1, 3600);
        let default_downsample_points = env_u64(env, "DASHBOARD_DEFAULT_DOWNSAMPLE_POINTS")
            .or(overrides.default_downsample_points)
            .unwrap_or(500)
            .clamp(1, 100_000) as usize;
        let max_tracked_views = env_u64(env, "DASHBOARD_MAX_TRACKED_VIEWS")
            .or(overrides.max_tracked_views)
            .unwrap_or(256)
            .clamp(1, 10_000) as usize;

        Ok(Self {
            upstream_url,
            upstream_timeout_seconds,
            upstream_service_token,
            timezone,
            static_root,
            enable_device_feed,
            device_feed_poll_interval_seconds,
            default_downsample_points,
            max_tracked_views,
        })
    }
}

fn parse_upstream_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid DASHBOARD_UPSTREAM_URL ({raw})"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("DASHBOARD_UPSTREAM_URL must use http or https (got {})", url.scheme());
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        anyhow::bail!("DASHBOARD_UPSTREAM_URL must include a host");
    }
    Ok(url)
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|err| anyhow::anyhow!("unknown DASHBOARD_TIMEZONE {name}: {err}"))
}

fn host_timezone() -> Tz {
    match iana_time_zone::get_timezone() {
        Ok(name) => name.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(timezone = %name, "host timezone not recognised; using UTC");
            Tz::UTC
        }),
        Err(err) => {
            tracing::warn!(error = %err, "failed to detect host timezone; using UTC");
            Tz::UTC
        }
    }
}

fn env_optional_string(env: EnvLookup<'_>, key: &str) -> Option<String> {
    env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(env: EnvLookup<'_>, key: &str) -> Option<bool> {
    match env(key).map(|value| value.trim().to_lowercase()) {
        Some(value) if value == "1" || value == "true" || value == "yes" => Some(true),
        Some(value) if value == "0" || value == "false" || value == "no" => Some(false),
        _ => None,
    }
}

fn env_u64(env: EnvLookup<'_>, key: &str) -> Option<u64> {
    env(key).and_then(|value| value.trim().parse::<u64>().ok())
}
