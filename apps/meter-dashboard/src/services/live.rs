use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::auth::Session;
use crate::series::reading::DeviceId;
use crate::services::upstream::UpstreamError;
use crate::state::AppState;

const DEFAULT_HUB_CAPACITY: usize = 64;

/// Live state of one device as reported by the upstream device dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DeviceStatus {
    #[serde(alias = "deviceId", alias = "id")]
    pub device_id: DeviceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "objectName")]
    pub object_name: Option<String>,
    #[serde(default, alias = "statusColor")]
    pub status_color: Option<String>,
    #[serde(default, alias = "averageValues")]
    #[schema(value_type = Object)]
    pub average_values: BTreeMap<String, JsonValue>,
    #[serde(default, alias = "lastUpdate")]
    pub last_update: Option<String>,
}

/// Upstream `/api/Device/dashboard` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDashboard {
    #[serde(default)]
    pub objects: Vec<DashboardObject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Vec<DeviceStatus>,
}

impl DeviceDashboard {
    pub fn into_statuses(self) -> Vec<DeviceStatus> {
        self.objects
            .into_iter()
            .flat_map(|object| {
                let object_name = object.name;
                object.devices.into_iter().map(move |mut device| {
                    if device.object_name.is_none() {
                        device.object_name = object_name.clone();
                    }
                    device
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, utoipa::ToSchema)]
pub struct DeviceBoard {
    pub version: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub devices: BTreeMap<DeviceId, DeviceStatus>,
}

/// Holds the current board and fans every new one out to subscribers. Boards are immutable:
/// each snapshot builds a new one and swaps it in.
#[derive(Debug)]
pub struct LiveHub {
    board: RwLock<Arc<DeviceBoard>>,
    tx: broadcast::Sender<Arc<DeviceBoard>>,
}

impl Default for LiveHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl LiveHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            board: RwLock::new(Arc::new(DeviceBoard::default())),
            tx,
        }
    }

    pub fn current(&self) -> Arc<DeviceBoard> {
        self.board
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the board with a full snapshot. A device listed twice keeps its last entry.
    pub fn replace(&self, devices: Vec<DeviceStatus>) -> Arc<DeviceBoard> {
        let devices: BTreeMap<DeviceId, DeviceStatus> = devices
            .into_iter()
            .map(|device| (device.device_id, device))
            .collect();
        let mut guard = self.board.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(DeviceBoard {
            version: guard.version + 1,
            updated_at: Some(Utc::now()),
            devices,
        });
        *guard = next.clone();
        // No receivers is fine.
        let _ = self.tx.send(next.clone());
        next
    }

    /// Delivers the current board, then every newer one, to `callback` until the returned
    /// subscription is dropped or unsubscribed. Must be called inside a tokio runtime.
    pub fn subscribe<F>(self: &Arc<Self>, mut callback: F) -> Subscription
    where
        F: FnMut(Arc<DeviceBoard>) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let hub: Weak<LiveHub> = Arc::downgrade(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut delivered: Option<u64> = None;
            let mut deliver = |board: Arc<DeviceBoard>| {
                let fresh = match delivered {
                    Some(last) => board.version > last,
                    None => true,
                };
                if fresh {
                    delivered = Some(board.version);
                    callback(board);
                }
            };

            if let Some(hub) = hub.upgrade() {
                deliver(hub.current());
            }
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(board) => deliver(board),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "live subscriber lagged; resyncing");
                            match hub.upgrade() {
                                Some(hub) => deliver(hub.current()),
                                None => break,
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        Subscription { cancel }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle for a live subscription; delivery stops when it is dropped.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Polls the upstream device dashboard and publishes each snapshot into the hub.
pub struct DeviceFeedService {
    state: AppState,
    interval: Duration,
}

impl DeviceFeedService {
    pub fn new(state: AppState, interval: Duration) -> Self {
        Self { state, interval }
    }

    pub fn start(self, cancel: CancellationToken) {
        let state = self.state.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = poll_device_board(&state).await {
                            warn!(error = %err, "device board poll failed");
                        }
                    }
                }
            }
        });
    }
}

pub async fn poll_device_board(state: &AppState) -> Result<usize, UpstreamError> {
    let session = state
        .config
        .upstream_service_token
        .as_deref()
        .map(Session::new);
    let dashboard = state.upstream.fetch_device_board(session.as_ref()).await?;
    let devices = dashboard.into_statuses();
    let count = devices.len();
    let board = state.live.replace(devices);
    tracing::debug!(devices = count, version = board.version, "device board refreshed");
    Ok(count)
}
