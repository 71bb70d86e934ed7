use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::auth::Session;
use crate::series::reading::SampleStore;
use crate::series::SeriesStrategy;
use crate::services::upstream::ReadingsQuery;

pub const DEFAULT_VIEW: &str = "default";
const MAX_VIEW_NAME_CHARS: usize = 64;

/// A browser view (chart tab, table tab, ...) of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKey(String);

impl ViewKey {
    pub fn new(session: &Session, view: Option<&str>) -> Self {
        let view = view
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_VIEW);
        let view: String = view.chars().take(MAX_VIEW_NAME_CHARS).collect();
        Self(format!("{}:{view}", session.scope()))
    }

    pub fn view_name(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, view)| view)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for ViewKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: ViewKey,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct CommittedView {
    pub generation: u64,
    pub query: ReadingsQuery,
    /// How the committed fetch was shown; exports default to it.
    pub strategy: SeriesStrategy,
    pub store: Arc<SampleStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("fetch {ticket} superseded by committed fetch {committed}")]
pub struct StaleFetch {
    pub ticket: u64,
    pub committed: u64,
}

#[derive(Debug, Default)]
struct ViewSlot {
    touched: u64,
    committed: Option<Arc<CommittedView>>,
}

/// Latest committed sample set per view. A fetch result is only committed when it is newer
/// than what the view already holds, so a slow response can never overwrite a fresher one.
#[derive(Debug)]
pub struct ViewRegistry {
    generation: AtomicU64,
    max_views: usize,
    slots: Mutex<HashMap<ViewKey, ViewSlot>>,
}

impl ViewRegistry {
    pub fn new(max_views: usize) -> Self {
        Self {
            generation: AtomicU64::new(0),
            max_views: max_views.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn begin(&self, key: ViewKey) -> FetchTicket {
        let generation = self.next_generation();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.clone()).or_default().touched = generation;
        self.evict_locked(&mut slots, &key);
        FetchTicket { key, generation }
    }

    pub fn commit(
        &self,
        ticket: &FetchTicket,
        query: ReadingsQuery,
        strategy: SeriesStrategy,
        store: SampleStore,
    ) -> Result<Arc<CommittedView>, StaleFetch> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(ticket.key.clone()).or_default();
        if let Some(current) = slot.committed.as_ref() {
            if current.generation >= ticket.generation {
                return Err(StaleFetch {
                    ticket: ticket.generation,
                    committed: current.generation,
                });
            }
        }
        let committed = Arc::new(CommittedView {
            generation: ticket.generation,
            query,
            strategy,
            store: Arc::new(store),
        });
        slot.committed = Some(committed.clone());
        slot.touched = slot.touched.max(ticket.generation);
        self.evict_locked(&mut slots, &ticket.key);
        Ok(committed)
    }

    pub fn committed(&self, key: &ViewKey) -> Option<Arc<CommittedView>> {
        let touched = self.next_generation();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.get_mut(key)?;
        slot.touched = touched;
        slot.committed.clone()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_locked(&self, slots: &mut HashMap<ViewKey, ViewSlot>, keep: &ViewKey) {
        while slots.len() > self.max_views {
            let oldest = slots
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, slot)| slot.touched)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else {
                break;
            };
            tracing::debug!(view = %oldest, "evicting least recently used view");
            slots.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::intervals::Granularity;
    use crate::series::reading::Reading;
    use crate::services::catalog::Period;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    const HOURLY: SeriesStrategy = SeriesStrategy::Buckets(Granularity::Hour);

    fn query() -> ReadingsQuery {
        ReadingsQuery {
            period: Period::LastDay,
            meter_type: "electrical".to_string(),
            aggregation: Granularity::Hour,
            object_ids: Vec::new(),
            meter_ids: vec![1],
            parameters: vec!["P".to_string()],
        }
    }

    fn store(value: f64) -> SampleStore {
        SampleStore::from_readings(vec![Reading {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).single().expect("utc"),
            device_id: 1,
            device_name: None,
            object_name: None,
            values: BTreeMap::from([("P".to_string(), Some(value))]),
        }])
    }

    fn key(token: &str, view: &str) -> ViewKey {
        ViewKey::new(&Session::new(token), Some(view))
    }

    #[test]
    fn newer_fetch_wins_regardless_of_completion_order() {
        let registry = ViewRegistry::new(8);
        let first = registry.begin(key("t", "chart"));
        let second = registry.begin(key("t", "chart"));
        assert!(second.generation > first.generation);

        registry.commit(&second, query(), HOURLY, store(2.0)).expect("newer commits");
        let stale = registry.commit(&first, query(), HOURLY, store(1.0)).unwrap_err();
        assert_eq!(stale.ticket, first.generation);
        assert_eq!(stale.committed, second.generation);

        let committed = registry.committed(&key("t", "chart")).expect("committed");
        assert_eq!(committed.generation, second.generation);
        assert_eq!(committed.strategy, HOURLY);
        assert_eq!(committed.store.readings()[0].values["P"], Some(2.0));
    }

    #[test]
    fn in_order_completion_commits_both() {
        let registry = ViewRegistry::new(8);
        let first = registry.begin(key("t", "chart"));
        let second = registry.begin(key("t", "chart"));
        registry.commit(&first, query(), HOURLY, store(1.0)).expect("first");
        registry.commit(&second, query(), HOURLY, store(2.0)).expect("second");
        assert_eq!(
            registry
                .committed(&key("t", "chart"))
                .expect("committed")
                .generation,
            second.generation
        );
    }

    #[test]
    fn views_are_scoped_by_session_and_name() {
        let registry = ViewRegistry::new(8);
        let a = registry.begin(key("alice", "chart"));
        registry.commit(&a, query(), HOURLY, store(1.0)).expect("commit");

        assert!(registry.committed(&key("bob", "chart")).is_none());
        assert!(registry.committed(&key("alice", "table")).is_none());
        assert_eq!(key("alice", "chart").view_name(), "chart");
        assert_eq!(
            ViewKey::new(&Session::new("alice"), Some("  ")).view_name(),
            DEFAULT_VIEW
        );
    }

    #[test]
    fn evicts_least_recently_used_view() {
        let registry = ViewRegistry::new(2);
        let a = registry.begin(key("t", "a"));
        registry.commit(&a, query(), HOURLY, store(1.0)).expect("a");
        let b = registry.begin(key("t", "b"));
        registry.commit(&b, query(), HOURLY, store(1.0)).expect("b");
        assert!(registry.committed(&key("t", "a")).is_some());

        registry.begin(key("t", "c"));
        assert_eq!(registry.len(), 2);
        assert!(registry.committed(&key("t", "b")).is_none());
        assert!(registry.committed(&key("t", "a")).is_some());
    }
}
