use crate::storage::records::{StoreSummary, WriteRecord};
use crate::storage::store::{StoreError, StoreFuture, StoreQuery, StoreReply, TrafficStore};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Tables {
    records: Vec<WriteRecord>,
    summary: StoreSummary,
}

/// In-process store. Cloning shares the same tables.
///
/// `set_available(false)` makes every call fail with `Unavailable`, which the
/// tests use to simulate an unreachable host.
#[derive(Clone)]
pub struct MemoryStore {
    name: String,
    tables: Arc<Mutex<Tables>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Arc::new(Mutex::new(Tables::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tables.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored record in insertion order.
    pub fn records(&self) -> Vec<WriteRecord> {
        self.tables.lock().records.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is offline", self.name)))
        }
    }

    fn answer(&self, query: StoreQuery) -> StoreReply {
        let tables = self.tables.lock();
        let records = &tables.records;
        match query {
            StoreQuery::CongestionHistory {
                from,
                to,
                intersection,
            } => StoreReply::History(
                records
                    .iter()
                    .filter_map(|r| match r {
                        WriteRecord::Decision(d) => Some(d),
                        _ => None,
                    })
                    .filter(|d| d.recorded_at >= from && d.recorded_at <= to)
                    .filter(|d| intersection.as_ref().map_or(true, |id| &d.intersection == id))
                    .cloned()
                    .collect(),
            ),
            StoreQuery::RecentEvents {
                intersection,
                limit,
            } => StoreReply::Events(
                records
                    .iter()
                    .rev()
                    .filter_map(|r| match r {
                        WriteRecord::SensorEvent(e) if e.intersection == intersection => Some(e),
                        _ => None,
                    })
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            StoreQuery::LatestSemaphore { intersection } => StoreReply::Semaphore(
                records
                    .iter()
                    .rev()
                    .find_map(|r| match r {
                        WriteRecord::SemaphoreChange(t) if t.intersection == intersection => Some(t),
                        _ => None,
                    })
                    .cloned(),
            ),
            StoreQuery::PriorityActions { limit } => StoreReply::PriorityActions(
                records
                    .iter()
                    .rev()
                    .filter_map(|r| match r {
                        WriteRecord::PriorityAction(a) => Some(a),
                        _ => None,
                    })
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            StoreQuery::Summary => StoreReply::Summary(tables.summary),
        }
    }
}

impl TrafficStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert<'a>(&'a self, record: &'a WriteRecord) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.check()?;
            let mut tables = self.tables.lock();
            tables.summary.count(record);
            tables.records.push(record.clone());
            Ok(())
        })
    }

    fn query<'a>(&'a self, query: StoreQuery) -> StoreFuture<'a, StoreReply> {
        Box::pin(async move {
            self.check()?;
            Ok(self.answer(query))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::control::decision::{DecisionKind, TrafficStateKind};
    use crate::grid::Grid;
    use crate::storage::records::DecisionRecord;
    use chrono::{Duration, TimeZone, Utc};

    fn decision(name: &str, at: i64, state: TrafficStateKind) -> WriteRecord {
        let grid = Grid::from_config(&Config::default());
        WriteRecord::Decision(DecisionRecord {
            intersection: grid.resolve(name).unwrap(),
            previous_state: TrafficStateKind::Normal,
            traffic_state: state,
            decision: DecisionKind::ExtendGreen,
            details: String::new(),
            metrics: serde_json::Value::Null,
            recorded_at: Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap() + Duration::seconds(at),
        })
    }

    #[tokio::test]
    async fn history_is_filtered_by_window_and_intersection() {
        let store = MemoryStore::new("replica");
        for (name, at) in [("INT-A1", 0), ("INT-A2", 10), ("INT-A1", 20), ("INT-A1", 40)] {
            store
                .insert(&decision(name, at, TrafficStateKind::Congestion))
                .await
                .unwrap();
        }
        let base = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        let all = store
            .congestion_history(base, base + Duration::seconds(30), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        let grid = Grid::from_config(&Config::default());
        let a1 = store
            .congestion_history(base, base + Duration::seconds(60), Some(grid.resolve("INT-A1").unwrap()))
            .await
            .unwrap();
        assert_eq!(a1.len(), 3);
        assert_eq!(store.summary().await.unwrap().congestion_detections, 4);
    }

    #[tokio::test]
    async fn offline_store_rejects_everything() {
        let store = MemoryStore::new("primary");
        store.set_available(false);
        let err = store
            .insert(&decision("INT-A1", 0, TrafficStateKind::Normal))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.summary().await.is_err());
        store.set_available(true);
        assert!(store.is_empty());
    }
}
