//! Group registry and per-group records
//!
//! Maintains the single authoritative map from group id to its rate state
//! and classification. Records are created lazily on first mark and only
//! removed by a registry-wide clear.

use crate::clock::Clock;
use crate::models::Status;
use crate::rate::{EstimatorConfig, RateEstimator};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Rate state and status of one group
pub struct GroupRecord {
    group_id: String,
    /// Insertion order; drives sweep order and tie-breaking
    seq: u64,
    estimator: RateEstimator,
    status: AtomicU8,
}

impl GroupRecord {
    fn new(group_id: String, seq: u64, estimator: RateEstimator) -> Self {
        Self {
            group_id,
            seq,
            estimator,
            status: AtomicU8::new(Status::GoodCitizen.to_u8()),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn estimator(&self) -> &RateEstimator {
        &self.estimator
    }

    /// Status as of the last sweep
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Only the classifier writes status
    pub(crate) fn set_status(&self, status: Status) {
        self.status.store(status.to_u8(), Ordering::Release);
    }

    pub fn observe(&self, n: u64) {
        self.estimator.observe(n);
    }
}

/// Concurrent map of all known groups
pub struct GroupRegistry {
    /// Map of group_id -> record
    groups: DashMap<String, Arc<GroupRecord>>,
    next_seq: AtomicU64,
    estimator_config: EstimatorConfig,
    clock: Arc<dyn Clock>,
}

impl GroupRegistry {
    /// Create an empty registry whose records share `clock`
    pub fn new(estimator_config: EstimatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            groups: DashMap::new(),
            next_seq: AtomicU64::new(0),
            estimator_config,
            clock,
        }
    }

    /// Return the record for `group_id`, creating it on first sight
    pub fn get_or_create(&self, group_id: &str) -> Arc<GroupRecord> {
        if let Some(record) = self.groups.get(group_id) {
            return Arc::clone(record.value());
        }

        let record = self
            .groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                debug!(group_id = %group_id, seq, "Registering group");
                let estimator = RateEstimator::new(&self.estimator_config, Arc::clone(&self.clock));
                Arc::new(GroupRecord::new(group_id.to_string(), seq, estimator))
            });
        Arc::clone(record.value())
    }

    /// Look up an existing record
    pub fn get(&self, group_id: &str) -> Option<Arc<GroupRecord>> {
        self.groups.get(group_id).map(|r| Arc::clone(r.value()))
    }

    /// All current records in insertion order
    ///
    /// Groups inserted while the snapshot is taken may or may not appear.
    pub fn snapshot_all(&self) -> Vec<Arc<GroupRecord>> {
        let mut records: Vec<_> = self.groups.iter().map(|r| Arc::clone(r.value())).collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Number of groups currently flagged
    pub fn outlier_count(&self) -> usize {
        self.groups
            .iter()
            .filter(|r| r.value().status() == Status::Outlier)
            .count()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Discard every record
    pub fn clear(&self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn registry() -> GroupRegistry {
        GroupRegistry::new(EstimatorConfig::default(), Arc::new(ManualClock::new()))
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let registry = registry();

        let first = registry.get_or_create("tenant-1");
        first.observe(3);
        let again = registry.get_or_create("tenant-1");

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(registry.len(), 1);
        assert_eq!(again.estimator().actual_rate(), 3.0);
        assert_eq!(again.status(), Status::GoodCitizen);
    }

    #[test]
    fn test_snapshot_in_insertion_order() {
        let registry = registry();
        for id in ["d", "a", "c", "b"] {
            registry.get_or_create(id);
        }

        let order: Vec<_> = registry
            .snapshot_all()
            .iter()
            .map(|r| r.group_id().to_string())
            .collect();
        assert_eq!(order, vec!["d", "a", "c", "b"]);
    }

    #[test]
    fn test_outlier_count_tracks_status() {
        let registry = registry();
        let a = registry.get_or_create("a");
        registry.get_or_create("b");

        a.set_status(Status::Outlier);
        assert_eq!(registry.outlier_count(), 1);

        a.set_status(Status::GoodCitizen);
        assert_eq!(registry.outlier_count(), 0);
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        registry.get_or_create("a");
        registry.get_or_create("b");
        assert!(registry.get("a").is_some());

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_concurrent_creation_keeps_one_record() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.get_or_create("shared").observe(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 1);
        let record = registry.get("shared").unwrap();
        assert_eq!(record.seq(), 0);
        assert_eq!(record.estimator().actual_rate(), 800.0);
    }
}
