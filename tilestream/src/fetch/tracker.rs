//! In-flight fetch bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::tile::TileId;

use super::FetchTask;

/// Tracks every fetch currently pending or running for one layer.
///
/// Keyed by `(identity, preloading)`: at most one non-canceled task exists
/// per key, while a visible and a preloading fetch for the same address may
/// coexist. Shared between the frame thread (inserting and canceling) and
/// pool workers (removing on completion).
#[derive(Debug, Default)]
pub struct FetchTracker {
    tasks: DashMap<(TileId, bool), Arc<FetchTask>>,
}

impl FetchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task. A canceled predecessor under the same key is replaced
    /// (it is already draining and will not remove its replacement).
    ///
    /// Returns `false` (dropping the new task) when an active fetch already
    /// holds the key.
    pub fn insert(&self, task: Arc<FetchTask>) -> bool {
        match self.tasks.entry((task.tile_id(), task.is_preloading())) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if entry.get().is_canceled() {
                    entry.insert(task);
                    true
                } else {
                    false
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(task);
                true
            }
        }
    }

    /// Stop tracking a specific task.
    ///
    /// Matched by identity of the task object, so a completion arriving
    /// after its canceled task was replaced leaves the replacement tracked.
    pub fn remove_task(&self, task: &Arc<FetchTask>) {
        self.tasks
            .remove_if(&(task.tile_id(), task.is_preloading()), |_, stored| {
                Arc::ptr_eq(stored, task)
            });
    }

    /// Whether any fetch (canceled or not) is tracked for the given key.
    pub fn contains(&self, id: TileId, preloading: bool) -> bool {
        self.tasks.contains_key(&(id, preloading))
    }

    /// Whether a non-canceled fetch is tracked for the given key.
    pub fn contains_active(&self, id: TileId, preloading: bool) -> bool {
        self.tasks
            .get(&(id, preloading))
            .is_some_and(|task| !task.is_canceled())
    }

    /// Number of tracked tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of in-flight visible (non-preloading) fetches.
    pub fn visible_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.value().is_preloading())
            .count()
    }

    /// Number of in-flight preloading fetches.
    pub fn preloading_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.value().is_preloading())
            .count()
    }

    /// Snapshot of all tracked tasks.
    pub fn all(&self) -> Vec<Arc<FetchTask>> {
        self.tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Mark every tracked task's eventual result as stale.
    pub fn invalidate_all(&self) {
        for entry in self.tasks.iter() {
            entry.value().invalidate();
        }
    }

    /// Cancel every tracked task whose key is not in `wanted`.
    ///
    /// Returns the number of cancellations requested. Canceled tasks remove
    /// themselves from the tracker when their completion is processed.
    pub fn cancel_unrequested(&self, wanted: &HashSet<(TileId, bool)>) -> usize {
        let mut canceled = 0;
        for entry in self.tasks.iter() {
            let task = entry.value();
            if !wanted.contains(&(task.tile_id(), task.is_preloading())) && !task.is_canceled() {
                task.cancel();
                canceled += 1;
            }
        }
        canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{FrameMode, TileAddress};

    fn make_task(x: i32, preloading: bool) -> Arc<FetchTask> {
        let address = TileAddress::new(x, 0, 4, 0);
        let id = TileId::of(&address, FrameMode::PerFrame);
        Arc::new(FetchTask::new(id, address, preloading, 0, 0, 18))
    }

    #[test]
    fn test_at_most_one_active_task_per_key() {
        let tracker = FetchTracker::new();
        assert!(tracker.insert(make_task(1, false)));
        assert!(!tracker.insert(make_task(1, false)));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_visible_and_preloading_coexist_for_same_id() {
        let tracker = FetchTracker::new();
        assert!(tracker.insert(make_task(1, false)));
        assert!(tracker.insert(make_task(1, true)));
        assert_eq!(tracker.visible_count(), 1);
        assert_eq!(tracker.preloading_count(), 1);
    }

    #[test]
    fn test_canceled_task_is_replaced() {
        let tracker = FetchTracker::new();
        let old = make_task(1, false);
        tracker.insert(Arc::clone(&old));
        old.cancel();

        let new = make_task(1, false);
        assert!(tracker.insert(Arc::clone(&new)));
        assert!(tracker.contains_active(new.tile_id(), false));
        assert_eq!(tracker.len(), 1);

        // The draining predecessor's removal must not evict the new task.
        tracker.remove_task(&old);
        assert!(tracker.contains(new.tile_id(), false));

        tracker.remove_task(&new);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_remove_task_releases_key() {
        let tracker = FetchTracker::new();
        let task = make_task(1, false);
        tracker.insert(Arc::clone(&task));

        tracker.remove_task(&task);
        assert!(tracker.is_empty());
        assert!(tracker.insert(task));
    }

    #[test]
    fn test_contains_active_ignores_canceled() {
        let tracker = FetchTracker::new();
        let task = make_task(1, false);
        tracker.insert(Arc::clone(&task));
        assert!(tracker.contains_active(task.tile_id(), false));

        task.cancel();
        assert!(!tracker.contains_active(task.tile_id(), false));
        assert!(tracker.contains(task.tile_id(), false));
    }

    #[test]
    fn test_invalidate_all_marks_every_task() {
        let tracker = FetchTracker::new();
        let a = make_task(1, false);
        let b = make_task(2, true);
        tracker.insert(Arc::clone(&a));
        tracker.insert(Arc::clone(&b));

        tracker.invalidate_all();
        assert!(a.is_invalidated());
        assert!(b.is_invalidated());
    }

    #[test]
    fn test_cancel_unrequested_spares_wanted_keys() {
        let tracker = FetchTracker::new();
        let keep = make_task(1, false);
        let drop_a = make_task(2, false);
        let drop_b = make_task(1, true);
        tracker.insert(Arc::clone(&keep));
        tracker.insert(Arc::clone(&drop_a));
        tracker.insert(Arc::clone(&drop_b));

        let mut wanted = HashSet::new();
        wanted.insert((keep.tile_id(), false));
        let canceled = tracker.cancel_unrequested(&wanted);

        assert_eq!(canceled, 2);
        assert!(!keep.is_canceled());
        assert!(drop_a.is_canceled());
        assert!(drop_b.is_canceled());
    }

    #[test]
    fn test_cancel_unrequested_counts_each_task_once() {
        let tracker = FetchTracker::new();
        let task = make_task(1, false);
        tracker.insert(Arc::clone(&task));

        let wanted = HashSet::new();
        assert_eq!(tracker.cancel_unrequested(&wanted), 1);
        assert_eq!(tracker.cancel_unrequested(&wanted), 0, "already canceled");
    }
}
