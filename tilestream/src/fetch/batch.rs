//! Fetch batch construction: deduplication and submission ordering.

use std::collections::HashMap;

use crate::tile::{TileAddress, TileId};

/// Priority boost for a parent tile coalesced from several wanted children:
/// fetching it once refines all of them, so it jumps the queue.
pub const PARENT_PRIORITY_OFFSET: i32 = 1;

/// One wanted fetch, before deduplication and ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Cache identity the fetch fills.
    pub id: TileId,
    /// Canonical address to fetch.
    pub address: TileAddress,
    /// Whether the fetch fills the preloading tier.
    pub preloading: bool,
    /// Submission priority; larger is sooner.
    pub priority_delta: i32,
}

/// Collects the fetch requests of one planning pass.
///
/// Requests are deduplicated by `(identity, preloading)`; merging keeps the
/// highest priority delta, so a parent wanted by several children is fetched
/// once with its boost intact.
#[derive(Debug, Default)]
pub struct FetchBatch {
    items: Vec<FetchRequest>,
    index: HashMap<(TileId, bool), usize>,
}

impl FetchBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request, merging duplicates.
    pub fn push(&mut self, request: FetchRequest) {
        match self.index.entry((request.id, request.preloading)) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let existing = &mut self.items[*entry.get()];
                existing.priority_delta = existing.priority_delta.max(request.priority_delta);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(self.items.len());
                self.items.push(request);
            }
        }
    }

    /// Number of distinct requests collected.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consume the batch, returning requests in submission order.
    ///
    /// Order: descending priority delta, then visible before preloading,
    /// then requests with a sibling queued at the same parent last (so
    /// single-tile requests are not starved behind a coalescing batch).
    /// The sort is stable - ties keep insertion order.
    pub fn into_sorted(self) -> Vec<FetchRequest> {
        let mut parent_counts: HashMap<TileAddress, usize> = HashMap::new();
        for item in &self.items {
            if item.address.zoom > 0 {
                *parent_counts.entry(item.address.parent()).or_default() += 1;
            }
        }
        let has_sibling = |request: &FetchRequest| -> bool {
            request.address.zoom > 0
                && parent_counts
                    .get(&request.address.parent())
                    .is_some_and(|count| *count >= 2)
        };

        let mut items = self.items;
        items.sort_by(|lhs, rhs| {
            rhs.priority_delta
                .cmp(&lhs.priority_delta)
                .then(lhs.preloading.cmp(&rhs.preloading))
                .then(has_sibling(lhs).cmp(&has_sibling(rhs)))
        });
        items
    }
}
