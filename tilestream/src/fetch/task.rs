//! Cancelable tile fetch tasks.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::tile::{TileAddress, TileId};

/// One asynchronous tile fetch.
///
/// The task carries the ancestor chain it will walk on a worker thread:
/// the exact address first, then each ancestor whose zoom the data source
/// declares in range, so the fetch can step up to coarser source data when
/// the exact zoom is unavailable.
///
/// Lifecycle: pending until a pool permit is acquired, then running until
/// completed or canceled. Cancellation is cooperative - a pending task is
/// removed without side effects, a running task finishes its current source
/// call, then aborts without writing to the cache.
#[derive(Debug)]
pub struct FetchTask {
    tile_id: TileId,
    address: TileAddress,
    preloading: bool,
    priority_delta: i32,
    chain: Vec<TileAddress>,
    cancel: CancellationToken,
    invalidated: AtomicBool,
    started: AtomicBool,
}

impl FetchTask {
    /// Create a task for the given canonical address.
    ///
    /// `min_zoom..=max_zoom` is the data source's declared range; the chain
    /// holds the address and its ancestors inside that range, ordered from
    /// the exact address upward.
    pub fn new(
        tile_id: TileId,
        address: TileAddress,
        preloading: bool,
        priority_delta: i32,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Self {
        let mut chain = Vec::new();
        let mut walk = address;
        loop {
            if walk.zoom >= min_zoom && walk.zoom <= max_zoom {
                chain.push(walk);
            }
            if walk.zoom == 0 {
                break;
            }
            walk = walk.parent();
        }

        Self {
            tile_id,
            address,
            preloading,
            priority_delta,
            chain,
            cancel: CancellationToken::new(),
            invalidated: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    /// Cache identity of the fetched tile.
    pub fn tile_id(&self) -> TileId {
        self.tile_id
    }

    /// The exact address this task fetches.
    pub fn address(&self) -> &TileAddress {
        &self.address
    }

    /// Whether this fetch fills the preloading tier.
    pub fn is_preloading(&self) -> bool {
        self.preloading
    }

    /// Priority delta assigned at batch build time.
    pub fn priority_delta(&self) -> i32 {
        self.priority_delta
    }

    /// The data-source addresses to try, exact address first.
    pub fn chain(&self) -> &[TileAddress] {
        &self.chain
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token resolved when the task is canceled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the result of this task as stale; a later write is discarded.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    /// Whether the task result has been invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Mark the task as running. Returns `false` if it already was.
    pub fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    /// Whether execution has begun.
    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::FrameMode;

    fn task_for(address: TileAddress, min_zoom: u8, max_zoom: u8) -> FetchTask {
        let id = TileId::of(&address, FrameMode::PerFrame);
        FetchTask::new(id, address, false, 0, min_zoom, max_zoom)
    }

    #[test]
    fn test_chain_walks_to_source_min_zoom() {
        let task = task_for(TileAddress::new(5, 3, 4, 0), 0, 18);
        let zooms: Vec<u8> = task.chain().iter().map(|t| t.zoom).collect();
        assert_eq!(zooms, vec![4, 3, 2, 1, 0]);
        assert_eq!(task.chain()[0], TileAddress::new(5, 3, 4, 0));
        assert_eq!(task.chain()[4], TileAddress::root(0));
    }

    #[test]
    fn test_chain_respects_source_zoom_range() {
        let task = task_for(TileAddress::new(5, 3, 4, 0), 2, 3);
        let zooms: Vec<u8> = task.chain().iter().map(|t| t.zoom).collect();
        // The exact zoom 4 is above the source's max zoom: only the
        // in-range ancestors are in the chain.
        assert_eq!(zooms, vec![3, 2]);
    }

    #[test]
    fn test_chain_empty_when_source_covers_nothing() {
        let task = task_for(TileAddress::new(0, 0, 2, 0), 5, 8);
        assert!(task.chain().is_empty());
    }

    #[test]
    fn test_cancellation_flags() {
        let task = task_for(TileAddress::root(0), 0, 18);
        assert!(!task.is_canceled());
        task.cancel();
        assert!(task.is_canceled());
        assert!(task.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_invalidation_is_independent_of_cancellation() {
        let task = task_for(TileAddress::root(0), 0, 18);
        task.invalidate();
        assert!(task.is_invalidated());
        assert!(!task.is_canceled());
    }

    #[test]
    fn test_mark_started_is_once() {
        let task = task_for(TileAddress::root(0), 0, 18);
        assert!(!task.has_started());
        assert!(task.mark_started());
        assert!(!task.mark_started());
        assert!(task.has_started());
    }
}
