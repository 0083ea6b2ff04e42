//! Shared fetch worker pool with visible-priority permits.
//!
//! One pool is shared by every layer of a map. Concurrency is bounded by two
//! permit pools:
//!
//! ```text
//! Total permits: 8
//! ├── Visible pool: 3 (visible fetches only)
//! └── Shared pool:  5 (visible and preloading fetches)
//! ```
//!
//! Visible fetches draw from both pools, so some capacity is always reserved
//! for them; preloading fetches wait on the shared pool and can never starve
//! a visible fetch. Blocking data-source calls run under `spawn_blocking`,
//! keeping the runtime's async workers free.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

/// Default percentage of permits reserved for visible fetches.
pub const DEFAULT_VISIBLE_RESERVE_PERCENT: usize = 40;

/// Minimum permits to reserve for visible fetches (when total allows).
pub const MIN_VISIBLE_RESERVE: usize = 2;

/// A shared, priority-aware fetch worker pool.
///
/// Cheap to clone; clones share the same permits and runtime handle.
#[derive(Debug, Clone)]
pub struct FetchPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    handle: Handle,
    visible_semaphore: Arc<Semaphore>,
    shared_semaphore: Arc<Semaphore>,
    visible_permits: usize,
    shared_permits: usize,
}

impl FetchPool {
    /// Create a pool with the default visible reserve.
    pub fn new(handle: Handle, total_permits: usize) -> Self {
        Self::with_reserve(handle, total_permits, DEFAULT_VISIBLE_RESERVE_PERCENT)
    }

    /// Create a pool reserving `visible_reserve_percent` of `total_permits`
    /// for visible fetches.
    pub fn with_reserve(handle: Handle, total_permits: usize, visible_reserve_percent: usize) -> Self {
        assert!(total_permits > 0, "total_permits must be > 0");
        assert!(
            visible_reserve_percent <= 100,
            "visible_reserve_percent must be <= 100"
        );

        let visible_permits = ((total_permits * visible_reserve_percent) / 100)
            .max(MIN_VISIBLE_RESERVE)
            .min(total_permits.saturating_sub(1));
        let shared_permits = total_permits - visible_permits;

        info!(
            total = total_permits,
            visible = visible_permits,
            shared = shared_permits,
            "Created fetch pool"
        );

        Self {
            inner: Arc::new(PoolInner {
                handle,
                visible_semaphore: Arc::new(Semaphore::new(visible_permits)),
                shared_semaphore: Arc::new(Semaphore::new(shared_permits)),
                visible_permits,
                shared_permits,
            }),
        }
    }

    /// The runtime handle tasks are spawned on.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Total number of permits.
    pub fn total_permits(&self) -> usize {
        self.inner.visible_permits + self.inner.shared_permits
    }

    /// Permits reserved for visible fetches.
    pub fn visible_permits(&self) -> usize {
        self.inner.visible_permits
    }

    /// Permits shared between visible and preloading fetches.
    pub fn shared_permits(&self) -> usize {
        self.inner.shared_permits
    }

    /// Currently available permits in the visible pool.
    pub fn visible_available(&self) -> usize {
        self.inner.visible_semaphore.available_permits()
    }

    /// Currently available permits in the shared pool.
    pub fn shared_available(&self) -> usize {
        self.inner.shared_semaphore.available_permits()
    }

    /// Acquire an execution permit.
    ///
    /// Visible fetches try the reserved pool, then the shared pool, then
    /// wait on the reserved pool. Preloading fetches wait on the shared pool
    /// only.
    pub async fn acquire(&self, preloading: bool) -> FetchPermit {
        if !preloading {
            if let Ok(permit) = self.inner.visible_semaphore.clone().try_acquire_owned() {
                return FetchPermit { _permit: permit };
            }
            if let Ok(permit) = self.inner.shared_semaphore.clone().try_acquire_owned() {
                return FetchPermit { _permit: permit };
            }
            // Wait on the reserved pool so queued preloading fetches cannot
            // overtake; with no reserved permits at all, wait shared.
            let semaphore = if self.inner.visible_permits > 0 {
                &self.inner.visible_semaphore
            } else {
                &self.inner.shared_semaphore
            };
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("fetch semaphore closed");
            FetchPermit { _permit: permit }
        } else {
            let permit = self
                .inner
                .shared_semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("shared semaphore closed");
            FetchPermit { _permit: permit }
        }
    }

    /// Spawn a fetch future on the pool's runtime.
    pub fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.handle.spawn(future)
    }
}

/// RAII permit for one executing fetch; released on drop.
#[derive(Debug)]
pub struct FetchPermit {
    _permit: OwnedSemaphorePermit,
}
