//! Tile layer frame coordination.
//!
//! [`TileLayer`] ties the pipeline together. Every camera change or content
//! event drives one `load_data` pass on the frame thread:
//!
//! 1. **Plan** - compute (or reuse) the visible and preloading tile lists.
//! 2. **Substitute** - attach the best cached content to each wanted tile.
//! 3. **Schedule** - submit prioritized fetches for anything missing or
//!    stale, cancel fetches no longer wanted.
//! 4. **Reconcile & publish** - demote no-longer-visible cache entries to
//!    the preloading tier, promote newly visible ones, hand the ordered
//!    draw list to the renderer.
//!
//! Fetch tasks complete on pool workers at arbitrary times and write into
//! the caches under the layer's exclusive region; the renderer is only ever
//! handed immutable draw references and never blocks on I/O.

mod config;

pub use config::{
    LayerConfig, DEFAULT_MAX_OVERZOOM_LEVEL, DEFAULT_MAX_UNDERZOOM_LEVEL,
    DEFAULT_PRELOADING_CACHE_CAPACITY, DEFAULT_VISIBLE_CACHE_CAPACITY,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::cache::{CacheStats, TileCaches};
use crate::coord::ViewState;
use crate::fetch::{
    FetchBatch, FetchPool, FetchRequest, FetchStats, FetchStatsSnapshot, FetchTask, FetchTracker,
    PARENT_PRIORITY_OFFSET,
};
use crate::planner::{self, PlanParams, VisiblePlan};
use crate::render::{RenderSink, TileDecoder, TileDrawData, TileLoadListener};
use crate::source::TileSource;
use crate::substitute::{Resolution, SubstitutionPolicy, Substitutor};
use crate::tile::{FrameMode, TileAddress, TileId};

/// Pipeline phase of a layer, re-entered on every camera or content event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerPhase {
    /// No pass has run yet.
    #[default]
    Idle,
    /// Computing visible tile lists.
    Planning,
    /// Scheduling fetches for missing content.
    Fetching,
    /// Draw list handed to the renderer.
    Published,
}

/// State guarded by the layer's single exclusive region.
#[derive(Debug)]
struct LayerState {
    caches: TileCaches,
    frame_nr: i32,
    last_frame_nr: i32,
    plan: VisiblePlan,
    /// Frame number the stored plan was computed for.
    plan_frame_nr: Option<i32>,
    last_view: Option<ViewState>,
    phase: LayerPhase,
    /// Set by a planning pass, consumed by load-listener notification.
    refreshed: bool,
}

struct LayerInner {
    source: Arc<dyn TileSource>,
    decoder: Arc<dyn TileDecoder>,
    sink: Arc<dyn RenderSink>,
    pool: FetchPool,
    config: Mutex<LayerConfig>,
    state: Mutex<LayerState>,
    fetching: FetchTracker,
    stats: FetchStats,
    load_listener: Mutex<Option<Arc<dyn TileLoadListener>>>,
}

/// One tile layer: planning, caching and fetching for a single data source.
///
/// Cheap to clone; clones share the same layer.
#[derive(Clone)]
pub struct TileLayer {
    inner: Arc<LayerInner>,
}

impl TileLayer {
    /// Create a layer with default configuration.
    pub fn new(
        source: Arc<dyn TileSource>,
        decoder: Arc<dyn TileDecoder>,
        sink: Arc<dyn RenderSink>,
        pool: FetchPool,
    ) -> Self {
        Self::with_config(source, decoder, sink, pool, LayerConfig::default())
    }

    /// Create a layer with the given configuration.
    pub fn with_config(
        source: Arc<dyn TileSource>,
        decoder: Arc<dyn TileDecoder>,
        sink: Arc<dyn RenderSink>,
        pool: FetchPool,
        config: LayerConfig,
    ) -> Self {
        let caches = TileCaches::new(
            config.visible_cache_capacity,
            config.preloading_cache_capacity,
        );
        Self {
            inner: Arc::new(LayerInner {
                source,
                decoder,
                sink,
                pool,
                config: Mutex::new(config),
                state: Mutex::new(LayerState {
                    caches,
                    frame_nr: 0,
                    last_frame_nr: -1,
                    plan: VisiblePlan::default(),
                    plan_frame_nr: None,
                    last_view: None,
                    phase: LayerPhase::Idle,
                    refreshed: false,
                }),
                fetching: FetchTracker::new(),
                stats: FetchStats::default(),
                load_listener: Mutex::new(None),
            }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Configuration surface
    // ─────────────────────────────────────────────────────────────────────

    /// The current frame number.
    pub fn frame_nr(&self) -> i32 {
        self.inner.state.lock().unwrap().frame_nr
    }

    /// Set the frame number, only used for animated tiles. Loading a new
    /// frame may take some time; the previous frame is shown while it loads.
    pub fn set_frame_nr(&self, frame_nr: i32) {
        let mut state = self.inner.state.lock().unwrap();
        state.last_frame_nr = state.frame_nr;
        state.frame_nr = frame_nr;
    }

    /// Whether preloading is enabled.
    pub fn is_preloading(&self) -> bool {
        self.inner.config.lock().unwrap().preloading
    }

    /// Enable or disable preloading of tiles adjacent to the view.
    pub fn set_preloading(&self, preloading: bool) {
        self.inner.config.lock().unwrap().preloading = preloading;
    }

    /// The current substitution policy.
    pub fn substitution_policy(&self) -> SubstitutionPolicy {
        self.inner.config.lock().unwrap().substitution_policy
    }

    /// Set the substitution policy.
    pub fn set_substitution_policy(&self, policy: SubstitutionPolicy) {
        self.inner.config.lock().unwrap().substitution_policy = policy;
    }

    /// The current zoom level bias.
    pub fn zoom_level_bias(&self) -> f32 {
        self.inner.config.lock().unwrap().zoom_level_bias
    }

    /// Set the zoom level bias. Higher bias selects more detailed tiles for
    /// the same view.
    pub fn set_zoom_level_bias(&self, bias: f32) {
        self.inner.config.lock().unwrap().zoom_level_bias = bias;
    }

    /// The ancestor substitution search depth.
    pub fn max_overzoom_level(&self) -> u8 {
        self.inner.config.lock().unwrap().max_overzoom_level
    }

    /// Set the ancestor substitution search depth.
    pub fn set_max_overzoom_level(&self, level: u8) {
        self.inner.config.lock().unwrap().max_overzoom_level = level;
    }

    /// The descendant substitution search depth.
    pub fn max_underzoom_level(&self) -> u8 {
        self.inner.config.lock().unwrap().max_underzoom_level
    }

    /// Set the descendant substitution search depth.
    pub fn set_max_underzoom_level(&self, level: u8) {
        self.inner.config.lock().unwrap().max_underzoom_level = level;
    }

    /// Whether synchronized refresh is enabled.
    pub fn is_synchronized_refresh(&self) -> bool {
        self.inner.config.lock().unwrap().synchronized_refresh
    }

    /// Enable or disable synchronized refresh. When enabled the layer waits
    /// for all visible tiles to finish loading and shows them together.
    pub fn set_synchronized_refresh(&self, synchronized: bool) {
        self.inner.config.lock().unwrap().synchronized_refresh = synchronized;
    }

    /// The preloading tier capacity in bytes.
    pub fn preloading_cache_capacity(&self) -> usize {
        self.inner.config.lock().unwrap().preloading_cache_capacity
    }

    /// Resize the preloading tier, evicting as needed.
    pub fn set_preloading_cache_capacity(&self, capacity: usize) {
        self.inner.config.lock().unwrap().preloading_cache_capacity = capacity;
        let mut state = self.inner.state.lock().unwrap();
        state.caches.preloading.resize(capacity);
    }

    /// Set or clear the aggregate load listener.
    pub fn set_tile_load_listener(&self, listener: Option<Arc<dyn TileLoadListener>>) {
        *self.inner.load_listener.lock().unwrap() = listener;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Introspection
    // ─────────────────────────────────────────────────────────────────────

    /// Whether any fetch is pending or running.
    pub fn is_update_in_progress(&self) -> bool {
        !self.inner.fetching.is_empty()
    }

    /// The phase of the most recent pipeline pass.
    pub fn phase(&self) -> LayerPhase {
        self.inner.state.lock().unwrap().phase
    }

    /// Identities of the tiles planned visible by the last pass.
    pub fn visible_tile_ids(&self) -> Vec<TileId> {
        let mode = self.inner.config.lock().unwrap().frame_mode;
        let state = self.inner.state.lock().unwrap();
        state
            .plan
            .visible
            .iter()
            .map(|tile| TileId::of(tile, mode))
            .collect()
    }

    /// Identities currently resident in one cache tier.
    pub fn cached_tile_ids(&self, preloading: bool) -> Vec<TileId> {
        let state = self.inner.state.lock().unwrap();
        state.caches.tier(preloading).keys()
    }

    /// Snapshot of the fetch pipeline counters.
    pub fn fetch_stats(&self) -> FetchStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Snapshots of the visible and preloading tier counters.
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        let state = self.inner.state.lock().unwrap();
        (state.caches.visible.stats(), state.caches.preloading.stats())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Content events
    // ─────────────────────────────────────────────────────────────────────

    /// Clear layer tile caches.
    ///
    /// With `all` set both tiers are released, otherwise only the
    /// preloading tier.
    pub fn clear_tile_caches(&self, all: bool) {
        let mut state = self.inner.state.lock().unwrap();
        state.caches.preloading.clear();
        if all {
            state.caches.visible.clear();
        }
    }

    /// The data source's content changed.
    ///
    /// Every in-flight fetch result becomes stale. With `remove_tiles` the
    /// caches are flushed outright; otherwise entries are invalidated in
    /// place so they keep serving as substitutes while re-fetches load.
    pub fn tiles_changed(&self, remove_tiles: bool) {
        self.inner.fetching.invalidate_all();
        {
            let mut state = self.inner.state.lock().unwrap();
            if remove_tiles {
                state.caches.clear();
            } else {
                state.caches.invalidate_all(Instant::now());
            }
        }
        self.inner.sink.request_redraw();
    }

    // ─────────────────────────────────────────────────────────────────────
    // The frame pass
    // ─────────────────────────────────────────────────────────────────────

    /// Run one planning/substitution/scheduling/publish pass for a view.
    ///
    /// Non-blocking: data-source work happens on pool workers, the renderer
    /// receives the draw list before any of it completes.
    pub fn load_data(&self, view: &ViewState) {
        let config = self.inner.config.lock().unwrap().clone();
        let now = Instant::now();
        let mut draw_datas: Vec<TileDrawData> = Vec::new();
        let mut batch = FetchBatch::new();
        let suppressed;

        {
            let mut state = self.inner.state.lock().unwrap();
            state.phase = LayerPhase::Planning;

            // If the view and frame are unchanged, reuse the previous lists.
            let reuse = state.plan_frame_nr == Some(state.frame_nr)
                && state
                    .last_view
                    .as_ref()
                    .is_some_and(|last| last.same_projection(view));
            if !reuse {
                let params = PlanParams {
                    min_zoom: self.inner.source.min_zoom(),
                    max_zoom: self.inner.source.max_zoom(),
                    zoom_level_bias: config.zoom_level_bias,
                    frame_nr: state.frame_nr,
                    seamless_panning: config.seamless_panning,
                };
                let mut plan = planner::plan(view, &self.inner.source.data_extent(), &params);

                let caches = &state.caches;
                let mode = config.frame_mode;
                let depth = config.max_overzoom_level;
                planner::sort_tiles(
                    &mut plan.visible,
                    view,
                    |tile| has_cached_ancestor(caches, tile, mode, depth),
                    |tile| has_cached_child(caches, tile, mode),
                );
                planner::sort_tiles(
                    &mut plan.preloading,
                    view,
                    |tile| has_cached_ancestor(caches, tile, mode, depth),
                    |tile| has_cached_child(caches, tile, mode),
                );

                state.plan = plan;
                state.plan_frame_nr = Some(state.frame_nr);
            }
            state.last_view = Some(view.clone());

            // Attach cached content (or the best substitute) to every
            // wanted tile; anything not validly cached becomes a fetch.
            {
                let substitutor = Substitutor::new(
                    &state.caches,
                    config.substitution_policy,
                    config.frame_mode,
                    state.last_frame_nr,
                    config.max_overzoom_level,
                    config.max_underzoom_level,
                );
                Self::resolve_tiles(
                    &substitutor,
                    &state.plan.visible,
                    false,
                    config.frame_mode,
                    now,
                    &mut draw_datas,
                    &mut batch,
                );
                if config.preloading {
                    Self::resolve_tiles(
                        &substitutor,
                        &state.plan.preloading,
                        true,
                        config.frame_mode,
                        now,
                        &mut draw_datas,
                        &mut batch,
                    );
                }
            }

            // Pre-fetch the parents of wanted tiles: one coalesced, boosted
            // request refines several children at once.
            if config.preloading {
                for tile in state.plan.visible.iter().chain(state.plan.preloading.iter()) {
                    let canonical = tile.canonical();
                    if canonical.zoom > 0 {
                        let parent = canonical.parent();
                        batch.push(FetchRequest {
                            id: TileId::of(&parent, config.frame_mode),
                            address: parent,
                            preloading: true,
                            priority_delta: PARENT_PRIORITY_OFFSET,
                        });
                    }
                }
            }

            state.phase = LayerPhase::Fetching;
            self.schedule(&mut state, batch, now);

            Self::reconcile_tiers(&mut state, &draw_datas);

            state.phase = LayerPhase::Published;
            state.refreshed = true;
            suppressed = config.synchronized_refresh && self.inner.fetching.visible_count() > 0;
        }

        if !suppressed && self.inner.sink.refresh_tiles(&draw_datas) {
            self.inner.sink.request_redraw();
        }
        self.inner.update_load_listener();
    }

    fn resolve_tiles(
        substitutor: &Substitutor<'_>,
        tiles: &[TileAddress],
        preloading: bool,
        mode: FrameMode,
        now: Instant,
        draw_datas: &mut Vec<TileDrawData>,
        batch: &mut FetchBatch,
    ) {
        for tile in tiles {
            let resolution = substitutor.resolve(tile, preloading, now, draw_datas);
            if let Resolution::Hit { valid: true } = resolution {
                continue;
            }
            // Missing, substituted or stale: the exact tile is (re-)fetched.
            let canonical = tile.canonical();
            batch.push(FetchRequest {
                id: TileId::of(&canonical, mode),
                address: canonical,
                preloading,
                priority_delta: 0,
            });
        }
    }

    /// Turn the batch into tracked tasks, in submission order.
    fn schedule(&self, state: &mut LayerState, batch: FetchBatch, now: Instant) {
        let mut wanted: HashSet<(TileId, bool)> = HashSet::new();

        for request in batch.into_sorted() {
            // Prefetch hit: the exact content is already cached and valid.
            // Touch it so it stays resident; promotion to the visible tier
            // happens during reconciliation.
            let tier = state.caches.tier_mut(request.preloading);
            if tier.exists(request.id) && tier.valid(request.id, now) {
                tier.get(request.id);
                self.inner.stats.record_prefetch_hit();
                continue;
            }

            wanted.insert((request.id, request.preloading));
            if self.inner.fetching.contains_active(request.id, request.preloading) {
                continue;
            }

            let task = Arc::new(FetchTask::new(
                request.id,
                request.address,
                request.preloading,
                request.priority_delta,
                self.inner.source.min_zoom(),
                self.inner.source.max_zoom(),
            ));
            if self.inner.fetching.insert(Arc::clone(&task)) {
                self.inner.stats.record_submitted();
                trace!(
                    tile = %request.address,
                    preloading = request.preloading,
                    priority_delta = request.priority_delta,
                    "Submitting tile fetch"
                );
                self.spawn_fetch(task);
            }
        }

        let canceled = self.inner.fetching.cancel_unrequested(&wanted);
        if canceled > 0 {
            debug!(canceled, "Canceled fetches no longer wanted");
        }
    }

    /// Move cache entries between tiers to match the new draw set: entries
    /// drawn as visible are promoted out of the preloading tier, visible
    /// entries not drawn this frame are demoted (not evicted).
    fn reconcile_tiers(state: &mut LayerState, draw_datas: &[TileDrawData]) {
        let mut unused_visible: HashSet<TileId> = state.caches.visible.keys().into_iter().collect();

        let TileCaches {
            visible,
            preloading,
        } = &mut state.caches;

        for draw in draw_datas {
            if !draw.is_preloading() {
                let id = draw.source_id();
                unused_visible.remove(&id);
                if !visible.exists(id) && preloading.exists(id) {
                    preloading.move_to(id, visible);
                }
            }
        }
        for id in unused_visible {
            visible.move_to(id, preloading);
        }
    }

    fn spawn_fetch(&self, task: Arc<FetchTask>) {
        let inner = Arc::clone(&self.inner);
        self.inner.pool.spawn(async move {
            let token = task.cancellation_token();
            let permit = tokio::select! {
                biased;

                _ = token.cancelled() => {
                    // Canceled before starting: removed, no side effects.
                    inner.fetching.remove_task(&task);
                    inner.stats.record_canceled();
                    return;
                }
                permit = inner.pool.acquire(task.is_preloading()) => permit,
            };
            task.mark_started();

            let refresh = {
                let inner = Arc::clone(&inner);
                let task = Arc::clone(&task);
                tokio::task::spawn_blocking(move || inner.run_fetch(&task))
                    .await
                    .unwrap_or(false)
            };
            drop(permit);

            inner.fetching.remove_task(&task);
            if task.is_canceled() {
                inner.stats.record_canceled();
            } else {
                inner.stats.record_completed();
            }

            if refresh {
                // Cache membership may have shifted even when this task's
                // own write was discarded.
                inner.sink.request_redraw();
            }
            inner.update_load_listener();
        });
    }
}

impl LayerInner {
    /// Execute one fetch on a worker thread. Returns whether content was
    /// produced (and a redraw is therefore due).
    fn run_fetch(&self, task: &FetchTask) -> bool {
        for source_address in task.chain() {
            if task.is_canceled() {
                trace!(tile = %task.address(), "Fetch canceled before source call");
                return false;
            }

            let Some(data) = self.source.load_tile(source_address) else {
                // No content at this level; try the next coarser ancestor.
                // A chain that never produces content completes without a
                // cache write and the next planning pass re-requests it.
                continue;
            };
            if data.is_replace_with_parent() {
                continue;
            }
            if data.is_over_zoom() {
                // No independent data below this level: drop any stale
                // exact entry so overlapping draws cannot linger.
                let mut state = self.state.lock().unwrap();
                state.caches.remove(task.tile_id());
            }

            match self.decoder.decode(task.address(), source_address, &data) {
                Ok(drawable) => {
                    if !task.is_invalidated() && !task.is_canceled() {
                        let deadline = data.max_age().map(|age| Instant::now() + age);
                        let drawable = Arc::new(drawable);
                        let size = drawable.size_bytes();
                        let mut state = self.state.lock().unwrap();
                        state
                            .caches
                            .put(task.tile_id(), drawable, size, task.is_preloading());
                        if let Some(deadline) = deadline {
                            state
                                .caches
                                .tier_mut(task.is_preloading())
                                .set_deadline(task.tile_id(), deadline);
                        }
                    }
                    return true;
                }
                Err(err) => {
                    error!(tile = %task.address(), error = %err, "Failed to decode tile");
                    self.stats.record_decode_failure();
                    return false;
                }
            }
        }
        self.stats.record_empty();
        false
    }

    /// Fire aggregate load notifications once per refresh, when the
    /// corresponding in-flight counts drain.
    fn update_load_listener(&self) {
        let Some(listener) = self.load_listener.lock().unwrap().clone() else {
            return;
        };
        let preloading_enabled = self.config.lock().unwrap().preloading;

        let (visible_done, preloading_done) = {
            let mut state = self.state.lock().unwrap();
            if !state.refreshed {
                return;
            }
            let visible_done = self.fetching.visible_count() == 0;
            let preloading_done =
                preloading_enabled && self.fetching.preloading_count() == 0;
            if !visible_done && !preloading_done {
                return;
            }
            state.refreshed = false;
            (visible_done, preloading_done)
        };

        if visible_done {
            listener.on_visible_tiles_loaded();
        }
        if preloading_done {
            listener.on_preloading_tiles_loaded();
        }
    }
}

fn has_cached_ancestor(
    caches: &TileCaches,
    tile: &TileAddress,
    mode: FrameMode,
    max_depth: u8,
) -> bool {
    let mut walk = tile.canonical();
    for _ in 0..max_depth {
        if walk.zoom == 0 {
            return false;
        }
        walk = walk.parent();
        if caches.exists(TileId::of(&walk, mode)) {
            return true;
        }
    }
    false
}

fn has_cached_child(caches: &TileCaches, tile: &TileAddress, mode: FrameMode) -> bool {
    tile.canonical()
        .children()
        .iter()
        .any(|child| caches.exists(TileId::of(child, mode)))
}
