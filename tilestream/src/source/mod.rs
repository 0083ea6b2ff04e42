//! Tile data source collaborator.
//!
//! A [`TileSource`] is the only place this crate touches network or disk.
//! `load_tile` may block; the fetch pool always calls it from a worker
//! thread, never from the frame or render thread.

use std::time::Duration;

use bytes::Bytes;

use crate::coord::MapBounds;
use crate::tile::TileAddress;

/// Content returned by a data source for one tile, plus metadata steering
/// caching and substitution.
///
/// Immutable once constructed.
#[derive(Debug, Clone)]
pub struct TileData {
    data: Bytes,
    max_age: Option<Duration>,
    replace_with_parent: bool,
    over_zoom: bool,
}

impl TileData {
    /// Create tile content from a raw payload with default metadata
    /// (cache forever, no substitution hints).
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            max_age: None,
            replace_with_parent: false,
            over_zoom: false,
        }
    }

    /// Set the server-asserted freshness duration.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Set the freshness duration from a server `max-age` value in
    /// milliseconds. Negative values mean "cache forever".
    pub fn with_max_age_millis(mut self, millis: i64) -> Self {
        self.max_age = u64::try_from(millis).ok().map(Duration::from_millis);
        self
    }

    /// Mark this content as "use the ancestor instead" (sparse data).
    pub fn with_replace_with_parent(mut self, replace: bool) -> Self {
        self.replace_with_parent = replace;
        self
    }

    /// Mark this zoom level as having no independent data below it.
    pub fn with_over_zoom(mut self, over_zoom: bool) -> Self {
        self.over_zoom = over_zoom;
        self
    }

    /// Raw payload bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Server-asserted freshness; `None` means cache forever.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Whether the source asks for the ancestor to be used instead.
    pub fn is_replace_with_parent(&self) -> bool {
        self.replace_with_parent
    }

    /// Whether this zoom level has no independent data below it.
    pub fn is_over_zoom(&self) -> bool {
        self.over_zoom
    }
}

/// A source of tile content.
///
/// Implementations wrap HTTP servers, tile archives, in-memory fixtures or
/// anything else that maps tile addresses to payloads.
pub trait TileSource: Send + Sync {
    /// Name of the source for logging and identification.
    fn name(&self) -> &str;

    /// Minimum zoom level this source has data for.
    fn min_zoom(&self) -> u8;

    /// Maximum zoom level this source has data for.
    fn max_zoom(&self) -> u8;

    /// Bounds beyond which no content exists, in flipped internal
    /// coordinates. Defaults to the whole world.
    fn data_extent(&self) -> MapBounds {
        MapBounds::world()
    }

    /// Load the content of one tile.
    ///
    /// May block on network or disk; called only from fetch worker threads.
    /// Returns `None` when the tile has no content or the load failed
    /// transiently - the next planning pass will re-request it.
    fn load_tile(&self, address: &TileAddress) -> Option<TileData>;
}
