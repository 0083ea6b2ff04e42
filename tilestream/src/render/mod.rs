//! Renderer-facing drawables and collaborator traits.
//!
//! The pipeline never issues draw calls itself. It publishes an ordered list
//! of [`TileDrawData`] references to a [`RenderSink`] and asks for redraws;
//! payload decoding is delegated to a [`TileDecoder`], the capability trait
//! each tile kind (raster, vector, ...) implements.

use std::sync::Arc;

use bytes::Bytes;
use glam::DVec2;
use thiserror::Error;

use crate::source::TileData;
use crate::tile::{TileAddress, TileId};

/// A decoded, renderer-ready tile.
///
/// The payload is opaque to the pipeline; only its resident size matters for
/// cache accounting. Dropping the last `Arc<Drawable>` after eviction is the
/// signal that GPU-side resources may be released.
#[derive(Debug, Clone)]
pub struct Drawable {
    data: Bytes,
    size_bytes: usize,
}

impl Drawable {
    /// Create a drawable whose resident size is the payload length.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size_bytes = data.len();
        Self { data, size_bytes }
    }

    /// Override the resident size used for cache accounting (decoded
    /// textures are usually larger than their payload).
    pub fn with_size_bytes(mut self, size_bytes: usize) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Opaque decoded payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Resident size in bytes, used for cache capacity accounting.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Errors produced while decoding tile content into a drawable.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload bytes are present but not decodable.
    #[error("malformed tile payload: {0}")]
    Malformed(String),

    /// The content format is not handled by this decoder.
    #[error("unsupported tile format: {0}")]
    Unsupported(String),
}

/// Capability trait implemented per tile kind.
///
/// One generic pipeline core serves raster and vector layers alike; the
/// differences (how bytes become a drawable, how clicks hit-test) live here.
pub trait TileDecoder: Send + Sync {
    /// Decode content into a drawable for `target`.
    ///
    /// `source` is the address the content was actually loaded for; when it
    /// is an ancestor of `target` the decoder is expected to crop and scale
    /// the corresponding sub-region.
    fn decode(
        &self,
        target: &TileAddress,
        source: &TileAddress,
        data: &TileData,
    ) -> Result<Drawable, DecodeError>;

    /// Hit-test a position (in internal world coordinates) against a
    /// decoded drawable. The default never hits.
    fn click_test(&self, address: &TileAddress, drawable: &Drawable, pos: DVec2) -> bool {
        let _ = (address, drawable, pos);
        false
    }
}

/// One entry of the published draw list.
///
/// `target` is the tile the renderer should fill; `source` is the cached
/// tile whose content is drawn there. They differ when a substitute is in
/// use: an ancestor source renders as a cropped sub-region, a descendant
/// source covers one quarter (or less) of the target.
#[derive(Debug, Clone)]
pub struct TileDrawData {
    target: TileAddress,
    source: TileAddress,
    source_id: TileId,
    drawable: Arc<Drawable>,
    preloading: bool,
}

impl TileDrawData {
    /// Create a draw reference.
    pub fn new(
        target: TileAddress,
        source: TileAddress,
        source_id: TileId,
        drawable: Arc<Drawable>,
        preloading: bool,
    ) -> Self {
        Self {
            target,
            source,
            source_id,
            drawable,
            preloading,
        }
    }

    /// The tile position the renderer should fill.
    pub fn target(&self) -> &TileAddress {
        &self.target
    }

    /// The cached tile whose content is drawn.
    pub fn source(&self) -> &TileAddress {
        &self.source
    }

    /// Cache identity of the source tile.
    pub fn source_id(&self) -> TileId {
        self.source_id
    }

    /// The decoded content.
    pub fn drawable(&self) -> &Arc<Drawable> {
        &self.drawable
    }

    /// Whether this entry came from the preloading set.
    pub fn is_preloading(&self) -> bool {
        self.preloading
    }

    /// Whether the drawn content is the exact wanted tile (no substitute).
    pub fn is_exact(&self) -> bool {
        self.target.canonical() == self.source.canonical()
    }
}

/// Renderer collaborator receiving published draw lists.
///
/// Calls never block on I/O and no return value is awaited beyond the
/// change flag.
pub trait RenderSink: Send + Sync {
    /// Replace the renderer's tile set with the given ordered list.
    ///
    /// Returns `true` when the drawable set actually changed, which is what
    /// gates redraw requests.
    fn refresh_tiles(&self, tiles: &[TileDrawData]) -> bool;

    /// Ask the renderer to schedule a redraw.
    fn request_redraw(&self);
}

/// Aggregate load notifications for the application layer.
///
/// Individual fetch failures are never surfaced as errors; these callbacks
/// fire when a refreshed layer has no visible (respectively preloading)
/// fetches left in flight.
pub trait TileLoadListener: Send + Sync {
    /// All visible tiles of the last refresh have finished loading.
    fn on_visible_tiles_loaded(&self) {}

    /// All preloading tiles of the last refresh have finished loading.
    fn on_preloading_tiles_loaded(&self) {}
}
