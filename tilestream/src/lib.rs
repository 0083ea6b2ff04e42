//! Tilestream - tile delivery core for map rendering.
//!
//! This library sits between "the camera moved" and "a drawable tile is
//! ready": it decides which quadtree tiles a view needs, serves cached tiles
//! immediately (substituting a coarser or finer tile while the exact one
//! loads), schedules prioritized cancelable fetches on a shared worker pool,
//! and maintains two cooperating LRU cache tiers per layer.
//!
//! # High-Level API
//!
//! The [`layer`] module provides the coordinating type; the application
//! supplies the collaborators:
//!
//! ```ignore
//! use tilestream::fetch::FetchPool;
//! use tilestream::layer::{LayerConfig, TileLayer};
//!
//! let pool = FetchPool::new(runtime.handle().clone(), 8);
//! let layer = TileLayer::with_config(source, decoder, sink, pool,
//!     LayerConfig::default().with_preloading(true));
//!
//! // On every camera change or tile-load completion:
//! layer.load_data(&view_state);
//! ```
//!
//! Rendering, payload decoding and network/disk access are external
//! collaborators behind the [`render::RenderSink`], [`render::TileDecoder`]
//! and [`source::TileSource`] traits. Nothing in this crate blocks the
//! caller: data-source calls run on fetch worker threads only.

pub mod cache;
pub mod coord;
pub mod fetch;
pub mod layer;
pub mod planner;
pub mod render;
pub mod source;
pub mod substitute;
pub mod tile;

/// Version of the tilestream library.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
