//! Tile layer configuration.

use crate::substitute::SubstitutionPolicy;
use crate::tile::FrameMode;

/// Default capacity of the preloading cache tier.
///
/// Enough for a screenful of decoded tiles around the view; raise it when
/// preloading is enabled on dense raster layers.
pub const DEFAULT_PRELOADING_CACHE_CAPACITY: usize = 10 * 1024 * 1024;

/// Default capacity of the visible cache tier. Sized generously - during
/// normal use this limit is never the binding constraint.
pub const DEFAULT_VISIBLE_CACHE_CAPACITY: usize = 128 * 1024 * 1024;

/// Default bound for the ancestor substitution search.
pub const DEFAULT_MAX_OVERZOOM_LEVEL: u8 = 6;

/// Default bound for the descendant substitution search.
pub const DEFAULT_MAX_UNDERZOOM_LEVEL: u8 = 3;

/// Configuration surface of one tile layer.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    /// Whether the preloading list and tier are populated and fetched.
    pub preloading: bool,
    /// How missing tiles borrow cached content.
    pub substitution_policy: SubstitutionPolicy,
    /// Fractional zoom offset; positive values select more detailed tiles.
    pub zoom_level_bias: f32,
    /// Ancestor search depth for substitution.
    pub max_overzoom_level: u8,
    /// Descendant search depth for substitution.
    pub max_underzoom_level: u8,
    /// Byte capacity of the visible tier.
    pub visible_cache_capacity: usize,
    /// Byte capacity of the preloading tier.
    pub preloading_cache_capacity: usize,
    /// Suppress redraws while visible fetches are outstanding, so all tiles
    /// of a refresh appear together. Useful for animated tiles.
    pub synchronized_refresh: bool,
    /// How frame numbers participate in cache identity.
    pub frame_mode: FrameMode,
    /// Traverse shifted world copies for horizontal wraparound.
    pub seamless_panning: bool,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            preloading: false,
            substitution_policy: SubstitutionPolicy::All,
            zoom_level_bias: 0.0,
            max_overzoom_level: DEFAULT_MAX_OVERZOOM_LEVEL,
            max_underzoom_level: DEFAULT_MAX_UNDERZOOM_LEVEL,
            visible_cache_capacity: DEFAULT_VISIBLE_CACHE_CAPACITY,
            preloading_cache_capacity: DEFAULT_PRELOADING_CACHE_CAPACITY,
            synchronized_refresh: false,
            frame_mode: FrameMode::PerFrame,
            seamless_panning: true,
        }
    }
}

impl LayerConfig {
    /// Enable or disable preloading.
    pub fn with_preloading(mut self, preloading: bool) -> Self {
        self.preloading = preloading;
        self
    }

    /// Set the substitution policy.
    pub fn with_substitution_policy(mut self, policy: SubstitutionPolicy) -> Self {
        self.substitution_policy = policy;
        self
    }

    /// Set the zoom level bias.
    pub fn with_zoom_level_bias(mut self, bias: f32) -> Self {
        self.zoom_level_bias = bias;
        self
    }

    /// Set the ancestor substitution search depth.
    pub fn with_max_overzoom_level(mut self, level: u8) -> Self {
        self.max_overzoom_level = level;
        self
    }

    /// Set the descendant substitution search depth.
    pub fn with_max_underzoom_level(mut self, level: u8) -> Self {
        self.max_underzoom_level = level;
        self
    }

    /// Set the visible tier capacity in bytes.
    pub fn with_visible_cache_capacity(mut self, capacity: usize) -> Self {
        self.visible_cache_capacity = capacity;
        self
    }

    /// Set the preloading tier capacity in bytes.
    pub fn with_preloading_cache_capacity(mut self, capacity: usize) -> Self {
        self.preloading_cache_capacity = capacity;
        self
    }

    /// Enable or disable synchronized refresh.
    pub fn with_synchronized_refresh(mut self, synchronized: bool) -> Self {
        self.synchronized_refresh = synchronized;
        self
    }

    /// Set the frame addressing mode.
    pub fn with_frame_mode(mut self, mode: FrameMode) -> Self {
        self.frame_mode = mode;
        self
    }

    /// Enable or disable seamless panning traversal.
    pub fn with_seamless_panning(mut self, seamless: bool) -> Self {
        self.seamless_panning = seamless;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LayerConfig::default();
        assert!(!config.preloading);
        assert_eq!(config.substitution_policy, SubstitutionPolicy::All);
        assert_eq!(config.zoom_level_bias, 0.0);
        assert_eq!(config.max_overzoom_level, 6);
        assert_eq!(config.max_underzoom_level, 3);
        assert_eq!(config.preloading_cache_capacity, 10 * 1024 * 1024);
        assert!(!config.synchronized_refresh);
        assert_eq!(config.frame_mode, FrameMode::PerFrame);
        assert!(config.seamless_panning);
    }

    #[test]
    fn test_builder_chain() {
        let config = LayerConfig::default()
            .with_preloading(true)
            .with_substitution_policy(SubstitutionPolicy::VisibleOnly)
            .with_zoom_level_bias(0.5)
            .with_max_overzoom_level(4)
            .with_max_underzoom_level(2)
            .with_preloading_cache_capacity(1024)
            .with_synchronized_refresh(true)
            .with_frame_mode(FrameMode::Shared)
            .with_seamless_panning(false);

        assert!(config.preloading);
        assert_eq!(config.substitution_policy, SubstitutionPolicy::VisibleOnly);
        assert_eq!(config.zoom_level_bias, 0.5);
        assert_eq!(config.max_overzoom_level, 4);
        assert_eq!(config.max_underzoom_level, 2);
        assert_eq!(config.preloading_cache_capacity, 1024);
        assert!(config.synchronized_refresh);
        assert_eq!(config.frame_mode, FrameMode::Shared);
        assert!(!config.seamless_panning);
    }
}
