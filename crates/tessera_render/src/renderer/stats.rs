//! Renderer statistics.

use crate::atlas::Atlas;
use crate::batch::BatchStats;
use crate::pixel::Pixel;
use crate::reclaim::ReclaimStats;

/// Per-draw-path counters owned by the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DrawCounters {
    pub(crate) sprites: u64,
    pub(crate) direct_draws: u64,
    pub(crate) shape_draws: u64,
    pub(crate) skipped_draws: u64,
    pub(crate) atlas_fallbacks: u64,
}

/// Occupancy of one atlas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtlasStats {
    /// Pages allocated.
    pub pages: usize,
    /// Entries whose images are alive.
    pub live_entries: usize,
    /// Entries waiting for the next repack.
    pub dead_entries: usize,
    /// Page-set generation.
    pub generation: u64,
}

impl AtlasStats {
    pub(crate) fn of<P: Pixel>(atlas: &Atlas<P>) -> Self {
        Self {
            pages: atlas.page_count(),
            live_entries: atlas.live_entries(),
            dead_entries: atlas.dead_entries(),
            generation: atlas.generation(),
        }
    }
}

/// Snapshot returned by [`crate::Renderer::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Sprites queued through the atlas and batch.
    pub sprites: u64,
    /// Images drawn as standalone textured quads.
    pub direct_draws: u64,
    /// Rectangles and lines drawn.
    pub shape_draws: u64,
    /// Draws dropped with a warning (self-draws, palette draws without a palette).
    pub skipped_draws: u64,
    /// Atlas-eligible images that fell back to the direct path.
    pub atlas_fallbacks: u64,
    /// Batch accumulator counters.
    pub batch: BatchStats,
    /// Reclaimer counters.
    pub reclaim: ReclaimStats,
    /// RGBA atlas occupancy.
    pub rgb_atlas: AtlasStats,
    /// Palette-index atlas occupancy.
    pub index_atlas: AtlasStats,
}

impl RenderStats {
    pub(crate) fn new(
        counters: DrawCounters,
        batch: BatchStats,
        reclaim: ReclaimStats,
        rgb_atlas: AtlasStats,
        index_atlas: AtlasStats,
    ) -> Self {
        Self {
            sprites: counters.sprites,
            direct_draws: counters.direct_draws,
            shape_draws: counters.shape_draws,
            skipped_draws: counters.skipped_draws,
            atlas_fallbacks: counters.atlas_fallbacks,
            batch,
            reclaim,
            rgb_atlas,
            index_atlas,
        }
    }
}
