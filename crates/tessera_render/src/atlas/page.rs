//! Atlas pages.

use std::sync::{Arc, Weak};

use super::{AtlasEntry, Skyline};
use crate::geometry::Size;
use crate::pixel::Pixel;

/// One layer of an atlas.
#[derive(Debug)]
pub struct AtlasPage<P: Pixel> {
    skyline: Skyline,
    entries: Vec<Weak<AtlasEntry<P>>>,
}

impl<P: Pixel> AtlasPage<P> {
    pub(crate) fn new(size: u32) -> Self {
        Self {
            skyline: Skyline::new(Size::new(size, size)),
            entries: Vec::new(),
        }
    }

    /// Packs `entry`, returning its corner on success.
    pub(crate) fn insert(&mut self, entry: &Arc<AtlasEntry<P>>) -> Option<(u32, u32)> {
        let size = entry.size();
        let corner = self.skyline.insert(size.width, size.height)?;
        self.entries.push(Arc::downgrade(entry));
        Some(corner)
    }

    /// Entries whose owners still exist.
    pub fn live_entries(&self) -> impl Iterator<Item = Arc<AtlasEntry<P>>> + '_ {
        self.entries.iter().filter_map(Weak::upgrade)
    }

    /// Entries ever placed here, live or dead.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries whose owners are gone.
    #[must_use]
    pub fn dead_count(&self) -> usize {
        self.entries.iter().filter(|e| e.strong_count() == 0).count()
    }

    /// Fraction of the page covered, counting dead entries.
    #[must_use]
    pub fn occupancy(&self) -> f32 {
        self.skyline.occupancy()
    }
}
