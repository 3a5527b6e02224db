//! Atlas entries.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::geometry::{Rect, Size};
use crate::image::ImageInner;
use crate::pixel::Pixel;

/// Where an entry sits in the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Placement {
    /// Page (array layer) index.
    pub page: u32,
    /// Left edge within the page.
    pub x: u32,
    /// Top edge within the page.
    pub y: u32,
}

/// One image's slot in an atlas.
///
/// Owned by the image's GPU slot; pages only hold weak references, so an
/// entry dies with its image. Its region is reclaimed at the next repack.
#[derive(Debug)]
pub struct AtlasEntry<P: Pixel> {
    source: Weak<ImageInner<P>>,
    size: Size,
    placement: Mutex<Option<Placement>>,
    /// Atlas generation and image version of the last upload.
    uploaded: Mutex<Option<(u64, u64)>>,
}

impl<P: Pixel> AtlasEntry<P> {
    pub(crate) fn new(source: &Arc<ImageInner<P>>, size: Size) -> Self {
        Self {
            source: Arc::downgrade(source),
            size,
            placement: Mutex::new(None),
            uploaded: Mutex::new(None),
        }
    }

    /// Sprite dimensions.
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Current placement; `None` while unpacked.
    #[must_use]
    pub fn placement(&self) -> Option<Placement> {
        *self.placement.lock()
    }

    /// Region within the entry's page.
    #[must_use]
    pub fn rect(&self) -> Option<Rect> {
        self.placement()
            .map(|p| Rect::new(p.x, p.y, self.size.width, self.size.height))
    }

    /// True while the source image exists.
    #[must_use]
    pub fn is_source_alive(&self) -> bool {
        self.source.strong_count() > 0
    }

    pub(crate) fn source(&self) -> Option<Arc<ImageInner<P>>> {
        self.source.upgrade()
    }

    pub(crate) fn set_placement(&self, placement: Option<Placement>) {
        *self.placement.lock() = placement;
        *self.uploaded.lock() = None;
    }

    pub(crate) fn is_uploaded(&self, generation: u64, version: u64) -> bool {
        *self.uploaded.lock() == Some((generation, version))
    }

    /// True if the page holds an older copy of the image in this generation.
    pub(crate) fn is_outdated(&self, generation: u64, version: u64) -> bool {
        matches!(*self.uploaded.lock(), Some((g, v)) if g == generation && v != version)
    }

    pub(crate) fn mark_uploaded(&self, generation: u64, version: u64) {
        *self.uploaded.lock() = Some((generation, version));
    }
}
