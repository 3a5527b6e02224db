//! # Atlas Allocator
//!
//! Packs small images into fixed-size square pages so thousands of sprites
//! can share one texture binding.
//!
//! Packing is CPU-only: [`Atlas::add_sprite`] and [`Atlas::repack`] never
//! touch the driver. GPU state follows lazily in [`Atlas::prepare`], which
//! recreates the page textures whenever the page set changed and uploads any
//! entry whose pixels are stale.
//!
//! ## Page textures
//!
//! With array textures all pages live in one layered texture, recreated at
//! the new layer count when the atlas grows. Without them each page is its
//! own 2D texture.
//!
//! ## Fragmentation
//!
//! Entries die with their images, but their regions stay occupied until the
//! next repack. When a placement would need a new page and at least
//! `repack_dead_ratio` of all entries are dead, the atlas repacks first.

mod entry;
mod page;
mod skyline;

pub use entry::{AtlasEntry, Placement};
pub use page::AtlasPage;
pub use skyline::Skyline;

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{AtlasError, DriverResult};
use crate::geometry::Size;
use crate::gpu::{GpuDriver, TextureDesc, TextureId};
use crate::image::ImageInner;
use crate::pixel::Pixel;
use crate::reclaim::{GpuOwned, ReclaimHandle};

/// Outcome of a repack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepackReport {
    /// Entries re-inserted.
    pub live: usize,
    /// Dead entries discarded.
    pub dead: usize,
    /// Entries that no longer fit within the page limit and were left unpacked.
    pub unplaced: usize,
    /// Page count before the repack.
    pub pages_before: usize,
    /// Page count after the repack.
    pub pages_after: usize,
}

#[derive(Debug, Default)]
enum PageTextures {
    #[default]
    None,
    Array(GpuOwned<TextureId>),
    Separate(Vec<GpuOwned<TextureId>>),
}

/// Multi-page sprite atlas for one pixel format.
#[derive(Debug)]
pub struct Atlas<P: Pixel> {
    page_size: u32,
    max_pages: usize,
    repack_dead_ratio: f32,
    pages: Vec<AtlasPage<P>>,
    /// Bumped whenever the page set changes.
    generation: u64,
    textures: PageTextures,
    synced_generation: Option<u64>,
}

impl<P: Pixel> Atlas<P> {
    /// Creates an empty atlas.
    #[must_use]
    pub fn new(page_size: u32, max_pages: usize, repack_dead_ratio: f32) -> Self {
        Self {
            page_size,
            max_pages: max_pages.max(1),
            repack_dead_ratio,
            pages: Vec::new(),
            generation: 0,
            textures: PageTextures::None,
            synced_generation: None,
        }
    }

    /// Edge length of every page.
    #[must_use]
    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Largest page count this atlas will grow to.
    #[must_use]
    pub const fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Number of pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// The pages, in creation order.
    #[must_use]
    pub fn pages(&self) -> &[AtlasPage<P>] {
        &self.pages
    }

    /// Counter bumped whenever pages are added or repacked.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Entries whose images still exist.
    #[must_use]
    pub fn live_entries(&self) -> usize {
        self.pages.iter().map(|p| p.live_entries().count()).sum()
    }

    /// Entries whose images were dropped but whose regions are still held.
    #[must_use]
    pub fn dead_entries(&self) -> usize {
        self.pages.iter().map(AtlasPage::dead_count).sum()
    }

    /// Packs an image, returning its new entry.
    ///
    /// May repack or grow the atlas; either bumps [`Atlas::generation`].
    ///
    /// # Panics
    ///
    /// Panics if the image is larger than a page.
    ///
    /// # Errors
    ///
    /// [`AtlasError::PageLimit`] when a new page would exceed the limit.
    pub(crate) fn add_sprite(
        &mut self,
        image: &Arc<ImageInner<P>>,
    ) -> Result<Arc<AtlasEntry<P>>, AtlasError> {
        let size = image.size();
        assert!(
            size.fits_within(Size::new(self.page_size, self.page_size)),
            "sprite {}x{} exceeds atlas page size {}",
            size.width,
            size.height,
            self.page_size
        );
        let entry = Arc::new(AtlasEntry::new(image, size));
        self.place(&entry)?;
        Ok(entry)
    }

    /// Places an entry that is currently unpacked.
    pub(crate) fn place(&mut self, entry: &Arc<AtlasEntry<P>>) -> Result<(), AtlasError> {
        if self.place_in_existing(entry) {
            return Ok(());
        }
        if self.should_repack() {
            self.repack();
            if self.place_in_existing(entry) {
                return Ok(());
            }
        }
        if self.place_in_new_page(entry) {
            info!(
                pages = self.pages.len(),
                page_size = self.page_size,
                format = ?P::FORMAT,
                "atlas grew"
            );
            Ok(())
        } else {
            Err(AtlasError::PageLimit {
                limit: self.max_pages,
            })
        }
    }

    fn place_in_existing(&mut self, entry: &Arc<AtlasEntry<P>>) -> bool {
        for (index, page) in self.pages.iter_mut().enumerate() {
            if let Some((x, y)) = page.insert(entry) {
                entry.set_placement(Some(Placement {
                    page: index as u32,
                    x,
                    y,
                }));
                return true;
            }
        }
        false
    }

    fn place_in_new_page(&mut self, entry: &Arc<AtlasEntry<P>>) -> bool {
        if self.pages.len() >= self.max_pages {
            return false;
        }
        let mut page = AtlasPage::new(self.page_size);
        let Some((x, y)) = page.insert(entry) else {
            return false;
        };
        entry.set_placement(Some(Placement {
            page: self.pages.len() as u32,
            x,
            y,
        }));
        self.pages.push(page);
        self.generation += 1;
        true
    }

    fn should_repack(&self) -> bool {
        if self.repack_dead_ratio >= 1.0 {
            return false;
        }
        let total: usize = self.pages.iter().map(AtlasPage::entry_count).sum();
        total > 0 && self.dead_entries() as f32 / total as f32 >= self.repack_dead_ratio
    }

    /// Discards dead entries and re-inserts live ones, tallest first, into
    /// fresh pages.
    pub fn repack(&mut self) -> RepackReport {
        let pages_before = self.pages.len();
        let total: usize = self.pages.iter().map(AtlasPage::entry_count).sum();
        let mut live: Vec<_> = self.pages.iter().flat_map(AtlasPage::live_entries).collect();
        live.sort_by(|a, b| {
            let (a, b) = (a.size(), b.size());
            b.height.cmp(&a.height).then(b.width.cmp(&a.width))
        });

        self.pages.clear();
        let mut unplaced = 0;
        for entry in &live {
            entry.set_placement(None);
            if !self.place_in_existing(entry) && !self.place_in_new_page(entry) {
                unplaced += 1;
            }
        }
        self.generation += 1;

        let report = RepackReport {
            live: live.len(),
            dead: total - live.len(),
            unplaced,
            pages_before,
            pages_after: self.pages.len(),
        };
        debug!(?report, format = ?P::FORMAT, "atlas repacked");
        report
    }

    /// True if pending draws would reference textures about to be replaced.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        !self.pages.is_empty() && self.synced_generation != Some(self.generation)
    }

    /// Brings GPU state up to date for drawing `entry`.
    ///
    /// Recreates page textures if the page set changed (uploading every live
    /// entry), otherwise uploads `entry` alone if its pixels are stale.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub(crate) fn prepare(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
        entry: &AtlasEntry<P>,
    ) -> DriverResult<usize> {
        if self.needs_rebuild() {
            return self.rebuild(driver, reclaim);
        }
        Ok(usize::from(self.upload(driver, entry)?))
    }

    fn rebuild(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
    ) -> DriverResult<usize> {
        // Old textures go back through the reclaimer.
        self.textures = PageTextures::None;
        let size = Size::new(self.page_size, self.page_size);
        self.textures = if driver.capabilities().array_textures {
            let desc = TextureDesc::array(size, self.pages.len() as u32, P::FORMAT);
            PageTextures::Array(GpuOwned::new(driver.create_texture(&desc)?, reclaim.clone()))
        } else {
            let desc = TextureDesc::plain(size, P::FORMAT);
            let textures = self
                .pages
                .iter()
                .map(|_| {
                    driver
                        .create_texture(&desc)
                        .map(|id| GpuOwned::new(id, reclaim.clone()))
                })
                .collect::<DriverResult<Vec<_>>>()?;
            PageTextures::Separate(textures)
        };
        self.synced_generation = Some(self.generation);

        let mut uploads = 0;
        let live: Vec<_> = self.pages.iter().flat_map(AtlasPage::live_entries).collect();
        for entry in &live {
            uploads += usize::from(self.upload(driver, entry)?);
        }
        debug!(
            pages = self.pages.len(),
            uploads,
            generation = self.generation,
            "atlas textures rebuilt"
        );
        Ok(uploads)
    }

    /// Copies an entry's pixels into its page if they are stale.
    fn upload(&self, driver: &mut dyn GpuDriver, entry: &AtlasEntry<P>) -> DriverResult<bool> {
        let (Some(source), Some(placement), Some(rect)) =
            (entry.source(), entry.placement(), entry.rect())
        else {
            return Ok(false);
        };
        let Some((texture, layer)) = self.texture_for(placement.page) else {
            return Ok(false);
        };
        let pixels = source.pixels.read();
        let version = source.version();
        if entry.is_uploaded(self.generation, version) {
            return Ok(false);
        }
        driver.upload_texture(texture, layer, rect, pixels.as_bytes())?;
        entry.mark_uploaded(self.generation, version);
        Ok(true)
    }

    /// Returns the page textures to the reclaimer.
    ///
    /// The next [`Atlas::prepare`] recreates them and re-uploads every entry.
    pub(crate) fn release_textures(&mut self) {
        self.textures = PageTextures::None;
        self.synced_generation = None;
    }

    /// Texture and layer holding `page`.
    #[must_use]
    pub fn texture_for(&self, page: u32) -> Option<(TextureId, u32)> {
        match &self.textures {
            PageTextures::None => None,
            PageTextures::Array(texture) => Some((texture.id(), page)),
            PageTextures::Separate(textures) => textures.get(page as usize).map(|t| (t.id(), 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::gpu::{Capabilities, SoftwareDriver};
    use crate::image::{PaletteImage, RgbImage};
    use crate::pixel::{LockMode, Rgba8};
    use crate::reclaim::Reclaimer;

    fn sprite(width: u32, height: u32) -> PaletteImage {
        PaletteImage::new(Size::new(width, height))
    }

    fn assert_disjoint<P: Pixel>(entries: &[Arc<AtlasEntry<P>>]) {
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                let (pa, pb) = (a.placement().unwrap(), b.placement().unwrap());
                if pa.page == pb.page {
                    assert!(
                        !a.rect().unwrap().intersects(&b.rect().unwrap()),
                        "{pa:?} overlaps {pb:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_three_sprites_share_one_page() {
        let mut atlas = Atlas::<u8>::new(128, 4, 0.5);
        let images: Vec<_> = (0..3).map(|_| sprite(64, 64)).collect();
        let entries: Vec<_> = images
            .iter()
            .map(|i| atlas.add_sprite(i.inner()).unwrap())
            .collect();

        assert_eq!(atlas.page_count(), 1);
        assert!(entries.iter().all(|e| e.placement().unwrap().page == 0));
        assert!(entries.iter().all(|e| e.rect().unwrap().within(Size::new(128, 128))));
        assert_disjoint(&entries);
        assert!((atlas.pages()[0].occupancy() - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    #[should_panic(expected = "exceeds atlas page size")]
    fn test_oversized_sprite_panics() {
        let mut atlas = Atlas::<u8>::new(256, 4, 0.5);
        let image = sprite(300, 300);
        let _ = atlas.add_sprite(image.inner());
    }

    #[test]
    fn test_grows_new_page_when_full() {
        let mut atlas = Atlas::<u8>::new(64, 4, 1.0);
        let a = sprite(64, 64);
        let b = sprite(64, 64);

        let ea = atlas.add_sprite(a.inner()).unwrap();
        let generation = atlas.generation();
        let eb = atlas.add_sprite(b.inner()).unwrap();

        assert_eq!(ea.placement().unwrap().page, 0);
        assert_eq!(eb.placement().unwrap().page, 1);
        assert_eq!(atlas.generation(), generation + 1);
    }

    #[test]
    fn test_page_limit() {
        let mut atlas = Atlas::<u8>::new(64, 1, 0.5);
        let a = sprite(64, 64);
        let b = sprite(1, 1);
        let _kept = atlas.add_sprite(a.inner()).unwrap();

        assert_eq!(
            atlas.add_sprite(b.inner()).unwrap_err(),
            AtlasError::PageLimit { limit: 1 }
        );
    }

    #[test]
    fn test_repack_skips_dead_and_stays_disjoint() {
        let mut atlas = Atlas::<u8>::new(128, 16, 1.0);
        let sizes = [(40, 70), (64, 64), (17, 90), (128, 10), (50, 50), (33, 12), (90, 31), (8, 8)];
        let mut images: Vec<_> =
            sizes.iter().cycle().take(24).map(|&(w, h)| sprite(w, h)).collect();
        let mut entries: Vec<_> = images
            .iter()
            .map(|i| atlas.add_sprite(i.inner()).unwrap())
            .collect();
        assert_disjoint(&entries);

        // Drop every third image together with its entry.
        let mut index = 0;
        images.retain(|_| {
            index += 1;
            index % 3 != 0
        });
        let mut index = 0;
        entries.retain(|_| {
            index += 1;
            index % 3 != 0
        });
        assert_eq!(atlas.dead_entries(), 8);

        let before = atlas.page_count();
        let report = atlas.repack();

        assert_eq!(report.live, 16);
        assert_eq!(report.dead, 8);
        assert_eq!(report.unplaced, 0);
        assert_eq!(report.pages_before, before);
        assert_eq!(report.pages_after, atlas.page_count());
        assert_eq!(atlas.dead_entries(), 0);
        assert_disjoint(&entries);
    }

    #[test]
    fn test_automatic_repack_reuses_dead_space() {
        let mut atlas = Atlas::<u8>::new(64, 4, 0.5);
        let kept = sprite(64, 32);
        let dropped = sprite(64, 32);
        let _kept_entry = atlas.add_sprite(kept.inner()).unwrap();
        let dropped_entry = atlas.add_sprite(dropped.inner()).unwrap();
        drop(dropped_entry);
        drop(dropped);

        let incoming = sprite(64, 32);
        let entry = atlas.add_sprite(incoming.inner()).unwrap();

        assert_eq!(atlas.page_count(), 1);
        assert_eq!(entry.placement().unwrap().page, 0);
        assert_eq!(atlas.dead_entries(), 0);
    }

    #[test]
    fn test_prepare_uploads_once_per_version() {
        let driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(8, 8));
        let device = driver.device();
        let reclaimer = Reclaimer::new(Box::new(driver));
        let handle = reclaimer.handle();
        let mut atlas = Atlas::<Rgba8>::new(32, 4, 0.5);

        let image = RgbImage::new(Size::new(4, 4));
        let entry = atlas.add_sprite(image.inner()).unwrap();
        let mut driver = reclaimer.driver().unwrap();

        assert_eq!(atlas.prepare(&mut *driver, &handle, &entry).unwrap(), 1);
        assert_eq!(atlas.prepare(&mut *driver, &handle, &entry).unwrap(), 0);

        image.lock(LockMode::Write).fill(Rgba8::WHITE);
        assert_eq!(atlas.prepare(&mut *driver, &handle, &entry).unwrap(), 1);

        let (texture, layer) = atlas.texture_for(0).unwrap();
        let uploads = device.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[1].texture, texture);
        assert_eq!(uploads[1].layer, layer);
        assert_eq!(uploads[1].region, Rect::new(0, 0, 4, 4));
        assert_eq!(&device.texture_layer(texture, 0).unwrap()[..4], &[255; 4]);
    }

    #[test]
    fn test_separate_page_textures_without_arrays() {
        let driver = SoftwareDriver::new("software-basic", Capabilities::BASIC, Size::new(8, 8));
        let device = driver.device();
        let reclaimer = Reclaimer::new(Box::new(driver));
        let handle = reclaimer.handle();
        let mut atlas = Atlas::<u8>::new(16, 4, 1.0);

        let a = sprite(16, 16);
        let b = sprite(16, 16);
        let ea = atlas.add_sprite(a.inner()).unwrap();
        let eb = atlas.add_sprite(b.inner()).unwrap();
        {
            let mut driver = reclaimer.driver().unwrap();
            assert_eq!(atlas.prepare(&mut *driver, &handle, &ea).unwrap(), 2);
            assert_eq!(atlas.prepare(&mut *driver, &handle, &eb).unwrap(), 0);
        }

        let (ta, la) = atlas.texture_for(0).unwrap();
        let (tb, lb) = atlas.texture_for(1).unwrap();
        assert_ne!(ta, tb);
        assert_eq!((la, lb), (0, 0));
        assert!(!device.texture_desc(ta).unwrap().array);
    }
}
