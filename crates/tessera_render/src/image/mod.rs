//! Images, palettes and surfaces.
//!
//! All three are cheap, cloneable handles over shared state and may be
//! created, locked and dropped on any thread. Each carries a GPU slot the
//! renderer fills lazily on first draw; dropping the last handle releases
//! whatever the slot holds through the renderer's reclaimer.

mod surface;

pub use surface::Surface;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::atlas::AtlasEntry;
use crate::geometry::Size;
use crate::gpu::TextureId;
use crate::pixel::{LockMode, Pixel, PixelBuffer, PixelLock, Rgba8};
use crate::reclaim::{GpuOwned, ReclaimHandle};

/// A standalone texture holding a copy of an image.
#[derive(Debug)]
pub(crate) struct DirectTexture {
    pub(crate) texture: GpuOwned<TextureId>,
    /// Content version the texture was last uploaded from.
    pub(crate) version: u64,
}

/// Renderer-private data attached to an image.
#[derive(Debug)]
pub(crate) struct ImageGpu<P: Pixel> {
    /// Renderer the slot's contents belong to.
    pub(crate) owner: ReclaimHandle,
    /// Atlas placement, kept alive by the image.
    pub(crate) entry: Option<Arc<AtlasEntry<P>>>,
    /// Texture for draws outside the atlas.
    pub(crate) texture: Option<DirectTexture>,
}

impl<P: Pixel> ImageGpu<P> {
    /// Resets the slot unless it already belongs to `owner`.
    pub(crate) fn claim(&mut self, owner: &ReclaimHandle) {
        if !self.owner.same_renderer(owner) {
            *self = Self {
                owner: owner.clone(),
                entry: None,
                texture: None,
            };
        }
    }
}

impl<P: Pixel> Default for ImageGpu<P> {
    fn default() -> Self {
        Self {
            owner: ReclaimHandle::default(),
            entry: None,
            texture: None,
        }
    }
}

/// Shared state behind an [`Image`].
#[derive(Debug)]
pub(crate) struct ImageInner<P: Pixel> {
    pub(crate) pixels: RwLock<PixelBuffer<P>>,
    pub(crate) version: AtomicU64,
    pub(crate) gpu: Mutex<ImageGpu<P>>,
}

impl<P: Pixel> ImageInner<P> {
    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn size(&self) -> Size {
        self.pixels.read().size()
    }
}

/// A 2D pixel grid shared between threads.
///
/// Cloning yields another handle to the same pixels.
#[derive(Debug)]
pub struct Image<P: Pixel> {
    inner: Arc<ImageInner<P>>,
}

/// Straight RGBA image.
pub type RgbImage = Image<Rgba8>;

/// Palette-index image, drawn through the renderer's current [`Palette`].
pub type PaletteImage = Image<u8>;

impl<P: Pixel> Clone for Image<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Pixel> Image<P> {
    /// Creates an image filled with the default pixel.
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self::from_buffer(PixelBuffer::new(size))
    }

    /// Creates an image from row-major pixels.
    ///
    /// # Panics
    ///
    /// Panics if `pixels` does not hold exactly `width * height` entries.
    #[must_use]
    pub fn from_pixels(size: Size, pixels: Vec<P>) -> Self {
        Self::from_buffer(PixelBuffer::from_pixels(size, pixels))
    }

    /// Wraps an existing buffer.
    #[must_use]
    pub fn from_buffer(buffer: PixelBuffer<P>) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                pixels: RwLock::new(buffer),
                version: AtomicU64::new(0),
                gpu: Mutex::new(ImageGpu::default()),
            }),
        }
    }

    /// Image dimensions.
    #[must_use]
    pub fn size(&self) -> Size {
        self.inner.size()
    }

    /// Content version; bumped each time a write lock is released.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// Acquires scoped access to the pixels.
    ///
    /// Blocks while a conflicting lock is held. Releasing a write lock marks
    /// the image dirty so the next draw re-uploads it.
    #[must_use]
    pub fn lock(&self, mode: LockMode) -> PixelLock<'_, P> {
        match mode {
            LockMode::Read => PixelLock::read(self.inner.pixels.read(), &self.inner.version),
            LockMode::Write => PixelLock::write(self.inner.pixels.write(), &self.inner.version),
        }
    }

    /// True if both handles share the same pixels.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn inner(&self) -> &Arc<ImageInner<P>> {
        &self.inner
    }
}

/// Colour lookup table for [`PaletteImage`]s.
///
/// Stored as an `N x 1` RGBA image so it shares the lock machinery. Index 0 is
/// conventionally transparent; indices past the end sample as transparent.
#[derive(Debug, Clone)]
pub struct Palette {
    image: RgbImage,
}

impl Palette {
    /// Standard palette length.
    pub const LEN: usize = 256;

    /// Creates a palette from colours.
    ///
    /// # Panics
    ///
    /// Panics if `colours` is empty or longer than [`Palette::LEN`].
    #[must_use]
    pub fn new(colours: &[Rgba8]) -> Self {
        assert!(
            !colours.is_empty() && colours.len() <= Self::LEN,
            "palette must hold 1..={} colours",
            Self::LEN
        );
        Self {
            image: Image::from_pixels(Size::new(colours.len() as u32, 1), colours.to_vec()),
        }
    }

    /// Number of colours.
    #[must_use]
    pub fn len(&self) -> usize {
        self.image.size().width as usize
    }

    /// Always false; palettes hold at least one colour.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Colour at `index`.
    #[must_use]
    pub fn get(&self, index: u8) -> Option<Rgba8> {
        self.image.lock(LockMode::Read).get(u32::from(index), 0)
    }

    /// Scoped access to the colours; write locks mark the palette dirty.
    #[must_use]
    pub fn lock(&self, mode: LockMode) -> PixelLock<'_, Rgba8> {
        self.image.lock(mode)
    }

    /// True if both handles share the same colours.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.image.ptr_eq(&other.image)
    }

    pub(crate) fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// Any drawable image kind.
#[derive(Debug, Clone, Copy)]
pub enum ImageRef<'a> {
    /// RGBA image.
    Rgb(&'a RgbImage),
    /// Palette-index image.
    Palette(&'a PaletteImage),
    /// Render-target-backed surface.
    Surface(&'a Surface),
}

impl ImageRef<'_> {
    /// Dimensions of the referenced image.
    #[must_use]
    pub fn size(&self) -> Size {
        match self {
            Self::Rgb(image) => image.size(),
            Self::Palette(image) => image.size(),
            Self::Surface(surface) => surface.size(),
        }
    }
}

impl<'a> From<&'a RgbImage> for ImageRef<'a> {
    fn from(image: &'a RgbImage) -> Self {
        Self::Rgb(image)
    }
}

impl<'a> From<&'a PaletteImage> for ImageRef<'a> {
    fn from(image: &'a PaletteImage) -> Self {
        Self::Palette(image)
    }
}

impl<'a> From<&'a Surface> for ImageRef<'a> {
    fn from(surface: &'a Surface) -> Self {
        Self::Surface(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_lock_bumps_version() {
        let image = PaletteImage::new(Size::new(4, 4));
        assert_eq!(image.version(), 0);

        {
            let _read = image.lock(LockMode::Read);
        }
        assert_eq!(image.version(), 0);

        {
            let mut write = image.lock(LockMode::Write);
            write.set(1, 1, 5);
        }
        assert_eq!(image.version(), 1);
        assert_eq!(image.lock(LockMode::Read).get(1, 1), Some(5));
    }

    #[test]
    fn test_clones_share_pixels() {
        let a = RgbImage::new(Size::new(2, 2));
        let b = a.clone();
        a.lock(LockMode::Write).fill(Rgba8::WHITE);

        assert!(a.ptr_eq(&b));
        assert_eq!(b.lock(LockMode::Read).get(0, 0), Some(Rgba8::WHITE));
        assert_eq!(b.version(), 1);
    }

    #[test]
    fn test_images_cross_threads() {
        let image = RgbImage::new(Size::new(8, 8));
        let worker = image.clone();
        std::thread::spawn(move || {
            worker.lock(LockMode::Write).set(0, 0, Rgba8::BLACK);
        })
        .join()
        .unwrap();
        assert_eq!(image.lock(LockMode::Read).get(0, 0), Some(Rgba8::BLACK));
    }

    #[test]
    fn test_palette_lookup() {
        let palette = Palette::new(&[Rgba8::TRANSPARENT, Rgba8::WHITE]);
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.get(1), Some(Rgba8::WHITE));
        assert_eq!(palette.get(2), None);
    }

    #[test]
    #[should_panic(expected = "palette must hold")]
    fn test_empty_palette_panics() {
        let _ = Palette::new(&[]);
    }

    #[test]
    fn test_image_ref_size() {
        let image = PaletteImage::new(Size::new(3, 5));
        assert_eq!(ImageRef::from(&image).size(), Size::new(3, 5));
    }
}
