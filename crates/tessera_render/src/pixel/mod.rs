//! CPU-side pixel storage.
//!
//! Two pixel kinds are supported:
//!
//! - `u8`: palette index, 1 byte per pixel
//! - [`Rgba8`]: straight RGBA, 4 bytes per pixel
//!
//! Buffers are row-major with a top-left origin, matching screen coordinates.

mod buffer;
mod lock;

pub use buffer::PixelBuffer;
pub use lock::{LockMode, PixelLock};

use bytemuck::{Pod, Zeroable};

/// 8-bit-per-channel RGBA colour.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Rgba8 {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha (255 = opaque).
    pub a: u8,
}

/// Colours passed to draw calls share the pixel layout.
pub type Colour = Rgba8;

impl Rgba8 {
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0, 0, 0, 0);
    /// Opaque black.
    pub const BLACK: Self = Self::new(0, 0, 0, 255);
    /// Opaque white.
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    /// Creates a colour.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Normalised channels for shader upload.
    #[must_use]
    pub fn to_f32(self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }
}

/// Storage format of a texture or pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// One palette index per pixel.
    Index8,
    /// Four 8-bit channels per pixel.
    Rgba8,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Index8 => 1,
            Self::Rgba8 => 4,
        }
    }

    /// The matching GPU texture format.
    ///
    /// Index textures are sampled as unsigned integers when the backend
    /// supports integer textures, otherwise as normalised red.
    #[must_use]
    pub const fn texture_format(self, integer_textures: bool) -> wgpu::TextureFormat {
        match (self, integer_textures) {
            (Self::Index8, true) => wgpu::TextureFormat::R8Uint,
            (Self::Index8, false) => wgpu::TextureFormat::R8Unorm,
            (Self::Rgba8, _) => wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

/// A pixel type that can live in a [`PixelBuffer`].
pub trait Pixel: Pod + Default + PartialEq + Send + Sync + std::fmt::Debug + 'static {
    /// Format tag for textures holding this pixel type.
    const FORMAT: PixelFormat;
}

impl Pixel for u8 {
    const FORMAT: PixelFormat = PixelFormat::Index8;
}

impl Pixel for Rgba8 {
    const FORMAT: PixelFormat = PixelFormat::Rgba8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_layout() {
        assert_eq!(std::mem::size_of::<Rgba8>(), 4);
        let c = Rgba8::new(1, 2, 3, 4);
        assert_eq!(bytemuck::bytes_of(&c), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_index_format_depends_on_integer_support() {
        assert_eq!(
            PixelFormat::Index8.texture_format(true),
            wgpu::TextureFormat::R8Uint
        );
        assert_eq!(
            PixelFormat::Index8.texture_format(false),
            wgpu::TextureFormat::R8Unorm
        );
        assert_eq!(<Rgba8 as Pixel>::FORMAT.bytes_per_pixel(), 4);
    }
}
