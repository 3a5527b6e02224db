//! Graphics driver boundary.
//!
//! Divergent graphics-API generations are drivers behind one
//! capability-probed trait ([`GpuDriver`]). The renderer only branches on the
//! few [`Capabilities`] that actually differ:
//!
//! - `instancing`: one draw per batch, or one draw per sprite
//! - `array_textures`: one layered atlas texture, or one texture per page
//! - `integer_textures`: how palette indices are sampled
//!
//! [`SoftwareDriver`] is the CPU reference implementation.

mod driver;
mod software;

pub use driver::{DriverFactory, GpuDriver};
pub use software::{DrawRecord, SoftwareDevice, SoftwareDriver, SoftwareFactory, UploadRecord};

use crate::batch::BatchDescriptor;
use crate::geometry::{Rect, Size, Vec2, Viewport};
use crate::pixel::{Colour, PixelFormat};

/// Texture handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Instance buffer handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// Render target handle issued by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub u64);

/// Any object a driver can delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuObject {
    /// A 2D or array texture.
    Texture(TextureId),
    /// An instance buffer.
    Buffer(BufferId),
    /// An offscreen render target.
    Target(TargetId),
}

impl From<TextureId> for GpuObject {
    fn from(id: TextureId) -> Self {
        Self::Texture(id)
    }
}

impl From<BufferId> for GpuObject {
    fn from(id: BufferId) -> Self {
        Self::Buffer(id)
    }
}

impl From<TargetId> for GpuObject {
    fn from(id: TargetId) -> Self {
        Self::Target(id)
    }
}

/// Feature set reported by a probed driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Instanced draws are available.
    pub instancing: bool,
    /// Layered (array) textures are available.
    pub array_textures: bool,
    /// Unsigned-integer textures are available.
    pub integer_textures: bool,
    /// Largest texture edge.
    pub max_texture_size: u32,
    /// Largest array texture layer count.
    pub max_array_layers: u32,
}

impl Capabilities {
    /// Everything available, generous limits.
    pub const FULL: Self = Self {
        instancing: true,
        array_textures: true,
        integer_textures: true,
        max_texture_size: 8192,
        max_array_layers: 256,
    };

    /// Lowest common denominator: no instancing, no arrays, no integer textures.
    pub const BASIC: Self = Self {
        instancing: false,
        array_textures: false,
        integer_textures: false,
        max_texture_size: 4096,
        max_array_layers: 1,
    };
}

/// Texture creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    /// Size of each layer.
    pub size: Size,
    /// Number of layers (1 for a plain 2D texture).
    pub layers: u32,
    /// Whether the texture is sampled as an array.
    pub array: bool,
    /// Pixel format.
    pub format: PixelFormat,
}

impl TextureDesc {
    /// Single-layer 2D texture.
    #[must_use]
    pub const fn plain(size: Size, format: PixelFormat) -> Self {
        Self {
            size,
            layers: 1,
            array: false,
            format,
        }
    }

    /// Layered array texture.
    #[must_use]
    pub const fn array(size: Size, layers: u32, format: PixelFormat) -> Self {
        Self {
            size,
            layers,
            array: true,
            format,
        }
    }
}

/// Texture filtering for scaled draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Scaler {
    /// Nearest texel.
    #[default]
    Nearest,
    /// Bilinear interpolation.
    Linear,
}

impl Scaler {
    /// The matching sampler filter.
    #[must_use]
    pub const fn filter_mode(self) -> wgpu::FilterMode {
        match self {
            Self::Nearest => wgpu::FilterMode::Nearest,
            Self::Linear => wgpu::FilterMode::Linear,
        }
    }
}

/// Where a draw lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawTarget {
    /// Render target.
    pub target: TargetId,
    /// Target extent.
    pub viewport: Viewport,
    /// The target's rows are stored bottom-up.
    pub flip_y: bool,
}

/// Textures bound for a sprite batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteTextures {
    /// RGBA atlas (array texture, or a single page texture).
    pub rgb_atlas: Option<TextureId>,
    /// Palette-index atlas.
    pub index_atlas: Option<TextureId>,
    /// Palette lookup texture.
    pub palette: Option<TextureId>,
}

/// One instanced draw covering a whole batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstancedDraw {
    /// Destination.
    pub target: DrawTarget,
    /// Bound textures.
    pub textures: SpriteTextures,
    /// Instance buffer holding the descriptors.
    pub buffer: BufferId,
    /// Number of instances to draw.
    pub instance_count: u32,
}

/// One sprite drawn without instancing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpriteDraw {
    /// Destination.
    pub target: DrawTarget,
    /// Bound textures.
    pub textures: SpriteTextures,
    /// The sprite.
    pub descriptor: BatchDescriptor,
}

/// Texture source for the direct quad path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuadSource {
    /// A plain texture; `format` decides whether the palette is applied.
    Texture {
        /// Texture to sample.
        id: TextureId,
        /// Pixel format of the texture.
        format: PixelFormat,
    },
    /// Another render target's colour contents.
    Target(TargetId),
}

/// A single textured quad outside the batch path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    /// Destination.
    pub target: DrawTarget,
    /// Texture source.
    pub source: QuadSource,
    /// Source rectangle in texels.
    pub src: Rect,
    /// Destination position.
    pub position: Vec2,
    /// Destination size.
    pub size: Vec2,
    /// Multiplicative tint.
    pub tint: Colour,
    /// Sampling filter.
    pub scaler: Scaler,
    /// Palette for index sources.
    pub palette: Option<TextureId>,
}

/// Untextured primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// Solid rectangle.
    FilledRect {
        /// Top-left corner.
        position: Vec2,
        /// Extent.
        size: Vec2,
    },
    /// Rectangle outline drawn inside the bounds.
    Rect {
        /// Top-left corner.
        position: Vec2,
        /// Extent.
        size: Vec2,
        /// Stroke width.
        thickness: f32,
    },
    /// Line segment.
    Line {
        /// Start point.
        from: Vec2,
        /// End point.
        to: Vec2,
        /// Stroke width.
        thickness: f32,
    },
}

/// A solid-colour primitive draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeDraw {
    /// Destination.
    pub target: DrawTarget,
    /// Primitive.
    pub shape: Shape,
    /// Fill colour.
    pub colour: Colour,
}
