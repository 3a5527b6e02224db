//! Driver and driver-factory traits.

use super::{
    BufferId, Capabilities, GpuObject, InstancedDraw, QuadDraw, ShapeDraw, SpriteDraw, TargetId,
    TextureDesc, TextureId,
};
use crate::batch::BatchDescriptor;
use crate::error::DriverResult;
use crate::geometry::{Rect, Size};
use crate::pixel::Colour;

/// A graphics backend.
///
/// Every method must be called on the renderer's bound thread; the
/// [`crate::Reclaimer`] that owns the driver enforces this. The trait is `Send`
/// only so the owner can be shared with threads that queue deletions.
pub trait GpuDriver: Send {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Probed feature set.
    fn capabilities(&self) -> Capabilities;

    /// The default framebuffer. Never deleted.
    fn screen_target(&self) -> TargetId;

    /// Creates a texture with undefined contents.
    ///
    /// # Errors
    ///
    /// Fails on unsupported formats or oversized textures.
    fn create_texture(&mut self, desc: &TextureDesc) -> DriverResult<TextureId>;

    /// Copies tightly packed pixels into `region` of one layer.
    ///
    /// # Errors
    ///
    /// Fails for unknown textures or regions outside the layer.
    fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        region: Rect,
        data: &[u8],
    ) -> DriverResult<()>;

    /// Creates an RGBA render target cleared to transparent.
    ///
    /// # Errors
    ///
    /// Fails for oversized targets.
    fn create_render_target(&mut self, size: Size) -> DriverResult<TargetId>;

    /// Replaces a target's contents with top-down RGBA rows.
    ///
    /// # Errors
    ///
    /// Fails for unknown targets or a length mismatch.
    fn upload_target(&mut self, target: TargetId, flip_y: bool, data: &[u8]) -> DriverResult<()>;

    /// Reads a target back as top-down RGBA rows.
    ///
    /// # Errors
    ///
    /// Fails for unknown targets or a length mismatch.
    fn read_target(&mut self, target: TargetId, flip_y: bool, out: &mut [u8]) -> DriverResult<()>;

    /// Creates an instance buffer holding `capacity` descriptors.
    ///
    /// # Errors
    ///
    /// Fails if the allocation is refused.
    fn create_instance_buffer(&mut self, capacity: usize) -> DriverResult<BufferId>;

    /// Uploads descriptors to the start of an instance buffer.
    ///
    /// # Errors
    ///
    /// Fails for unknown buffers or overflow.
    fn write_instance_buffer(
        &mut self,
        buffer: BufferId,
        descriptors: &[BatchDescriptor],
    ) -> DriverResult<()>;

    /// Fills a target with one colour.
    ///
    /// # Errors
    ///
    /// Fails for unknown targets.
    fn clear(&mut self, target: TargetId, colour: Colour) -> DriverResult<()>;

    /// Draws `instance_count` sprites from an instance buffer.
    ///
    /// # Errors
    ///
    /// Fails for unknown objects.
    fn draw_instanced(&mut self, draw: &InstancedDraw) -> DriverResult<()>;

    /// Draws one sprite without instancing.
    ///
    /// # Errors
    ///
    /// Fails for unknown objects.
    fn draw_sprite(&mut self, draw: &SpriteDraw) -> DriverResult<()>;

    /// Draws one textured quad.
    ///
    /// # Errors
    ///
    /// Fails for unknown objects.
    fn draw_quad(&mut self, draw: &QuadDraw) -> DriverResult<()>;

    /// Draws one solid primitive.
    ///
    /// # Errors
    ///
    /// Fails for unknown targets.
    fn draw_shape(&mut self, draw: &ShapeDraw) -> DriverResult<()>;

    /// Destroys an object. Unknown handles are ignored.
    fn delete(&mut self, object: GpuObject);
}

/// Creates a driver after checking it can run here.
pub trait DriverFactory {
    /// Name matched against [`crate::RendererConfig::backends`].
    fn name(&self) -> &str;

    /// Initialises the backend for a default framebuffer of `screen` pixels.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DriverError::ProbeFailed`] when the backend is unusable.
    fn probe(&self, screen: Size) -> DriverResult<Box<dyn GpuDriver>>;
}
