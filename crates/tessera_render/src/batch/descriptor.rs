//! Per-sprite instance records for GPU upload.

use bytemuck::{Pod, Zeroable};

use crate::geometry::{Rect, Vec2};
use crate::pixel::Colour;

/// Per-instance data sent to the GPU.
///
/// Uploaded to the instance buffer and consumed by the sprite vertex shader,
/// which expands each record into a quad.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BatchDescriptor {
    /// Source rectangle within the atlas page (x, y, w, h) in texels.
    pub src: [f32; 4],
    /// Destination rectangle (x, y, w, h) in screen pixels.
    pub dst: [f32; 4],
    /// Multiplicative tint, normalised RGBA.
    pub tint: [f32; 4],
    /// Atlas page (array layer).
    pub page: u32,
    /// Bit flags, see [`BatchDescriptor::FLAG_PALETTE`].
    pub flags: u32,
    /// Keeps the record 16-byte sized.
    pub _pad: [u32; 2],
}

impl BatchDescriptor {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Source texels are palette indices rather than RGBA.
    pub const FLAG_PALETTE: u32 = 1;

    /// Instance buffer layout.
    pub const ATTRIBS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x4,  // src
        1 => Float32x4,  // dst
        2 => Float32x4,  // tint
        3 => Uint32x2,   // page, flags
    ];

    /// Instance buffer layout descriptor.
    #[must_use]
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::SIZE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBS,
        }
    }

    /// Creates a descriptor for one sprite.
    #[must_use]
    pub fn new(
        page: u32,
        src: Rect,
        position: Vec2,
        size: Vec2,
        tint: Colour,
        palette: bool,
    ) -> Self {
        Self {
            src: [
                src.x as f32,
                src.y as f32,
                src.width as f32,
                src.height as f32,
            ],
            dst: [position.x, position.y, size.x, size.y],
            tint: tint.to_f32(),
            page,
            flags: if palette { Self::FLAG_PALETTE } else { 0 },
            _pad: [0; 2],
        }
    }

    /// True if the source is palette-indexed.
    #[must_use]
    pub const fn is_palette(&self) -> bool {
        self.flags & Self::FLAG_PALETTE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_size() {
        // 3 vec4s + page/flags + padding
        assert_eq!(BatchDescriptor::SIZE, 64);
        assert_eq!(std::mem::align_of::<BatchDescriptor>(), 4);
    }

    #[test]
    fn test_descriptor_fields() {
        let d = BatchDescriptor::new(
            3,
            Rect::new(16, 32, 8, 4),
            Vec2::new(100.0, 50.0),
            Vec2::new(16.0, 8.0),
            Colour::WHITE,
            true,
        );

        assert_eq!(d.page, 3);
        assert_eq!(d.src, [16.0, 32.0, 8.0, 4.0]);
        assert_eq!(d.dst, [100.0, 50.0, 16.0, 8.0]);
        assert_eq!(d.tint, [1.0; 4]);
        assert!(d.is_palette());
    }

    #[test]
    fn test_instance_step_mode() {
        assert_eq!(BatchDescriptor::desc().step_mode, wgpu::VertexStepMode::Instance);
    }
}
