//! CPU reference driver.
//!
//! Keeps every texture, target and instance buffer in system memory and
//! rasterizes draws with nearest or bilinear sampling and straight-alpha
//! blending. Every draw is also appended to a log so callers can inspect
//! exactly what the renderer submitted.
//!
//! The driver and any number of [`SoftwareDevice`] handles share one state, so
//! the device can still be inspected after the driver has been boxed and
//! handed to a renderer.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    BufferId, Capabilities, DrawTarget, DriverFactory, GpuDriver, GpuObject, InstancedDraw,
    QuadDraw, QuadSource, Scaler, Shape, ShapeDraw, SpriteDraw, SpriteTextures, TargetId,
    TextureDesc, TextureId,
};
use crate::batch::BatchDescriptor;
use crate::error::{DriverError, DriverResult};
use crate::geometry::{Rect, Size, Vec2};
use crate::pixel::{Colour, PixelFormat, Rgba8};

const SCREEN: TargetId = TargetId(1);

/// One submitted draw, as logged by the software driver.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawRecord {
    /// A target was cleared.
    Clear {
        /// Target.
        target: TargetId,
        /// Fill colour.
        colour: Colour,
    },
    /// An instanced sprite batch.
    Instanced {
        /// Target.
        target: TargetId,
        /// Instances drawn.
        instance_count: u32,
    },
    /// A single sprite drawn without instancing.
    Sprite {
        /// Target.
        target: TargetId,
        /// Atlas page.
        page: u32,
    },
    /// A direct textured quad.
    Quad {
        /// Target.
        target: TargetId,
        /// Source texture or target.
        source: QuadSource,
    },
    /// A solid primitive.
    Shape {
        /// Target.
        target: TargetId,
        /// Primitive.
        shape: Shape,
    },
}

/// One texture upload, as logged by the software driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRecord {
    /// Destination texture.
    pub texture: TextureId,
    /// Destination layer.
    pub layer: u32,
    /// Destination region.
    pub region: Rect,
}

#[derive(Debug)]
struct SoftTexture {
    desc: TextureDesc,
    layers: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct SoftTarget {
    size: Size,
    pixels: Vec<Rgba8>,
    bottom_up: bool,
}

#[derive(Debug)]
struct SoftBuffer {
    capacity: usize,
    descriptors: Vec<BatchDescriptor>,
}

#[derive(Debug)]
struct DeviceState {
    capabilities: Capabilities,
    next_id: u64,
    textures: HashMap<TextureId, SoftTexture>,
    targets: HashMap<TargetId, SoftTarget>,
    buffers: HashMap<BufferId, SoftBuffer>,
    records: Vec<DrawRecord>,
    uploads: Vec<UploadRecord>,
    deleted: Vec<GpuObject>,
}

/// Shared view of a software device's state.
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SoftwareDevice {
    fn new(capabilities: Capabilities, screen: Size) -> Self {
        let mut targets = HashMap::new();
        targets.insert(
            SCREEN,
            SoftTarget {
                size: screen,
                pixels: vec![Rgba8::TRANSPARENT; screen.area() as usize],
                bottom_up: true,
            },
        );
        Self {
            state: Arc::new(Mutex::new(DeviceState {
                capabilities,
                next_id: SCREEN.0 + 1,
                textures: HashMap::new(),
                targets,
                buffers: HashMap::new(),
                records: Vec::new(),
                uploads: Vec::new(),
                deleted: Vec::new(),
            })),
        }
    }

    /// Copy of the draw log.
    #[must_use]
    pub fn records(&self) -> Vec<DrawRecord> {
        self.state.lock().records.clone()
    }

    /// Instance counts of every instanced draw in the log.
    #[must_use]
    pub fn instanced_draws(&self) -> Vec<u32> {
        self.state
            .lock()
            .records
            .iter()
            .filter_map(|r| match r {
                DrawRecord::Instanced { instance_count, .. } => Some(*instance_count),
                _ => None,
            })
            .collect()
    }

    /// Copy of the upload log.
    #[must_use]
    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.lock().uploads.clone()
    }

    /// Objects deleted so far, in order.
    #[must_use]
    pub fn deleted(&self) -> Vec<GpuObject> {
        self.state.lock().deleted.clone()
    }

    /// True if the object exists.
    #[must_use]
    pub fn is_live(&self, object: GpuObject) -> bool {
        let state = self.state.lock();
        match object {
            GpuObject::Texture(id) => state.textures.contains_key(&id),
            GpuObject::Buffer(id) => state.buffers.contains_key(&id),
            GpuObject::Target(id) => state.targets.contains_key(&id),
        }
    }

    /// Number of live textures.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// The default framebuffer.
    #[must_use]
    pub const fn screen_target(&self) -> TargetId {
        SCREEN
    }

    /// A target's pixels as top-down rows.
    #[must_use]
    pub fn target_pixels(&self, target: TargetId) -> Option<Vec<Rgba8>> {
        let state = self.state.lock();
        let t = state.targets.get(&target)?;
        let mut out = t.pixels.clone();
        if t.bottom_up {
            flip_rows(bytemuck::cast_slice_mut(out.as_mut_slice()), t.size.width as usize * 4);
        }
        Some(out)
    }

    /// Raw bytes of one texture layer.
    #[must_use]
    pub fn texture_layer(&self, texture: TextureId, layer: u32) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state
            .textures
            .get(&texture)
            .and_then(|t| t.layers.get(layer as usize).cloned())
    }

    /// Creation parameters of a texture.
    #[must_use]
    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.state.lock().textures.get(&texture).map(|t| t.desc)
    }
}

/// Software implementation of [`GpuDriver`].
#[derive(Debug)]
pub struct SoftwareDriver {
    name: String,
    device: SoftwareDevice,
}

impl SoftwareDriver {
    /// Creates a driver with the given capabilities and screen size.
    #[must_use]
    pub fn new(name: &str, capabilities: Capabilities, screen: Size) -> Self {
        Self {
            name: name.to_owned(),
            device: SoftwareDevice::new(capabilities, screen),
        }
    }

    /// Inspection handle sharing this driver's state.
    #[must_use]
    pub fn device(&self) -> SoftwareDevice {
        self.device.clone()
    }

    fn next_id(state: &mut DeviceState) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }
}

fn unknown(object: impl std::fmt::Debug) -> DriverError {
    DriverError::UnknownObject(format!("{object:?}"))
}

fn flip_rows(bytes: &mut [u8], row_bytes: usize) {
    let rows = bytes.len() / row_bytes;
    for row in 0..rows / 2 {
        let (head, tail) = bytes.split_at_mut((rows - 1 - row) * row_bytes);
        head[row * row_bytes..(row + 1) * row_bytes].swap_with_slice(&mut tail[..row_bytes]);
    }
}

/// Pixel indices whose centres fall inside `[start, start + len)`.
fn covered(start: f32, len: f32, limit: u32) -> Range<u32> {
    if len.is_nan() || len <= 0.0 {
        return 0..0;
    }
    let first = start.round().max(0.0);
    let last = (start + len).round().min(limit as f32);
    if last <= first {
        0..0
    } else {
        first as u32..last as u32
    }
}

/// Continuous source coordinate for destination pixel `p`.
fn source_coord(p: u32, dst_start: f32, dst_len: f32, src_start: f32, src_len: f32) -> f32 {
    src_start + ((p as f32 + 0.5 - dst_start) / dst_len) * src_len
}

fn nearest(coord: f32, src_start: f32, src_len: f32) -> u32 {
    let lo = src_start.max(0.0);
    let hi = (src_start + src_len - 1.0).max(lo);
    coord.floor().clamp(lo, hi) as u32
}

fn blend(dst: Rgba8, src: [f32; 4]) -> Rgba8 {
    let a = src[3].clamp(0.0, 1.0);
    if a <= 0.0 {
        return dst;
    }
    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    if a >= 1.0 {
        return Rgba8::new(to_u8(src[0]), to_u8(src[1]), to_u8(src[2]), 255);
    }
    let d = dst.to_f32();
    let out_a = a + d[3] * (1.0 - a);
    let mix = |s: f32, dc: f32| (s * a + dc * d[3] * (1.0 - a)) / out_a;
    Rgba8::new(
        to_u8(mix(src[0], d[0])),
        to_u8(mix(src[1], d[1])),
        to_u8(mix(src[2], d[2])),
        to_u8(out_a),
    )
}

fn modulate(colour: Rgba8, tint: [f32; 4]) -> [f32; 4] {
    let c = colour.to_f32();
    [c[0] * tint[0], c[1] * tint[1], c[2] * tint[2], c[3] * tint[3]]
}

impl SoftTarget {
    fn plot(&mut self, flip_y: bool, x: u32, y: u32, src: [f32; 4]) {
        let row = if flip_y { self.size.height - 1 - y } else { y };
        let i = (row * self.size.width + x) as usize;
        self.pixels[i] = blend(self.pixels[i], src);
    }

    fn texel(&self, x: u32, y: u32) -> Rgba8 {
        let row = if self.bottom_up { self.size.height - 1 - y } else { y };
        self.pixels[(row * self.size.width + x) as usize]
    }

    fn fill_rect(&mut self, flip_y: bool, position: Vec2, size: Vec2, colour: [f32; 4]) {
        for y in covered(position.y, size.y, self.size.height) {
            for x in covered(position.x, size.x, self.size.width) {
                self.plot(flip_y, x, y, colour);
            }
        }
    }
}

impl SoftTexture {
    fn layer(&self, layer: u32) -> DriverResult<&[u8]> {
        self.layers
            .get(layer as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| unknown(("layer", layer)))
    }

    fn rgba(data: &[u8], width: u32, x: u32, y: u32) -> Rgba8 {
        let i = ((y * width + x) * 4) as usize;
        Rgba8::new(data[i], data[i + 1], data[i + 2], data[i + 3])
    }
}

/// Palette lookup texture view.
struct PaletteView<'a> {
    colours: &'a [u8],
}

impl PaletteView<'_> {
    fn get(&self, index: u8) -> Rgba8 {
        let i = usize::from(index) * 4;
        self.colours
            .get(i..i + 4)
            .map_or(Rgba8::TRANSPARENT, |c| Rgba8::new(c[0], c[1], c[2], c[3]))
    }
}

fn palette_view(
    textures: &HashMap<TextureId, SoftTexture>,
    palette: Option<TextureId>,
) -> DriverResult<PaletteView<'_>> {
    let id = palette.ok_or_else(|| unknown("unbound palette"))?;
    let texture = textures.get(&id).ok_or_else(|| unknown(id))?;
    Ok(PaletteView {
        colours: texture.layer(0)?,
    })
}

fn rasterize_sprite(
    textures: &HashMap<TextureId, SoftTexture>,
    target: &mut SoftTarget,
    draw_target: DrawTarget,
    bound: SpriteTextures,
    d: &BatchDescriptor,
) -> DriverResult<()> {
    let atlas_id = if d.is_palette() {
        bound.index_atlas
    } else {
        bound.rgb_atlas
    }
    .ok_or_else(|| unknown("unbound atlas"))?;
    let atlas = textures.get(&atlas_id).ok_or_else(|| unknown(atlas_id))?;
    let layer = atlas.layer(if atlas.desc.array { d.page } else { 0 })?;
    let width = atlas.desc.size.width;
    let palette = if d.is_palette() {
        Some(palette_view(textures, bound.palette)?)
    } else {
        None
    };

    let [sx, sy, sw, sh] = d.src;
    let [dx, dy, dw, dh] = d.dst;
    for y in covered(dy, dh, target.size.height) {
        let ty = nearest(source_coord(y, dy, dh, sy, sh), sy, sh);
        for x in covered(dx, dw, target.size.width) {
            let tx = nearest(source_coord(x, dx, dw, sx, sw), sx, sw);
            let texel = match &palette {
                Some(palette) => palette.get(layer[(ty * width + tx) as usize]),
                None => SoftTexture::rgba(layer, width, tx, ty),
            };
            target.plot(draw_target.flip_y, x, y, modulate(texel, d.tint));
        }
    }
    Ok(())
}

/// Source of texels for the quad path, already resolved.
enum QuadTexels<'a> {
    Rgba { data: &'a [u8], width: u32 },
    Index { data: &'a [u8], width: u32, palette: PaletteView<'a> },
    Target(&'a SoftTarget),
}

impl QuadTexels<'_> {
    fn fetch(&self, x: u32, y: u32) -> Rgba8 {
        match self {
            Self::Rgba { data, width } => SoftTexture::rgba(data, *width, x, y),
            Self::Index {
                data,
                width,
                palette,
            } => palette.get(data[(y * width + x) as usize]),
            Self::Target(target) => target.texel(x, y),
        }
    }

    fn bilinear(&self, u: f32, v: f32, src: Rect) -> [f32; 4] {
        let clamp_x = |c: f32| c.clamp(src.x as f32, (src.right() - 1) as f32) as u32;
        let clamp_y = |c: f32| c.clamp(src.y as f32, (src.bottom() - 1) as f32) as u32;
        let (u, v) = (u - 0.5, v - 0.5);
        let (fx, fy) = (u - u.floor(), v - v.floor());
        let (x0, x1) = (clamp_x(u.floor()), clamp_x(u.floor() + 1.0));
        let (y0, y1) = (clamp_y(v.floor()), clamp_y(v.floor() + 1.0));
        let c00 = self.fetch(x0, y0).to_f32();
        let c10 = self.fetch(x1, y0).to_f32();
        let c01 = self.fetch(x0, y1).to_f32();
        let c11 = self.fetch(x1, y1).to_f32();
        let mut out = [0.0; 4];
        for i in 0..4 {
            let top = c00[i] + (c10[i] - c00[i]) * fx;
            let bottom = c01[i] + (c11[i] - c01[i]) * fx;
            out[i] = top + (bottom - top) * fy;
        }
        out
    }
}

fn rasterize_quad(texels: &QuadTexels<'_>, target: &mut SoftTarget, draw: &QuadDraw) {
    let src = draw.src;
    let tint = draw.tint.to_f32();
    let linear = draw.scaler == Scaler::Linear && !matches!(texels, QuadTexels::Index { .. });
    let (sx, sy, sw, sh) = (src.x as f32, src.y as f32, src.width as f32, src.height as f32);
    let (dx, dy, dw, dh) = (draw.position.x, draw.position.y, draw.size.x, draw.size.y);

    for y in covered(dy, dh, target.size.height) {
        let v = source_coord(y, dy, dh, sy, sh);
        for x in covered(dx, dw, target.size.width) {
            let u = source_coord(x, dx, dw, sx, sw);
            let colour = if linear {
                let c = texels.bilinear(u, v, src);
                [c[0] * tint[0], c[1] * tint[1], c[2] * tint[2], c[3] * tint[3]]
            } else {
                modulate(texels.fetch(nearest(u, sx, sw), nearest(v, sy, sh)), tint)
            };
            target.plot(draw.target.flip_y, x, y, colour);
        }
    }
}

fn rasterize_line(
    target: &mut SoftTarget,
    flip_y: bool,
    from: Vec2,
    to: Vec2,
    thickness: f32,
    colour: [f32; 4],
) {
    let (mut x0, mut y0) = (from.x.round() as i64, from.y.round() as i64);
    let (x1, y1) = (to.x.round() as i64, to.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let step_x = if x0 < x1 { 1 } else { -1 };
    let step_y = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let pen = thickness.max(1.0);
    let (w, h) = (i64::from(target.size.width), i64::from(target.size.height));

    loop {
        if pen <= 1.0 {
            if (0..w).contains(&x0) && (0..h).contains(&y0) {
                target.plot(flip_y, x0 as u32, y0 as u32, colour);
            }
        } else {
            let half = pen / 2.0;
            target.fill_rect(
                flip_y,
                Vec2::new(x0 as f32 + 0.5 - half, y0 as f32 + 0.5 - half),
                Vec2::new(pen, pen),
                colour,
            );
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += step_x;
        }
        if e2 <= dx {
            err += dx;
            y0 += step_y;
        }
    }
}

impl GpuDriver for SoftwareDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.device.state.lock().capabilities
    }

    fn screen_target(&self) -> TargetId {
        SCREEN
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> DriverResult<TextureId> {
        let mut state = self.device.state.lock();
        let caps = state.capabilities;
        if desc.size.width > caps.max_texture_size || desc.size.height > caps.max_texture_size {
            return Err(DriverError::OutOfMemory {
                bytes: desc.size.area() as usize * desc.format.bytes_per_pixel(),
            });
        }
        if desc.array && (!caps.array_textures || desc.layers > caps.max_array_layers) {
            return Err(DriverError::UnsupportedFormat(format!(
                "array texture with {} layers",
                desc.layers
            )));
        }
        let layer_bytes = desc.size.area() as usize * desc.format.bytes_per_pixel();
        let id = TextureId(Self::next_id(&mut state));
        state.textures.insert(
            id,
            SoftTexture {
                desc: *desc,
                layers: vec![vec![0; layer_bytes]; desc.layers.max(1) as usize],
            },
        );
        Ok(id)
    }

    fn upload_texture(
        &mut self,
        texture: TextureId,
        layer: u32,
        region: Rect,
        data: &[u8],
    ) -> DriverResult<()> {
        let mut state = self.device.state.lock();
        let tex = state.textures.get_mut(&texture).ok_or_else(|| unknown(texture))?;
        let size = tex.desc.size;
        if !region.within(size) {
            return Err(DriverError::InvalidRegion {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                limit_width: size.width,
                limit_height: size.height,
            });
        }
        let bpp = tex.desc.format.bytes_per_pixel();
        let row_bytes = region.width as usize * bpp;
        assert_eq!(
            data.len(),
            row_bytes * region.height as usize,
            "upload data does not match region"
        );
        let pixels = tex
            .layers
            .get_mut(layer as usize)
            .ok_or_else(|| unknown((texture, layer)))?;
        for row in 0..region.height as usize {
            let dst = ((region.y as usize + row) * size.width as usize + region.x as usize) * bpp;
            let src = row * row_bytes;
            pixels[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
        state.uploads.push(UploadRecord {
            texture,
            layer,
            region,
        });
        Ok(())
    }

    fn create_render_target(&mut self, size: Size) -> DriverResult<TargetId> {
        let mut state = self.device.state.lock();
        let max = state.capabilities.max_texture_size;
        if size.width > max || size.height > max {
            return Err(DriverError::OutOfMemory {
                bytes: size.area() as usize * 4,
            });
        }
        let id = TargetId(Self::next_id(&mut state));
        state.targets.insert(
            id,
            SoftTarget {
                size,
                pixels: vec![Rgba8::TRANSPARENT; size.area() as usize],
                bottom_up: false,
            },
        );
        Ok(id)
    }

    fn upload_target(&mut self, target: TargetId, flip_y: bool, data: &[u8]) -> DriverResult<()> {
        let mut state = self.device.state.lock();
        let t = state.targets.get_mut(&target).ok_or_else(|| unknown(target))?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(t.pixels.as_mut_slice());
        if bytes.len() != data.len() {
            return Err(DriverError::InvalidRegion {
                x: 0,
                y: 0,
                width: (data.len() / 4) as u32,
                height: 1,
                limit_width: t.size.width,
                limit_height: t.size.height,
            });
        }
        bytes.copy_from_slice(data);
        if flip_y {
            flip_rows(bytes, t.size.width as usize * 4);
        }
        Ok(())
    }

    fn read_target(&mut self, target: TargetId, flip_y: bool, out: &mut [u8]) -> DriverResult<()> {
        let state = self.device.state.lock();
        let t = state.targets.get(&target).ok_or_else(|| unknown(target))?;
        let bytes: &[u8] = bytemuck::cast_slice(t.pixels.as_slice());
        if bytes.len() != out.len() {
            return Err(DriverError::InvalidRegion {
                x: 0,
                y: 0,
                width: (out.len() / 4) as u32,
                height: 1,
                limit_width: t.size.width,
                limit_height: t.size.height,
            });
        }
        out.copy_from_slice(bytes);
        if flip_y {
            flip_rows(out, t.size.width as usize * 4);
        }
        Ok(())
    }

    fn create_instance_buffer(&mut self, capacity: usize) -> DriverResult<BufferId> {
        let mut state = self.device.state.lock();
        let id = BufferId(Self::next_id(&mut state));
        state.buffers.insert(
            id,
            SoftBuffer {
                capacity,
                descriptors: Vec::with_capacity(capacity),
            },
        );
        Ok(id)
    }

    fn write_instance_buffer(
        &mut self,
        buffer: BufferId,
        descriptors: &[BatchDescriptor],
    ) -> DriverResult<()> {
        let mut state = self.device.state.lock();
        let b = state.buffers.get_mut(&buffer).ok_or_else(|| unknown(buffer))?;
        if descriptors.len() > b.capacity {
            return Err(DriverError::OutOfMemory {
                bytes: descriptors.len() * BatchDescriptor::SIZE,
            });
        }
        b.descriptors.clear();
        b.descriptors.extend_from_slice(descriptors);
        Ok(())
    }

    fn clear(&mut self, target: TargetId, colour: Colour) -> DriverResult<()> {
        let mut state = self.device.state.lock();
        state
            .targets
            .get_mut(&target)
            .ok_or_else(|| unknown(target))?
            .pixels
            .fill(colour);
        state.records.push(DrawRecord::Clear { target, colour });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: &InstancedDraw) -> DriverResult<()> {
        let mut guard = self.device.state.lock();
        let state = &mut *guard;
        let buffer = state.buffers.get(&draw.buffer).ok_or_else(|| unknown(draw.buffer))?;
        let target = state
            .targets
            .get_mut(&draw.target.target)
            .ok_or_else(|| unknown(draw.target.target))?;
        let count = (draw.instance_count as usize).min(buffer.descriptors.len());
        for d in &buffer.descriptors[..count] {
            rasterize_sprite(&state.textures, target, draw.target, draw.textures, d)?;
        }
        state.records.push(DrawRecord::Instanced {
            target: draw.target.target,
            instance_count: draw.instance_count,
        });
        Ok(())
    }

    fn draw_sprite(&mut self, draw: &SpriteDraw) -> DriverResult<()> {
        let mut guard = self.device.state.lock();
        let state = &mut *guard;
        let target = state
            .targets
            .get_mut(&draw.target.target)
            .ok_or_else(|| unknown(draw.target.target))?;
        rasterize_sprite(&state.textures, target, draw.target, draw.textures, &draw.descriptor)?;
        state.records.push(DrawRecord::Sprite {
            target: draw.target.target,
            page: draw.descriptor.page,
        });
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw) -> DriverResult<()> {
        let mut guard = self.device.state.lock();
        let state = &mut *guard;
        let dest = draw.target.target;

        // A target sampling itself would alias; sample a snapshot instead.
        let snapshot = match draw.source {
            QuadSource::Target(id) => {
                let source = state.targets.get(&id).ok_or_else(|| unknown(id))?;
                Some(SoftTarget {
                    size: source.size,
                    pixels: source.pixels.clone(),
                    bottom_up: source.bottom_up,
                })
            }
            QuadSource::Texture { .. } => None,
        };
        let texels = match (draw.source, &snapshot) {
            (_, Some(target)) => QuadTexels::Target(target),
            (QuadSource::Texture { id, format }, None) => {
                let texture = state.textures.get(&id).ok_or_else(|| unknown(id))?;
                let data = texture.layer(0)?;
                let width = texture.desc.size.width;
                match format {
                    PixelFormat::Rgba8 => QuadTexels::Rgba { data, width },
                    PixelFormat::Index8 => QuadTexels::Index {
                        data,
                        width,
                        palette: palette_view(&state.textures, draw.palette)?,
                    },
                }
            }
            (QuadSource::Target(id), None) => return Err(unknown(id)),
        };
        let target = state.targets.get_mut(&dest).ok_or_else(|| unknown(dest))?;
        rasterize_quad(&texels, target, draw);
        state.records.push(DrawRecord::Quad {
            target: dest,
            source: draw.source,
        });
        Ok(())
    }

    fn draw_shape(&mut self, draw: &ShapeDraw) -> DriverResult<()> {
        let mut state = self.device.state.lock();
        let target = state
            .targets
            .get_mut(&draw.target.target)
            .ok_or_else(|| unknown(draw.target.target))?;
        let colour = draw.colour.to_f32();
        let flip_y = draw.target.flip_y;
        match draw.shape {
            Shape::FilledRect { position, size } => {
                target.fill_rect(flip_y, position, size, colour);
            }
            Shape::Rect {
                position,
                size,
                thickness,
            } => {
                let t = thickness.max(1.0).min(size.x / 2.0).min(size.y / 2.0);
                let inner_h = size.y - 2.0 * t;
                target.fill_rect(flip_y, position, Vec2::new(size.x, t), colour);
                target.fill_rect(
                    flip_y,
                    Vec2::new(position.x, position.y + size.y - t),
                    Vec2::new(size.x, t),
                    colour,
                );
                target.fill_rect(
                    flip_y,
                    Vec2::new(position.x, position.y + t),
                    Vec2::new(t, inner_h),
                    colour,
                );
                target.fill_rect(
                    flip_y,
                    Vec2::new(position.x + size.x - t, position.y + t),
                    Vec2::new(t, inner_h),
                    colour,
                );
            }
            Shape::Line {
                from,
                to,
                thickness,
            } => rasterize_line(target, flip_y, from, to, thickness, colour),
        }
        state.records.push(DrawRecord::Shape {
            target: draw.target.target,
            shape: draw.shape,
        });
        Ok(())
    }

    fn delete(&mut self, object: GpuObject) {
        let mut state = self.device.state.lock();
        let removed = match object {
            GpuObject::Texture(id) => state.textures.remove(&id).is_some(),
            GpuObject::Buffer(id) => state.buffers.remove(&id).is_some(),
            GpuObject::Target(id) => id != SCREEN && state.targets.remove(&id).is_some(),
        };
        if removed {
            state.deleted.push(object);
        }
    }
}

/// Factory for [`SoftwareDriver`].
///
/// Every successful probe shares the factory's [`SoftwareDevice`].
#[derive(Debug)]
pub struct SoftwareFactory {
    name: String,
    capabilities: Capabilities,
    available: bool,
    device: Mutex<Option<SoftwareDevice>>,
}

impl SoftwareFactory {
    /// Factory with explicit capabilities.
    #[must_use]
    pub fn new(name: &str, capabilities: Capabilities) -> Self {
        Self {
            name: name.to_owned(),
            capabilities,
            available: true,
            device: Mutex::new(None),
        }
    }

    /// `"software"`: every capability.
    #[must_use]
    pub fn full() -> Self {
        Self::new("software", Capabilities::FULL)
    }

    /// `"software-basic"`: no instancing, array or integer textures.
    #[must_use]
    pub fn basic() -> Self {
        Self::new("software-basic", Capabilities::BASIC)
    }

    /// A factory whose probe always fails.
    #[must_use]
    pub fn unavailable(name: &str) -> Self {
        Self {
            available: false,
            ..Self::new(name, Capabilities::FULL)
        }
    }

    /// Device of the most recent successful probe.
    #[must_use]
    pub fn device(&self) -> Option<SoftwareDevice> {
        self.device.lock().clone()
    }
}

impl DriverFactory for SoftwareFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self, screen: Size) -> DriverResult<Box<dyn GpuDriver>> {
        if !self.available {
            return Err(DriverError::ProbeFailed(format!("{} is not available", self.name)));
        }
        let driver = SoftwareDriver::new(&self.name, self.capabilities, screen);
        *self.device.lock() = Some(driver.device());
        Ok(Box::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Viewport;

    fn target(id: TargetId, size: Size) -> DrawTarget {
        DrawTarget {
            target: id,
            viewport: Viewport { size },
            flip_y: false,
        }
    }

    #[test]
    fn test_target_round_trip_with_flip() {
        let mut driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(2, 2));
        let data: Vec<u8> = (0..16).collect();
        let screen = driver.screen_target();

        driver.upload_target(screen, true, &data).unwrap();
        let mut out = vec![0; 16];
        driver.read_target(screen, true, &mut out).unwrap();

        assert_eq!(out, data);
    }

    #[test]
    fn test_sprite_palette_lookup() {
        let mut driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(4, 4));
        let atlas = driver
            .create_texture(&TextureDesc::array(Size::new(4, 4), 1, PixelFormat::Index8))
            .unwrap();
        driver.upload_texture(atlas, 0, Rect::new(0, 0, 2, 1), &[0, 1]).unwrap();
        let palette = driver
            .create_texture(&TextureDesc::plain(Size::new(2, 1), PixelFormat::Rgba8))
            .unwrap();
        driver
            .upload_texture(palette, 0, Rect::new(0, 0, 2, 1), &[0, 0, 0, 0, 255, 0, 0, 255])
            .unwrap();
        let surface = driver.create_render_target(Size::new(4, 4)).unwrap();

        let draw = SpriteDraw {
            target: target(surface, Size::new(4, 4)),
            textures: SpriteTextures {
                rgb_atlas: None,
                index_atlas: Some(atlas),
                palette: Some(palette),
            },
            descriptor: BatchDescriptor::new(
                0,
                Rect::new(0, 0, 2, 1),
                Vec2::new(1.0, 1.0),
                Vec2::new(2.0, 1.0),
                Colour::WHITE,
                true,
            ),
        };
        driver.draw_sprite(&draw).unwrap();

        let pixels = driver.device().target_pixels(surface).unwrap();
        // Index 0 is transparent, index 1 is red.
        assert_eq!(pixels[4 + 1], Rgba8::TRANSPARENT);
        assert_eq!(pixels[4 + 2], Rgba8::new(255, 0, 0, 255));
    }

    #[test]
    fn test_delete_never_removes_screen() {
        let mut driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(1, 1));
        let device = driver.device();
        driver.delete(GpuObject::Target(driver.screen_target()));
        assert!(device.is_live(GpuObject::Target(device.screen_target())));
        assert!(device.deleted().is_empty());
    }

    #[test]
    fn test_basic_capabilities_reject_arrays() {
        let mut driver =
            SoftwareDriver::new("software-basic", Capabilities::BASIC, Size::new(1, 1));
        let err = driver
            .create_texture(&TextureDesc::array(Size::new(8, 8), 2, PixelFormat::Rgba8))
            .unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_line_and_outline() {
        let mut driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(8, 8));
        let surface = driver.create_render_target(Size::new(8, 8)).unwrap();
        let t = target(surface, Size::new(8, 8));

        driver
            .draw_shape(&ShapeDraw {
                target: t,
                shape: Shape::Line {
                    from: Vec2::new(0.0, 0.0),
                    to: Vec2::new(7.0, 7.0),
                    thickness: 1.0,
                },
                colour: Colour::WHITE,
            })
            .unwrap();
        let pixels = driver.device().target_pixels(surface).unwrap();
        for i in 0..8 {
            assert_eq!(pixels[i * 8 + i], Colour::WHITE);
        }
        assert_eq!(pixels.iter().filter(|&&p| p == Colour::WHITE).count(), 8);

        driver.clear(surface, Colour::TRANSPARENT).unwrap();
        driver
            .draw_shape(&ShapeDraw {
                target: t,
                shape: Shape::Rect {
                    position: Vec2::new(0.0, 0.0),
                    size: Vec2::new(4.0, 4.0),
                    thickness: 1.0,
                },
                colour: Colour::WHITE,
            })
            .unwrap();
        let pixels = driver.device().target_pixels(surface).unwrap();
        // 4x4 outline has 12 border pixels and a hollow 2x2 centre.
        assert_eq!(pixels.iter().filter(|&&p| p == Colour::WHITE).count(), 12);
        assert_eq!(pixels[8 + 1], Colour::TRANSPARENT);
    }
}
