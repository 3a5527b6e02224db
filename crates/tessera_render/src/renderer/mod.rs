//! # Renderer
//!
//! Engine-facing entry point. Owns the driver (through the [`Reclaimer`]), both
//! atlases, the batch accumulator and the screen surface, and routes every
//! draw to one of three paths:
//!
//! | Path | Used for |
//! |------|----------|
//! | atlas + batch | RGB and palette images up to `atlas.max_sprite_size`, nearest filtering |
//! | direct quad | larger images, linear scaling, atlas overflow, surfaces |
//! | shape | filled rectangles, outlines, lines |
//!
//! Anything outside the batch flushes it first so draws land in call order.
//!
//! The renderer is bound to the thread that created it and is `!Send`.
//! Images and surfaces may be dropped anywhere; their GPU objects come back
//! through the reclaimer and are deleted here, at the latest on the next
//! [`Renderer::flush`].

mod backend;
mod stats;

pub use stats::{AtlasStats, RenderStats};

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::atlas::{Atlas, RepackReport};
use crate::batch::{BatchAccumulator, BatchBinding, BatchDescriptor, FlushReport};
use crate::config::RendererConfig;
use crate::error::RenderResult;
use crate::geometry::{Rect, Size, Vec2, Viewport};
use crate::gpu::{
    Capabilities, DrawTarget, DriverFactory, GpuDriver, QuadDraw, QuadSource, Scaler, Shape,
    ShapeDraw, SpriteTextures, TextureDesc, TextureId,
};
use crate::image::{DirectTexture, Image, ImageRef, Palette, PaletteImage, RgbImage, Surface};
use crate::pixel::{Colour, Pixel, PixelFormat, Rgba8};
use crate::reclaim::{GpuOwned, ReclaimHandle, Reclaimer};
use stats::DrawCounters;

/// Destination and style of one image draw.
#[derive(Debug, Clone, Copy)]
struct Quad {
    position: Vec2,
    size: Vec2,
    tint: Colour,
    scaler: Scaler,
}

/// Sprite renderer bound to the creating thread.
pub struct Renderer {
    config: RendererConfig,
    backend: String,
    capabilities: Capabilities,
    max_sprite_size: u32,
    rgb_atlas: Atlas<Rgba8>,
    index_atlas: Atlas<u8>,
    batch: BatchAccumulator,
    palette: Option<Palette>,
    screen: Surface,
    surface: Surface,
    counters: DrawCounters,
    reclaim: ReclaimHandle,
    reclaimer: Arc<Reclaimer>,
    _not_send: PhantomData<Rc<()>>,
}

impl Renderer {
    /// Validates `config`, probes backends in preference order and binds the
    /// renderer to the calling thread.
    ///
    /// # Errors
    ///
    /// [`crate::RenderError::Config`] for invalid configuration,
    /// [`crate::RenderError::NoBackend`] when every probe fails, or a driver
    /// error while binding the screen.
    pub fn new(config: RendererConfig, factories: &[&dyn DriverFactory]) -> RenderResult<Self> {
        config.validate()?;
        let screen_size = Size::new(config.screen.width, config.screen.height);
        let driver = backend::probe(&config.backends, factories, screen_size)?;

        let backend = driver.name().to_owned();
        let capabilities = driver.capabilities();
        let screen_target = driver.screen_target();

        let page_size = config.atlas.page_size.min(capabilities.max_texture_size);
        let max_pages = if capabilities.array_textures {
            config.atlas.max_pages.min(capabilities.max_array_layers as usize)
        } else {
            config.atlas.max_pages
        };
        let max_sprite_size = config.atlas.max_sprite_size.min(page_size);
        let ratio = config.atlas.repack_dead_ratio;

        let reclaimer = Reclaimer::new(driver);
        let reclaim = reclaimer.handle();

        let screen = Surface::new(screen_size);
        screen.inner().bind_screen(screen_target, reclaim.clone());

        info!(
            backend = %backend,
            page_size,
            max_pages,
            max_sprite_size,
            screen = ?screen_size,
            "renderer initialised"
        );

        Ok(Self {
            rgb_atlas: Atlas::new(page_size, max_pages, ratio),
            index_atlas: Atlas::new(page_size, max_pages, ratio),
            batch: BatchAccumulator::new(config.batch.capacity, config.batch.ring_size),
            config,
            backend,
            capabilities,
            max_sprite_size,
            palette: None,
            surface: screen.clone(),
            screen,
            counters: DrawCounters::default(),
            reclaim,
            reclaimer,
            _not_send: PhantomData,
        })
    }

    /// Name of the selected backend.
    #[must_use]
    pub fn backend_name(&self) -> &str {
        &self.backend
    }

    /// Capabilities of the selected backend.
    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// The configuration the renderer was built from.
    #[must_use]
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The reclaimer owning this renderer's driver.
    #[must_use]
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.reclaimer
    }

    /// Draws an image at its natural size.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw<'a>(&mut self, image: impl Into<ImageRef<'a>>, position: Vec2) -> RenderResult<()> {
        let image = image.into();
        let size = image.size().to_vec2();
        self.draw_image(image, Quad {
            position,
            size,
            tint: Colour::WHITE,
            scaler: Scaler::Nearest,
        })
    }

    /// Draws an image stretched to `size`.
    ///
    /// Linear scaling bypasses the atlas so neighbouring sprites never bleed in.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw_scaled<'a>(
        &mut self,
        image: impl Into<ImageRef<'a>>,
        position: Vec2,
        size: Vec2,
        scaler: Scaler,
    ) -> RenderResult<()> {
        self.draw_image(image.into(), Quad {
            position,
            size,
            tint: Colour::WHITE,
            scaler,
        })
    }

    /// Draws an image at its natural size, multiplied by `tint`.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw_tinted<'a>(
        &mut self,
        image: impl Into<ImageRef<'a>>,
        position: Vec2,
        tint: Colour,
    ) -> RenderResult<()> {
        let image = image.into();
        let size = image.size().to_vec2();
        self.draw_image(image, Quad {
            position,
            size,
            tint,
            scaler: Scaler::Nearest,
        })
    }

    /// Fills a rectangle.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw_filled_rect(
        &mut self,
        position: Vec2,
        size: Vec2,
        colour: Colour,
    ) -> RenderResult<()> {
        self.draw_shape(Shape::FilledRect { position, size }, colour)
    }

    /// Outlines a rectangle; the stroke lies inside the bounds.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw_rect(
        &mut self,
        position: Vec2,
        size: Vec2,
        thickness: f32,
        colour: Colour,
    ) -> RenderResult<()> {
        self.draw_shape(
            Shape::Rect {
                position,
                size,
                thickness,
            },
            colour,
        )
    }

    /// Draws a line segment.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn draw_line(
        &mut self,
        from: Vec2,
        to: Vec2,
        thickness: f32,
        colour: Colour,
    ) -> RenderResult<()> {
        self.draw_shape(Shape::Line { from, to, thickness }, colour)
    }

    /// Fills the current surface with one colour.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn clear(&mut self, colour: Colour) -> RenderResult<()> {
        let reclaimer = Arc::clone(&self.reclaimer);
        let mut driver = reclaimer.driver()?;
        self.flush_batch(&mut *driver)?;
        let target = self.current_target(&mut *driver)?;
        driver.clear(target.target, colour)?;
        self.surface.inner().mark_gpu_newer();
        Ok(())
    }

    /// Selects the palette applied to palette images, or none.
    ///
    /// Palette draws made while no palette is set are skipped.
    pub fn set_palette(&mut self, palette: Option<&Palette>) {
        self.palette = palette.cloned();
    }

    /// The current palette.
    #[must_use]
    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// Redirects subsequent draws into `surface`, or back to the screen.
    ///
    /// # Errors
    ///
    /// Propagates driver failures while flushing or creating the target.
    pub fn set_surface(&mut self, surface: Option<&Surface>) -> RenderResult<()> {
        let next = surface.cloned().unwrap_or_else(|| self.screen.clone());
        if next.ptr_eq(&self.surface) {
            return Ok(());
        }
        let reclaimer = Arc::clone(&self.reclaimer);
        let mut driver = reclaimer.driver()?;
        self.flush_batch(&mut *driver)?;
        next.inner().prepare_target(&mut *driver, &self.reclaim)?;
        debug!(screen = next.ptr_eq(&self.screen), size = ?next.size(), "draw surface changed");
        self.surface = next;
        Ok(())
    }

    /// The surface draws currently land in.
    #[must_use]
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// The screen surface.
    #[must_use]
    pub fn default_surface(&self) -> &Surface {
        &self.screen
    }

    /// Submits pending sprites and deletes objects released since the last
    /// flush.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn flush(&mut self) -> RenderResult<FlushReport> {
        let reclaimer = Arc::clone(&self.reclaimer);
        let mut driver = reclaimer.driver()?;
        let report = self.flush_batch(&mut *driver)?;
        let drained = reclaimer.drain_with(&mut *driver);
        debug!(
            instances = report.instances,
            draw_calls = report.draw_calls,
            drained,
            "renderer flushed"
        );
        Ok(report)
    }

    /// Repacks both atlases, discarding regions held by dropped images.
    ///
    /// Textures are rebuilt on the next sprite draw.
    ///
    /// # Errors
    ///
    /// Propagates driver failures from the flush that precedes the repack.
    pub fn repack_atlases(&mut self) -> RenderResult<RepackReport> {
        self.flush()?;
        let rgb = self.rgb_atlas.repack();
        let index = self.index_atlas.repack();
        Ok(RepackReport {
            live: rgb.live + index.live,
            dead: rgb.dead + index.dead,
            unplaced: rgb.unplaced + index.unplaced,
            pages_before: rgb.pages_before + index.pages_before,
            pages_after: rgb.pages_after + index.pages_after,
        })
    }

    /// Counters for every draw path, the batch, the reclaimer and both atlases.
    #[must_use]
    pub fn stats(&self) -> RenderStats {
        RenderStats::new(
            self.counters,
            self.batch.stats(),
            self.reclaimer.stats(),
            AtlasStats::of(&self.rgb_atlas),
            AtlasStats::of(&self.index_atlas),
        )
    }

    fn current_target(&self, driver: &mut dyn GpuDriver) -> RenderResult<DrawTarget> {
        let target = self.surface.inner().prepare_target(driver, &self.reclaim)?;
        Ok(DrawTarget {
            target,
            viewport: Viewport {
                size: self.surface.size(),
            },
            flip_y: self.surface.ptr_eq(&self.screen),
        })
    }

    fn flush_batch(&mut self, driver: &mut dyn GpuDriver) -> RenderResult<FlushReport> {
        Pending::new(&mut self.batch, &self.reclaim, &self.surface).flush(driver)
    }

    fn draw_shape(&mut self, shape: Shape, colour: Colour) -> RenderResult<()> {
        let reclaimer = Arc::clone(&self.reclaimer);
        let mut driver = reclaimer.driver()?;
        self.flush_batch(&mut *driver)?;
        let target = self.current_target(&mut *driver)?;
        driver.draw_shape(&ShapeDraw {
            target,
            shape,
            colour,
        })?;
        self.surface.inner().mark_gpu_newer();
        self.counters.shape_draws += 1;
        Ok(())
    }

    fn draw_image(&mut self, image: ImageRef<'_>, quad: Quad) -> RenderResult<()> {
        if image.size().area() == 0 {
            return Ok(());
        }
        let reclaimer = Arc::clone(&self.reclaimer);
        let mut guard = reclaimer.driver()?;
        let driver = &mut *guard;

        let drawn = match image {
            ImageRef::Rgb(image) => self.draw_rgb(driver, image, quad)?,
            ImageRef::Palette(image) => self.draw_indexed(driver, image, quad)?,
            ImageRef::Surface(surface) => self.draw_surface(driver, surface, quad)?,
        };
        if drawn {
            self.surface.inner().mark_gpu_newer();
        } else {
            self.counters.skipped_draws += 1;
        }
        Ok(())
    }

    fn fits_atlas(&self, size: Size, scaler: Scaler) -> bool {
        let limit = Size::new(self.max_sprite_size, self.max_sprite_size);
        scaler == Scaler::Nearest && size.fits_within(limit)
    }

    fn draw_rgb(
        &mut self,
        driver: &mut dyn GpuDriver,
        image: &RgbImage,
        quad: Quad,
    ) -> RenderResult<bool> {
        if self.fits_atlas(image.size(), quad.scaler) {
            let pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
            let placed = place_sprite(&mut self.rgb_atlas, pending, driver, image)?;
            if let Some((texture, layer, src)) = placed {
                let textures = SpriteTextures {
                    rgb_atlas: Some(texture),
                    ..SpriteTextures::default()
                };
                self.push_sprite(driver, textures, layer, src, quad, false)?;
                return Ok(true);
            }
            self.counters.atlas_fallbacks += 1;
        }
        let pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
        let texture = direct_texture(pending, driver, image)?;
        self.draw_direct(driver, texture, Rgba8::FORMAT, image.size(), None, quad)?;
        Ok(true)
    }

    fn draw_indexed(
        &mut self,
        driver: &mut dyn GpuDriver,
        image: &PaletteImage,
        quad: Quad,
    ) -> RenderResult<bool> {
        let Some(palette) = self.palette.clone() else {
            warn!(size = ?image.size(), "palette image drawn with no palette set, skipped");
            return Ok(false);
        };
        let pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
        let palette = direct_texture(pending, driver, palette.image())?;

        if self.fits_atlas(image.size(), quad.scaler) {
            let pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
            let placed = place_sprite(&mut self.index_atlas, pending, driver, image)?;
            if let Some((texture, layer, src)) = placed {
                let textures = SpriteTextures {
                    index_atlas: Some(texture),
                    palette: Some(palette),
                    ..SpriteTextures::default()
                };
                self.push_sprite(driver, textures, layer, src, quad, true)?;
                return Ok(true);
            }
            self.counters.atlas_fallbacks += 1;
        }
        let pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
        let texture = direct_texture(pending, driver, image)?;
        self.draw_direct(driver, texture, u8::FORMAT, image.size(), Some(palette), quad)?;
        Ok(true)
    }

    fn draw_surface(
        &mut self,
        driver: &mut dyn GpuDriver,
        surface: &Surface,
        quad: Quad,
    ) -> RenderResult<bool> {
        if surface.ptr_eq(&self.surface) {
            warn!(size = ?surface.size(), "surface drawn into itself, skipped");
            return Ok(false);
        }
        self.flush_batch(driver)?;
        let source = surface.inner().prepare_target(driver, &self.reclaim)?;
        let target = self.current_target(driver)?;
        driver.draw_quad(&QuadDraw {
            target,
            source: QuadSource::Target(source),
            src: Rect::from_size(surface.size()),
            position: quad.position,
            size: quad.size,
            tint: quad.tint,
            scaler: quad.scaler,
            palette: None,
        })?;
        self.counters.direct_draws += 1;
        Ok(true)
    }

    fn push_sprite(
        &mut self,
        driver: &mut dyn GpuDriver,
        textures: SpriteTextures,
        layer: u32,
        src: Rect,
        quad: Quad,
        palette: bool,
    ) -> RenderResult<()> {
        let binding = BatchBinding {
            target: self.current_target(driver)?,
            textures,
        };
        let descriptor =
            BatchDescriptor::new(layer, src, quad.position, quad.size, quad.tint, palette);
        let report = self.batch.push(driver, &self.reclaim, binding, descriptor)?;
        if report.is_some_and(|r| r.instances > 0) {
            self.surface.inner().mark_gpu_newer();
        }
        self.counters.sprites += 1;
        Ok(())
    }

    fn draw_direct(
        &mut self,
        driver: &mut dyn GpuDriver,
        texture: TextureId,
        format: PixelFormat,
        size: Size,
        palette: Option<TextureId>,
        quad: Quad,
    ) -> RenderResult<()> {
        self.flush_batch(driver)?;
        let target = self.current_target(driver)?;
        driver.draw_quad(&QuadDraw {
            target,
            source: QuadSource::Texture { id: texture, format },
            src: Rect::from_size(size),
            position: quad.position,
            size: quad.size,
            tint: quad.tint,
            scaler: quad.scaler,
            palette,
        })?;
        self.counters.direct_draws += 1;
        Ok(())
    }
}

/// The pending batch and the surface its sprites land in.
///
/// Every batch flush goes through here so the surface learns its GPU copy
/// changed even if it was read back while the sprites were still queued.
struct Pending<'a> {
    batch: &'a mut BatchAccumulator,
    reclaim: &'a ReclaimHandle,
    target: &'a Surface,
}

impl<'a> Pending<'a> {
    fn new(
        batch: &'a mut BatchAccumulator,
        reclaim: &'a ReclaimHandle,
        target: &'a Surface,
    ) -> Self {
        Self {
            batch,
            reclaim,
            target,
        }
    }

    fn flush(&mut self, driver: &mut dyn GpuDriver) -> RenderResult<FlushReport> {
        let report = self.batch.flush(driver, self.reclaim)?;
        if report.instances > 0 {
            self.target.inner().mark_gpu_newer();
        }
        Ok(report)
    }
}

/// Makes sure `image` is packed and uploaded, returning its texture, layer and
/// source rectangle, or `None` if the atlas cannot take it.
fn place_sprite<P: Pixel>(
    atlas: &mut Atlas<P>,
    mut pending: Pending<'_>,
    driver: &mut dyn GpuDriver,
    image: &Image<P>,
) -> RenderResult<Option<(TextureId, u32, Rect)>> {
    let reclaim = pending.reclaim;
    let inner = image.inner();
    let entry = {
        let mut gpu = inner.gpu.lock();
        gpu.claim(reclaim);
        match gpu.entry.clone() {
            Some(entry) if entry.placement().is_some() => entry,
            Some(entry) => {
                if let Err(err) = atlas.place(&entry) {
                    warn!(%err, size = ?entry.size(), "sprite left out of the atlas");
                    return Ok(None);
                }
                entry
            }
            None => match atlas.add_sprite(inner) {
                Ok(entry) => {
                    gpu.entry = Some(Arc::clone(&entry));
                    entry
                }
                Err(err) => {
                    warn!(%err, size = ?image.size(), "sprite left out of the atlas");
                    return Ok(None);
                }
            },
        }
    };

    // Pending sprites sample the current page contents.
    let outdated = entry.is_outdated(atlas.generation(), inner.version());
    if outdated || atlas.needs_rebuild() {
        pending.flush(driver)?;
    }
    atlas.prepare(driver, reclaim, &entry)?;

    let (Some(placed), Some(rect)) = (entry.placement(), entry.rect()) else {
        return Ok(None);
    };
    Ok(atlas
        .texture_for(placed.page)
        .map(|(texture, layer)| (texture, layer, rect)))
}

/// Standalone texture holding `image`, created or refreshed as needed.
fn direct_texture<P: Pixel>(
    mut pending: Pending<'_>,
    driver: &mut dyn GpuDriver,
    image: &Image<P>,
) -> RenderResult<TextureId> {
    let reclaim = pending.reclaim;
    let inner = image.inner();
    let mut gpu = inner.gpu.lock();
    gpu.claim(reclaim);
    let pixels = inner.pixels.read();
    let version = inner.version();

    let current = gpu.texture.as_ref().map(|direct| (direct.texture.id(), direct.version));
    let id = match current {
        Some((id, uploaded)) if uploaded == version => return Ok(id),
        Some((id, _)) => {
            pending.flush(driver)?;
            id
        }
        None => {
            let desc = TextureDesc::plain(pixels.size(), P::FORMAT);
            let id = driver.create_texture(&desc)?;
            gpu.texture = Some(DirectTexture {
                texture: GpuOwned::new(id, reclaim.clone()),
                version,
            });
            id
        }
    };
    driver.upload_texture(id, 0, Rect::from_size(pixels.size()), pixels.as_bytes())?;
    if let Some(direct) = gpu.texture.as_mut() {
        direct.version = version;
    }
    Ok(id)
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Ok(mut driver) = self.reclaimer.driver() {
            let mut pending = Pending::new(&mut self.batch, &self.reclaim, &self.surface);
            if let Err(err) = pending.flush(&mut *driver) {
                warn!(%err, "final flush failed");
            }
        }
        // Released while the driver is free so they are deleted, not queued.
        self.batch.release_buffers();
        self.rgb_atlas.release_textures();
        self.index_atlas.release_textures();
        self.palette = None;
        self.surface = self.screen.clone();

        if let Err(err) = self.reclaimer.shutdown() {
            warn!(%err, "renderer torn down off its thread, gpu objects leaked");
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend)
            .field("capabilities", &self.capabilities)
            .field("pending_sprites", &self.batch.len())
            .finish_non_exhaustive()
    }
}
