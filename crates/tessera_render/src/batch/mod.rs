//! # Batch Accumulator
//!
//! Collects sprite descriptors that share a binding and submits them as a
//! single instanced draw.
//!
//! Buffers form a ring so the buffer just submitted is not rewritten while
//! the GPU may still be reading it. A flush happens:
//!
//! - right after the push that fills the active buffer
//! - before a push whose binding cannot merge with the current one
//! - when the caller asks (the renderer does so before any non-batched draw)
//!
//! Without instancing the flush issues one draw per sprite instead.

mod buffer;
mod descriptor;

pub use buffer::SpriteBuffer;
pub use descriptor::BatchDescriptor;

use tracing::trace;

use crate::error::DriverResult;
use crate::gpu::{DrawTarget, GpuDriver, InstancedDraw, SpriteDraw, SpriteTextures, TextureId};
use crate::reclaim::ReclaimHandle;

/// Textures and destination a batch is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBinding {
    /// Where the batch lands.
    pub target: DrawTarget,
    /// Bound textures; unset slots are free.
    pub textures: SpriteTextures,
}

impl BatchBinding {
    /// The union of two bindings, or `None` if they disagree on any slot.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Option<Self> {
        fn slot(a: Option<TextureId>, b: Option<TextureId>) -> Option<Option<TextureId>> {
            match (a, b) {
                (Some(a), Some(b)) if a != b => None,
                _ => Some(a.or(b)),
            }
        }

        if self.target != other.target {
            return None;
        }
        Some(Self {
            target: self.target,
            textures: SpriteTextures {
                rgb_atlas: slot(self.textures.rgb_atlas, other.textures.rgb_atlas)?,
                index_atlas: slot(self.textures.index_atlas, other.textures.index_atlas)?,
                palette: slot(self.textures.palette, other.textures.palette)?,
            },
        })
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Sprites submitted.
    pub instances: usize,
    /// Draw calls issued.
    pub draw_calls: usize,
    /// The flush was forced by a full buffer or a binding change.
    pub implicit: bool,
}

impl FlushReport {
    fn combine(self, other: Self) -> Self {
        Self {
            instances: self.instances + other.instances,
            draw_calls: self.draw_calls + other.draw_calls,
            implicit: self.implicit || other.implicit,
        }
    }
}

/// Running batch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Flushes that submitted at least one sprite.
    pub flushes: u64,
    /// Of those, flushes forced by a full buffer or binding change.
    pub implicit_flushes: u64,
    /// Sprites submitted.
    pub instances: u64,
    /// Draw calls issued.
    pub draw_calls: u64,
    /// Sprites thrown away because their flush failed.
    pub discarded: u64,
}

/// Ring of sprite buffers feeding instanced draws.
#[derive(Debug)]
pub struct BatchAccumulator {
    buffers: Vec<SpriteBuffer>,
    active: usize,
    binding: Option<BatchBinding>,
    stats: BatchStats,
}

impl BatchAccumulator {
    /// Creates `ring_size` buffers of `capacity` descriptors each.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    #[must_use]
    pub fn new(capacity: usize, ring_size: usize) -> Self {
        assert!(capacity > 0 && ring_size > 0, "batch capacity and ring size must be non-zero");
        Self {
            buffers: (0..ring_size).map(|_| SpriteBuffer::new(capacity)).collect(),
            active: 0,
            binding: None,
            stats: BatchStats::default(),
        }
    }

    /// Descriptors per buffer.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffers[self.active].capacity()
    }

    /// Number of buffers in the ring.
    #[must_use]
    pub fn ring_size(&self) -> usize {
        self.buffers.len()
    }

    /// Index of the buffer currently accumulating.
    #[must_use]
    pub const fn active_index(&self) -> usize {
        self.active
    }

    /// Sprites waiting in the active buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers[self.active].len()
    }

    /// True if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers[self.active].is_empty()
    }

    /// Binding of the sprites waiting, if any.
    #[must_use]
    pub const fn binding(&self) -> Option<BatchBinding> {
        self.binding
    }

    /// Counters since creation.
    #[must_use]
    pub const fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Queues one sprite, flushing first if `binding` cannot merge with the
    /// pending batch and afterwards if the buffer became full.
    ///
    /// Returns the report of any flush this push caused.
    ///
    /// # Errors
    ///
    /// Propagates driver failures from a flush.
    pub fn push(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
        binding: BatchBinding,
        descriptor: BatchDescriptor,
    ) -> DriverResult<Option<FlushReport>> {
        let mut report = None;
        let merged = match self.binding {
            Some(current) if !self.is_empty() => current.merge(&binding),
            _ => Some(binding),
        };
        self.binding = match merged {
            Some(merged) => Some(merged),
            None => {
                report = Some(self.submit(driver, reclaim, true)?);
                Some(binding)
            }
        };

        self.buffers[self.active].push(descriptor);

        if self.buffers[self.active].is_full() {
            let full = self.submit(driver, reclaim, true)?;
            report = Some(report.map_or(full, |r| r.combine(full)));
        }
        Ok(report)
    }

    /// Submits whatever is pending.
    ///
    /// # Errors
    ///
    /// Propagates driver failures.
    pub fn flush(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
    ) -> DriverResult<FlushReport> {
        self.submit(driver, reclaim, false)
    }

    /// Returns every instance buffer to the reclaimer.
    ///
    /// Pending sprites are kept; flush first if they should be drawn.
    pub(crate) fn release_buffers(&mut self) {
        self.buffers.iter_mut().for_each(SpriteBuffer::release_gpu);
    }

    fn submit(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
        implicit: bool,
    ) -> DriverResult<FlushReport> {
        let binding = match self.binding {
            Some(binding) if !self.is_empty() => binding,
            _ => return Ok(FlushReport::default()),
        };

        let buffer = &mut self.buffers[self.active];
        let instances = buffer.len();
        let draw_calls = match Self::draw(buffer, driver, reclaim, binding) {
            Ok(draw_calls) => draw_calls,
            Err(err) => {
                // A binding the driver rejects stays rejected; keep the ring usable.
                buffer.clear();
                self.binding = None;
                self.stats.discarded += instances as u64;
                return Err(err);
            }
        };
        buffer.clear();

        self.active = (self.active + 1) % self.buffers.len();
        self.buffers[self.active].clear();
        self.binding = None;

        self.stats.flushes += 1;
        self.stats.implicit_flushes += u64::from(implicit);
        self.stats.instances += instances as u64;
        self.stats.draw_calls += draw_calls as u64;
        trace!(instances, draw_calls, implicit, "batch flushed");

        Ok(FlushReport {
            instances,
            draw_calls,
            implicit,
        })
    }

    fn draw(
        buffer: &mut SpriteBuffer,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
        binding: BatchBinding,
    ) -> DriverResult<usize> {
        if driver.capabilities().instancing {
            let id = buffer.upload(driver, reclaim)?;
            driver.draw_instanced(&InstancedDraw {
                target: binding.target,
                textures: binding.textures,
                buffer: id,
                instance_count: buffer.len() as u32,
            })?;
            return Ok(1);
        }
        for descriptor in buffer.descriptors() {
            driver.draw_sprite(&SpriteDraw {
                target: binding.target,
                textures: binding.textures,
                descriptor: *descriptor,
            })?;
        }
        Ok(buffer.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, Size, Vec2, Viewport};
    use crate::gpu::{
        Capabilities, DrawRecord, SoftwareDevice, SoftwareDriver, TargetId, TextureDesc,
    };
    use crate::pixel::{Colour, PixelFormat};
    use crate::reclaim::Reclaimer;
    use std::sync::Arc;

    struct Fixture {
        reclaimer: Arc<Reclaimer>,
        device: SoftwareDevice,
        binding: BatchBinding,
    }

    fn fixture(capabilities: Capabilities) -> Fixture {
        let mut driver = SoftwareDriver::new("software", capabilities, Size::new(16, 16));
        let device = driver.device();
        let atlas = driver
            .create_texture(&TextureDesc::plain(Size::new(8, 8), PixelFormat::Rgba8))
            .unwrap();
        let target = driver.create_render_target(Size::new(16, 16)).unwrap();
        Fixture {
            reclaimer: Reclaimer::new(Box::new(driver)),
            device,
            binding: binding(target, Some(atlas), None),
        }
    }

    fn binding(target: TargetId, rgb: Option<TextureId>, index: Option<TextureId>) -> BatchBinding {
        BatchBinding {
            target: DrawTarget {
                target,
                viewport: Viewport {
                    size: Size::new(16, 16),
                },
                flip_y: false,
            },
            textures: SpriteTextures {
                rgb_atlas: rgb,
                index_atlas: index,
                palette: None,
            },
        }
    }

    fn sprite() -> BatchDescriptor {
        BatchDescriptor::new(
            0,
            Rect::new(0, 0, 1, 1),
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Colour::WHITE,
            false,
        )
    }

    #[test]
    fn test_flush_issues_one_instanced_draw() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(64, 3);
        let mut driver = f.reclaimer.driver().unwrap();

        for _ in 0..10 {
            assert_eq!(batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap(), None);
        }
        let report = batch.flush(&mut *driver, &handle).unwrap();

        assert_eq!(report, FlushReport { instances: 10, draw_calls: 1, implicit: false });
        assert_eq!(f.device.instanced_draws(), vec![10]);
        assert!(batch.is_empty());
        assert_eq!(batch.active_index(), 1);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(4, 2);
        let mut driver = f.reclaimer.driver().unwrap();

        assert_eq!(batch.flush(&mut *driver, &handle).unwrap(), FlushReport::default());
        assert_eq!(batch.active_index(), 0);
        assert!(f.device.records().is_empty());
    }

    #[test]
    fn test_full_buffer_flushes_once() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(16384, 3);
        let mut driver = f.reclaimer.driver().unwrap();

        let mut implicit = Vec::new();
        for n in 1..=16385 {
            if let Some(report) = batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap() {
                implicit.push((n, report));
            }
        }

        assert_eq!(
            implicit,
            vec![(16384, FlushReport { instances: 16384, draw_calls: 1, implicit: true })]
        );
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.active_index(), 1);
        assert_eq!(f.device.instanced_draws(), vec![16384]);
        assert_eq!(batch.stats().implicit_flushes, 1);
    }

    #[test]
    fn test_binding_change_flushes_first() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(64, 3);
        let mut driver = f.reclaimer.driver().unwrap();
        let other_target = driver.create_render_target(Size::new(16, 16)).unwrap();
        let other = binding(other_target, f.binding.textures.rgb_atlas, None);

        batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap();
        batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap();
        let report = batch.push(&mut *driver, &handle, other, sprite()).unwrap();

        assert_eq!(report, Some(FlushReport { instances: 2, draw_calls: 1, implicit: true }));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.binding(), Some(other));
    }

    #[test]
    fn test_disjoint_slots_merge() {
        let target = TargetId(7);
        let rgb = binding(target, Some(TextureId(1)), None);
        let index = binding(target, None, Some(TextureId(2)));
        let clash = binding(target, Some(TextureId(3)), None);

        let merged = rgb.merge(&index).unwrap();
        assert_eq!(merged.textures.rgb_atlas, Some(TextureId(1)));
        assert_eq!(merged.textures.index_atlas, Some(TextureId(2)));
        assert_eq!(merged.merge(&clash), None);
    }

    #[test]
    fn test_without_instancing_draws_per_sprite() {
        let f = fixture(Capabilities::BASIC);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(64, 3);
        let mut driver = f.reclaimer.driver().unwrap();

        for _ in 0..5 {
            batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap();
        }
        let report = batch.flush(&mut *driver, &handle).unwrap();

        assert_eq!(report.draw_calls, 5);
        assert!(f.device.instanced_draws().is_empty());
        let sprites = f
            .device
            .records()
            .iter()
            .filter(|r| matches!(r, DrawRecord::Sprite { .. }))
            .count();
        assert_eq!(sprites, 5);
    }

    #[test]
    fn test_ring_wraps() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(1, 3);
        let mut driver = f.reclaimer.driver().unwrap();

        for _ in 0..4 {
            batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap();
        }
        assert_eq!(batch.active_index(), 1);
        assert_eq!(f.device.instanced_draws(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_failed_flush_discards_and_keeps_accepting() {
        let f = fixture(Capabilities::FULL);
        let handle = f.reclaimer.handle();
        let mut batch = BatchAccumulator::new(2, 2);
        let mut driver = f.reclaimer.driver().unwrap();
        let broken = binding(f.binding.target.target, Some(TextureId(999)), None);

        batch.push(&mut *driver, &handle, broken, sprite()).unwrap();
        assert!(batch.push(&mut *driver, &handle, broken, sprite()).is_err());
        assert!(batch.is_empty());
        assert_eq!(batch.binding(), None);
        assert_eq!(batch.stats().discarded, 2);

        assert_eq!(batch.push(&mut *driver, &handle, f.binding, sprite()).unwrap(), None);
        let report = batch.flush(&mut *driver, &handle).unwrap();
        assert_eq!(report.instances, 1);
        assert_eq!(f.device.instanced_draws(), vec![1]);
    }
}
