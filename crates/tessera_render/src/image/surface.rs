//! Render-target-backed images.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::RenderResult;
use crate::geometry::Size;
use crate::gpu::{GpuDriver, TargetId};
use crate::pixel::{LockMode, PixelBuffer, PixelLock, Rgba8};
use crate::reclaim::{GpuOwned, ReclaimHandle};

/// The render target behind a surface.
#[derive(Debug)]
pub(crate) enum SurfaceTarget {
    /// An offscreen target released with the surface.
    Owned(GpuOwned<TargetId>),
    /// The driver's default framebuffer; never deleted.
    Screen {
        id: TargetId,
        reclaim: ReclaimHandle,
    },
}

impl SurfaceTarget {
    pub(crate) fn id(&self) -> TargetId {
        match self {
            Self::Owned(owned) => owned.id(),
            Self::Screen { id, .. } => *id,
        }
    }

    /// The default framebuffer stores rows bottom-up.
    pub(crate) fn flip_y(&self) -> bool {
        matches!(self, Self::Screen { .. })
    }

    pub(crate) fn reclaim(&self) -> &ReclaimHandle {
        match self {
            Self::Owned(owned) => owned.reclaim_handle(),
            Self::Screen { reclaim, .. } => reclaim,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SurfaceGpu {
    target: Option<SurfaceTarget>,
    /// CPU version last copied into the target.
    uploaded_version: Option<u64>,
    /// The target holds draws the CPU copy has not seen.
    gpu_newer: bool,
}

#[derive(Debug)]
pub(crate) struct SurfaceInner {
    pixels: RwLock<PixelBuffer<Rgba8>>,
    version: AtomicU64,
    gpu: Mutex<SurfaceGpu>,
}

impl SurfaceInner {
    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Pulls GPU contents into the CPU copy when they are newer.
    fn read_back(&self) {
        let mut gpu = self.gpu.lock();
        if !gpu.gpu_newer {
            return;
        }
        let Some(target) = gpu.target.as_ref() else {
            return;
        };
        let (id, flip_y) = (target.id(), target.flip_y());
        let mut pixels = self.pixels.write();
        let result = target
            .reclaim()
            .with_driver(|driver| driver.read_target(id, flip_y, pixels.as_bytes_mut()));
        match result {
            Some(Ok(())) => {
                gpu.gpu_newer = false;
                gpu.uploaded_version = Some(self.version());
                debug!(target = id.0, "surface read back");
            }
            Some(Err(err)) => warn!(%err, "surface read-back failed, returning stale pixels"),
            None => warn!("surface read-back needs the renderer thread, returning stale pixels"),
        }
    }

    /// Makes the target current with the CPU copy, creating it if needed.
    ///
    /// Must be called on the bound thread with the driver held.
    pub(crate) fn prepare_target(
        &self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
    ) -> RenderResult<TargetId> {
        let mut gpu = self.gpu.lock();
        let (id, flip_y) = match gpu.target.as_ref() {
            Some(target) if target.reclaim().same_renderer(reclaim) => {
                (target.id(), target.flip_y())
            }
            _ => {
                let id = driver.create_render_target(self.pixels.read().size())?;
                gpu.target = Some(SurfaceTarget::Owned(GpuOwned::new(id, reclaim.clone())));
                gpu.uploaded_version = None;
                gpu.gpu_newer = false;
                (id, false)
            }
        };

        let version = self.version();
        if gpu.uploaded_version != Some(version) {
            if gpu.gpu_newer {
                warn!(target = id.0, "surface written without read-back, gpu draws discarded");
            }
            driver.upload_target(id, flip_y, self.pixels.read().as_bytes())?;
            gpu.uploaded_version = Some(version);
            gpu.gpu_newer = false;
        }
        Ok(id)
    }

    /// Binds the driver's default framebuffer as this surface's target.
    pub(crate) fn bind_screen(&self, id: TargetId, reclaim: ReclaimHandle) {
        let mut gpu = self.gpu.lock();
        gpu.target = Some(SurfaceTarget::Screen { id, reclaim });
        gpu.uploaded_version = None;
        gpu.gpu_newer = false;
    }

    /// Records that the target now holds content the CPU copy lacks.
    pub(crate) fn mark_gpu_newer(&self) {
        self.gpu.lock().gpu_newer = true;
    }
}

/// An RGBA image backed by a render target.
///
/// Draws can land in a surface (see [`crate::Renderer::set_surface`]) and a
/// surface can itself be drawn. Locking a surface first copies newer GPU
/// contents back, provided the lock is taken on the renderer's thread;
/// elsewhere the last CPU copy is returned and a warning logged.
///
/// Sprites still waiting in a batch are not part of the GPU contents until
/// the renderer flushes.
#[derive(Debug, Clone)]
pub struct Surface {
    inner: Arc<SurfaceInner>,
}

impl Surface {
    /// Creates a transparent surface.
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self::from_buffer(PixelBuffer::new(size))
    }

    /// Creates a surface from existing pixels.
    #[must_use]
    pub fn from_buffer(buffer: PixelBuffer<Rgba8>) -> Self {
        Self {
            inner: Arc::new(SurfaceInner {
                pixels: RwLock::new(buffer),
                version: AtomicU64::new(0),
                gpu: Mutex::new(SurfaceGpu::default()),
            }),
        }
    }

    /// Surface dimensions.
    #[must_use]
    pub fn size(&self) -> Size {
        self.inner.pixels.read().size()
    }

    /// Content version of the CPU copy.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    /// Acquires scoped access to the pixels, reading back GPU contents first.
    #[must_use]
    pub fn lock(&self, mode: LockMode) -> PixelLock<'_, Rgba8> {
        self.inner.read_back();
        match mode {
            LockMode::Read => PixelLock::read(self.inner.pixels.read(), &self.inner.version),
            LockMode::Write => PixelLock::write(self.inner.pixels.write(), &self.inner.version),
        }
    }

    /// True if both handles refer to the same surface.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn inner(&self) -> &SurfaceInner {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{Capabilities, GpuObject, SoftwareDriver};
    use crate::reclaim::Reclaimer;

    #[test]
    fn test_detached_surface_locks_cpu_copy() {
        let surface = Surface::new(Size::new(2, 2));
        surface.lock(LockMode::Write).fill(Rgba8::WHITE);
        assert_eq!(surface.lock(LockMode::Read).get(1, 1), Some(Rgba8::WHITE));
        assert_eq!(surface.version(), 1);
    }

    #[test]
    fn test_prepare_target_uploads_then_reads_back() {
        let driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(4, 4));
        let device = driver.device();
        let reclaimer = Reclaimer::new(Box::new(driver));
        let handle = reclaimer.handle();

        let pixels: Vec<Rgba8> = (0..4).map(|i| Rgba8::new(i, 2 * i, 3 * i, 255)).collect();
        let buffer = PixelBuffer::from_pixels(Size::new(2, 2), pixels.clone());
        let surface = Surface::from_buffer(buffer);

        let id = {
            let mut guard = reclaimer.driver().unwrap();
            surface.inner().prepare_target(&mut *guard, &handle).unwrap()
        };
        assert_eq!(device.target_pixels(id).unwrap(), pixels);

        surface.inner().mark_gpu_newer();
        assert_eq!(surface.lock(LockMode::Read).pixels(), pixels.as_slice());
        assert_eq!(surface.version(), 0);
    }

    #[test]
    fn test_read_back_off_thread_is_stale() {
        let driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(4, 4));
        let device = driver.device();
        let reclaimer = Reclaimer::new(Box::new(driver));
        let handle = reclaimer.handle();
        let surface = Surface::new(Size::new(1, 1));
        let id = {
            let mut guard = reclaimer.driver().unwrap();
            let id = surface.inner().prepare_target(&mut *guard, &handle).unwrap();
            guard.clear(id, Rgba8::WHITE).unwrap();
            id
        };
        surface.inner().mark_gpu_newer();

        let remote = surface.clone();
        let seen = std::thread::spawn(move || {
            let lock = remote.lock(LockMode::Read);
            lock.get(0, 0)
        })
        .join()
        .unwrap();
        assert_eq!(seen, Some(Rgba8::TRANSPARENT));

        assert_eq!(surface.lock(LockMode::Read).get(0, 0), Some(Rgba8::WHITE));
        drop(surface);
        assert_eq!(reclaimer.pending_len(), 0);
        assert!(!device.is_live(GpuObject::Target(id)));
    }
}
