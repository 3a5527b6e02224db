//! Weak reclaimer handles and owned GPU objects.

use std::sync::Weak;

use tracing::warn;

use super::{Reclaimer, Release};
use crate::gpu::{GpuDriver, GpuObject};

/// Weak reference to a renderer's [`Reclaimer`].
///
/// Held by every GPU-resource owner. Cheap to clone and safe to use from any
/// thread.
#[derive(Debug, Clone, Default)]
pub struct ReclaimHandle(Weak<Reclaimer>);

impl ReclaimHandle {
    pub(crate) fn new(reclaimer: Weak<Reclaimer>) -> Self {
        Self(reclaimer)
    }

    /// True while the renderer is running.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.upgrade().is_some_and(|r| r.is_alive())
    }

    /// Releases `object` through the reclaimer, or logs a leak if it is gone.
    pub fn release(&self, object: GpuObject) -> Release {
        match self.0.upgrade() {
            Some(reclaimer) => reclaimer.release(object),
            None => {
                warn!(?object, "renderer dropped, leaking gpu object");
                Release::Leaked
            }
        }
    }

    /// Runs `f` with the driver if this is the bound thread and the driver is
    /// free. Returns `None` otherwise.
    pub(crate) fn with_driver<R>(&self, f: impl FnOnce(&mut dyn GpuDriver) -> R) -> Option<R> {
        let reclaimer = self.0.upgrade()?;
        let mut driver = reclaimer.try_driver()?;
        Some(f(&mut *driver))
    }

    /// True if both handles point at the same reclaimer.
    #[must_use]
    pub fn same_renderer(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

/// A GPU object released through its reclaimer when dropped.
#[derive(Debug)]
pub struct GpuOwned<I: Copy + Into<GpuObject>> {
    id: I,
    reclaim: ReclaimHandle,
}

impl<I: Copy + Into<GpuObject>> GpuOwned<I> {
    /// Takes ownership of `id`.
    #[must_use]
    pub fn new(id: I, reclaim: ReclaimHandle) -> Self {
        Self { id, reclaim }
    }

    /// The driver handle.
    #[must_use]
    pub fn id(&self) -> I {
        self.id
    }

    /// The reclaimer this object is released through.
    #[must_use]
    pub fn reclaim_handle(&self) -> &ReclaimHandle {
        &self.reclaim
    }
}

impl<I: Copy + Into<GpuObject>> Drop for GpuOwned<I> {
    fn drop(&mut self) {
        self.reclaim.release(self.id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::gpu::{Capabilities, SoftwareDriver, TextureDesc};
    use crate::pixel::PixelFormat;

    #[test]
    fn test_owned_texture_dropped_off_thread_is_queued() {
        let driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(1, 1));
        let device = driver.device();
        let reclaimer = Reclaimer::new(Box::new(driver));
        let id = reclaimer
            .driver()
            .unwrap()
            .create_texture(&TextureDesc::plain(Size::new(2, 2), PixelFormat::Index8))
            .unwrap();
        let owned = GpuOwned::new(id, reclaimer.handle());

        std::thread::spawn(move || drop(owned)).join().unwrap();

        assert!(device.is_live(id.into()));
        assert_eq!(reclaimer.drain_pending().unwrap(), 1);
        assert!(!device.is_live(id.into()));
    }

    #[test]
    fn test_default_handle_is_detached() {
        let handle = ReclaimHandle::default();
        assert!(!handle.is_alive());
        assert!(handle.with_driver(|d| d.capabilities()).is_none());
    }
}
