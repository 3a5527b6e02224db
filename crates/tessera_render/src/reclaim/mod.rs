//! # Deferred GPU Resource Reclaimer
//!
//! GPU objects may only be created and destroyed on the thread that built the
//! renderer (the *bound thread*). Their owners, however, are plain `Send +
//! Sync` images that can be dropped anywhere.
//!
//! The reclaimer owns the driver and sits between the two:
//!
//! - a release on the bound thread deletes the object immediately, unless the
//!   renderer is mid-call and holds the driver, in which case it is queued
//! - a release on any other thread is always queued
//! - [`Reclaimer::drain_pending`] deletes everything queued, bound thread only
//!
//! Owners reach the reclaimer through a [`ReclaimHandle`] (a weak reference).
//! Once the renderer is gone the handle no longer upgrades and releases are
//! logged as leaks instead of touching a dead context.

mod handle;

pub use handle::{GpuOwned, ReclaimHandle};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuDriver, GpuObject};

/// Exclusive access to the driver, held for the duration of one renderer call.
pub type DriverGuard<'a> = MappedMutexGuard<'a, dyn GpuDriver>;

/// What happened to a released object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Deleted on the spot.
    Deleted,
    /// Queued for the next drain.
    Queued,
    /// The renderer is gone; the object was not deleted.
    Leaked,
}

/// Reclaimer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Objects deleted at release time.
    pub deleted: u64,
    /// Objects queued for a later drain.
    pub queued: u64,
    /// Queued objects deleted by drains.
    pub drained: u64,
    /// Objects released after teardown.
    pub leaked: u64,
}

/// Owns the driver and serialises every deletion onto the bound thread.
pub struct Reclaimer {
    bound_thread: ThreadId,
    alive: AtomicBool,
    driver: Mutex<Option<Box<dyn GpuDriver>>>,
    pending: Mutex<Vec<GpuObject>>,
    deleted: AtomicU64,
    queued: AtomicU64,
    drained: AtomicU64,
    leaked: AtomicU64,
}

impl Reclaimer {
    /// Takes ownership of `driver`, binding to the calling thread.
    #[must_use]
    pub fn new(driver: Box<dyn GpuDriver>) -> Arc<Self> {
        Arc::new(Self {
            bound_thread: thread::current().id(),
            alive: AtomicBool::new(true),
            driver: Mutex::new(Some(driver)),
            pending: Mutex::new(Vec::new()),
            deleted: AtomicU64::new(0),
            queued: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            leaked: AtomicU64::new(0),
        })
    }

    /// Weak handle for resource owners.
    #[must_use]
    pub fn handle(self: &Arc<Self>) -> ReclaimHandle {
        ReclaimHandle::new(Arc::downgrade(self))
    }

    /// True on the thread that created this reclaimer.
    #[must_use]
    pub fn is_bound_thread(&self) -> bool {
        thread::current().id() == self.bound_thread
    }

    /// False once [`Reclaimer::shutdown`] has run.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Releases a GPU object.
    ///
    /// Never deletes immediately off the bound thread.
    pub fn release(&self, object: GpuObject) -> Release {
        if !self.is_alive() {
            self.leaked.fetch_add(1, Ordering::Relaxed);
            warn!(?object, "renderer shut down, leaking gpu object");
            return Release::Leaked;
        }

        if self.is_bound_thread() {
            if let Some(mut guard) = self.driver.try_lock() {
                if let Some(driver) = guard.as_deref_mut() {
                    driver.delete(object);
                    self.deleted.fetch_add(1, Ordering::Relaxed);
                    return Release::Deleted;
                }
            }
        }

        self.pending.lock().push(object);
        self.queued.fetch_add(1, Ordering::Relaxed);
        trace!(?object, "queued gpu object for deletion");
        Release::Queued
    }

    /// Number of objects waiting for a drain.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deletes every queued object and returns how many there were.
    ///
    /// # Errors
    ///
    /// [`RenderError::WrongThread`] off the bound thread, or
    /// [`RenderError::RendererGone`] after shutdown.
    pub fn drain_pending(&self) -> RenderResult<usize> {
        let mut driver = self.driver()?;
        Ok(self.drain_with(&mut *driver))
    }

    /// Drains using a driver the caller already holds.
    pub(crate) fn drain_with(&self, driver: &mut dyn GpuDriver) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        for object in &pending {
            driver.delete(*object);
        }
        let count = pending.len();
        if count > 0 {
            self.drained.fetch_add(count as u64, Ordering::Relaxed);
            debug!(count, "drained pending gpu deletions");
        }
        count
    }

    /// Locks the driver for a renderer call.
    ///
    /// While the guard is held, releases on the bound thread are queued.
    ///
    /// # Errors
    ///
    /// [`RenderError::WrongThread`] off the bound thread, or
    /// [`RenderError::RendererGone`] after shutdown.
    pub fn driver(&self) -> RenderResult<DriverGuard<'_>> {
        if !self.is_bound_thread() {
            return Err(RenderError::WrongThread);
        }
        MutexGuard::try_map(self.driver.lock(), |driver| driver.as_deref_mut())
            .map_err(|_| RenderError::RendererGone)
    }

    /// Like [`Reclaimer::driver`], but `None` when the driver is already held.
    pub(crate) fn try_driver(&self) -> Option<DriverGuard<'_>> {
        if !self.is_bound_thread() {
            return None;
        }
        let guard = self.driver.try_lock()?;
        MutexGuard::try_map(guard, |driver| driver.as_deref_mut()).ok()
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            deleted: self.deleted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            leaked: self.leaked.load(Ordering::Relaxed),
        }
    }

    /// Marks the renderer dead, drains the queue and drops the driver.
    ///
    /// Idempotent. Later releases are logged as leaks.
    ///
    /// # Errors
    ///
    /// [`RenderError::WrongThread`] off the bound thread; nothing is changed.
    pub fn shutdown(&self) -> RenderResult<()> {
        if !self.is_bound_thread() {
            return Err(RenderError::WrongThread);
        }
        self.alive.store(false, Ordering::Release);
        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            self.drain_with(&mut *driver);
            debug!(backend = driver.name(), "gpu driver released");
        }
        Ok(())
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().len();
        if pending > 0 {
            warn!(count = pending, "gpu objects still queued at teardown were leaked");
        }
    }
}

impl std::fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reclaimer")
            .field("bound_thread", &self.bound_thread)
            .field("alive", &self.is_alive())
            .field("pending", &self.pending_len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::gpu::{Capabilities, SoftwareDevice, SoftwareDriver, TextureDesc, TextureId};
    use crate::pixel::PixelFormat;

    fn setup() -> (Arc<Reclaimer>, SoftwareDevice) {
        let driver = SoftwareDriver::new("software", Capabilities::FULL, Size::new(4, 4));
        let device = driver.device();
        (Reclaimer::new(Box::new(driver)), device)
    }

    fn texture(reclaimer: &Reclaimer) -> TextureId {
        reclaimer
            .driver()
            .unwrap()
            .create_texture(&TextureDesc::plain(Size::new(4, 4), PixelFormat::Rgba8))
            .unwrap()
    }

    #[test]
    fn test_release_on_bound_thread_deletes() {
        let (reclaimer, device) = setup();
        let id = texture(&reclaimer);

        assert_eq!(reclaimer.release(id.into()), Release::Deleted);
        assert!(!device.is_live(id.into()));
        assert_eq!(reclaimer.stats().deleted, 1);
    }

    #[test]
    fn test_release_while_driver_held_is_queued() {
        let (reclaimer, device) = setup();
        let id = texture(&reclaimer);

        {
            let _guard = reclaimer.driver().unwrap();
            assert_eq!(reclaimer.release(id.into()), Release::Queued);
        }
        assert!(device.is_live(id.into()));
        assert_eq!(reclaimer.drain_pending().unwrap(), 1);
        assert!(!device.is_live(id.into()));
    }

    #[test]
    fn test_off_thread_release_never_deletes() {
        let (reclaimer, device) = setup();
        let ids: Vec<_> = (0..8).map(|_| texture(&reclaimer)).collect();

        thread::scope(|s| {
            for id in &ids {
                let reclaimer = &reclaimer;
                s.spawn(move || {
                    assert_eq!(reclaimer.release((*id).into()), Release::Queued);
                });
            }
        });

        assert_eq!(reclaimer.pending_len(), 8);
        assert!(ids.iter().all(|id| device.is_live((*id).into())));
        assert!(device.deleted().is_empty());

        assert_eq!(reclaimer.drain_pending().unwrap(), 8);
        assert_eq!(reclaimer.pending_len(), 0);
        assert_eq!(device.deleted().len(), 8);
    }

    #[test]
    fn test_drain_and_driver_refused_off_thread() {
        let (reclaimer, _device) = setup();

        thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(reclaimer.drain_pending(), Err(RenderError::WrongThread)));
                assert!(matches!(reclaimer.driver(), Err(RenderError::WrongThread)));
                assert!(reclaimer.try_driver().is_none());
            });
        });
    }

    #[test]
    fn test_shutdown_drains_then_leaks() {
        let (reclaimer, device) = setup();
        let queued = texture(&reclaimer);
        let late = texture(&reclaimer);

        thread::scope(|s| {
            s.spawn(|| {
                reclaimer.release(queued.into());
            });
        });
        reclaimer.shutdown().unwrap();

        assert!(!device.is_live(queued.into()));
        assert_eq!(reclaimer.release(late.into()), Release::Leaked);
        assert!(device.is_live(late.into()));
        assert_eq!(reclaimer.stats().leaked, 1);
        assert!(matches!(reclaimer.driver(), Err(RenderError::RendererGone)));
    }

    #[test]
    fn test_handle_leaks_after_reclaimer_dropped() {
        let (reclaimer, device) = setup();
        let id = texture(&reclaimer);
        let handle = reclaimer.handle();
        reclaimer.shutdown().unwrap();
        drop(reclaimer);

        assert!(!handle.is_alive());
        assert_eq!(handle.release(id.into()), Release::Leaked);
        assert!(device.is_live(id.into()));
    }
}
