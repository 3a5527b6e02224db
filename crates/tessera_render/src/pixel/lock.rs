//! Scoped pixel access.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::{Pixel, PixelBuffer};

/// Access requested from a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared read access.
    Read,
    /// Exclusive write access. Marks the owner dirty when released.
    Write,
}

enum Guard<'a, P: Pixel> {
    Read(RwLockReadGuard<'a, PixelBuffer<P>>),
    Write(RwLockWriteGuard<'a, PixelBuffer<P>>),
}

/// Scoped access to an image's pixels.
///
/// A write lock bumps the owner's content version when dropped, so the
/// renderer regenerates the GPU copy on the next draw.
pub struct PixelLock<'a, P: Pixel> {
    guard: Guard<'a, P>,
    version: &'a AtomicU64,
}

impl<'a, P: Pixel> PixelLock<'a, P> {
    pub(crate) fn read(guard: RwLockReadGuard<'a, PixelBuffer<P>>, version: &'a AtomicU64) -> Self {
        Self {
            guard: Guard::Read(guard),
            version,
        }
    }

    pub(crate) fn write(
        guard: RwLockWriteGuard<'a, PixelBuffer<P>>,
        version: &'a AtomicU64,
    ) -> Self {
        Self {
            guard: Guard::Write(guard),
            version,
        }
    }

    /// Mode this lock was taken with.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        match self.guard {
            Guard::Read(_) => LockMode::Read,
            Guard::Write(_) => LockMode::Write,
        }
    }

    /// Mutable pixels; `None` for read locks.
    pub fn pixels_mut(&mut self) -> Option<&mut [P]> {
        match &mut self.guard {
            Guard::Read(_) => None,
            Guard::Write(buffer) => Some(buffer.pixels_mut()),
        }
    }

    /// Writes one pixel.
    ///
    /// # Panics
    ///
    /// Panics on a read lock.
    pub fn set(&mut self, x: u32, y: u32, pixel: P) {
        match &mut self.guard {
            Guard::Read(_) => panic!("set() on a read lock"),
            Guard::Write(buffer) => buffer.set(x, y, pixel),
        }
    }

    /// Overwrites every pixel.
    ///
    /// # Panics
    ///
    /// Panics on a read lock.
    pub fn fill(&mut self, pixel: P) {
        match &mut self.guard {
            Guard::Read(_) => panic!("fill() on a read lock"),
            Guard::Write(buffer) => buffer.fill(pixel),
        }
    }
}

impl<P: Pixel> Deref for PixelLock<'_, P> {
    type Target = PixelBuffer<P>;

    fn deref(&self) -> &Self::Target {
        match &self.guard {
            Guard::Read(buffer) => &**buffer,
            Guard::Write(buffer) => &**buffer,
        }
    }
}

impl<P: Pixel> Drop for PixelLock<'_, P> {
    fn drop(&mut self) {
        if let Guard::Write(_) = self.guard {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl<P: Pixel> std::fmt::Debug for PixelLock<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelLock")
            .field("mode", &self.mode())
            .field("size", &self.size())
            .finish()
    }
}
