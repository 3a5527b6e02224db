//! Sprite buffers: one ring element of the batch accumulator.

use super::BatchDescriptor;
use crate::error::DriverResult;
use crate::gpu::{BufferId, GpuDriver};
use crate::reclaim::{GpuOwned, ReclaimHandle};

/// Fixed-capacity descriptor list plus the instance buffer it uploads into.
///
/// The GPU buffer is created on first upload and reused afterwards; its
/// contents are only meaningful between an upload and the paired draw.
#[derive(Debug)]
pub struct SpriteBuffer {
    descriptors: Vec<BatchDescriptor>,
    capacity: usize,
    gpu: Option<GpuOwned<BufferId>>,
}

impl SpriteBuffer {
    /// Empty buffer holding up to `capacity` descriptors.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            descriptors: Vec::with_capacity(capacity),
            capacity,
            gpu: None,
        }
    }

    /// Maximum descriptors.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Descriptors accumulated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// True if nothing is accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// True once `capacity` descriptors are accumulated.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.descriptors.len() >= self.capacity
    }

    /// Accumulated descriptors, in push order.
    #[must_use]
    pub fn descriptors(&self) -> &[BatchDescriptor] {
        &self.descriptors
    }

    /// Appends a descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already full.
    pub fn push(&mut self, descriptor: BatchDescriptor) {
        assert!(!self.is_full(), "sprite buffer overflow");
        self.descriptors.push(descriptor);
    }

    /// Forgets all descriptors, keeping the GPU buffer.
    pub fn clear(&mut self) {
        self.descriptors.clear();
    }

    /// Drops the instance buffer; the next upload creates a fresh one.
    pub(crate) fn release_gpu(&mut self) {
        self.gpu = None;
    }

    /// Uploads the descriptors, creating the instance buffer if needed.
    pub(crate) fn upload(
        &mut self,
        driver: &mut dyn GpuDriver,
        reclaim: &ReclaimHandle,
    ) -> DriverResult<BufferId> {
        let id = match &self.gpu {
            Some(owned) => owned.id(),
            None => {
                let id = driver.create_instance_buffer(self.capacity)?;
                self.gpu = Some(GpuOwned::new(id, reclaim.clone()));
                id
            }
        };
        driver.write_instance_buffer(id, &self.descriptors)?;
        Ok(id)
    }
}
