//! Bounded sample buffer between the decode thread and the device callback.
//!
//! Writes are all-or-nothing so a sink can answer "busy" without splitting a
//! chunk. The device callback only ever `try_lock`s, so it never blocks on the
//! decode thread.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Interleaved f32 samples waiting for the device.
#[derive(Debug)]
pub struct DeviceBuffer {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl DeviceBuffer {
    /// Create a buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Room left, in samples.
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Append all of `samples`, or nothing.
    ///
    /// An empty buffer always takes the chunk, even one larger than the
    /// capacity, so oversized chunks cannot stall the writer.
    pub fn try_write(&self, samples: &[f32]) -> bool {
        let mut buffer = self.samples.lock();
        if !buffer.is_empty() && buffer.len() + samples.len() > self.capacity {
            return false;
        }
        buffer.extend(samples);
        true
    }

    /// Fill `output` from the front. Returns the number of samples read, or
    /// `None` if the writer holds the lock.
    pub fn read(&self, output: &mut [f32]) -> Option<usize> {
        let mut buffer = self.samples.try_lock()?;
        let count = output.len().min(buffer.len());
        for (slot, sample) in output.iter_mut().zip(buffer.drain(..count)) {
            *slot = sample;
        }
        Some(count)
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

/// Buffer shared between a sink and its device callback.
pub type SharedDeviceBuffer = Arc<DeviceBuffer>;

/// Create a new shared device buffer.
pub fn shared_device_buffer(capacity: usize) -> SharedDeviceBuffer {
    Arc::new(DeviceBuffer::new(capacity))
}
