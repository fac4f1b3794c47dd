//! Media pipe: the queue, its locks and signals, and the shared clock.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadence_core::{Error, MediaBuf, MediaBufKind, MediaQueue, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::clock::AudioClock;
use crate::config::QueueLimits;

/// Shared state between producers, the decode thread, and clock readers.
///
/// Lock order: the pipeline mutex and the clock mutex are never held together
/// by this crate.
#[derive(Debug, Default)]
pub struct MediaPipe {
    /// Pipeline mutex guarding the queue and its counters.
    queue: Mutex<MediaQueue>,
    /// Signalled when units are queued or the pipe closes. Sinks never signal it; a
    /// busy sink is retried on a [`wait_for`](Self::wait_for) timeout.
    avail: Condvar,
    /// Signalled on every dequeue (backpressure release).
    space: Condvar,
    clock: AudioClock,
    limits: QueueLimits,
    closed: AtomicBool,
}

impl MediaPipe {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Lock the pipeline mutex.
    pub fn lock(&self) -> MutexGuard<'_, MediaQueue> {
        self.queue.lock()
    }

    /// Append a unit without checking limits.
    pub fn push(&self, buf: MediaBuf) {
        let mut queue = self.queue.lock();
        trace!("Queue push {:?} ({} bytes)", buf.kind(), buf.size());
        queue.push_back(buf);
        self.avail.notify_all();
    }

    /// Insert a unit at the head of the queue.
    pub fn push_head(&self, buf: MediaBuf) {
        let mut queue = self.queue.lock();
        queue.push_front(buf);
        self.avail.notify_all();
    }

    /// Append a unit, first waiting while the queue is over its limits.
    ///
    /// Returns [`Error::PipeClosed`] if the pipe is closed while waiting.
    pub fn push_blocking(&self, buf: MediaBuf) -> Result<()> {
        let mut queue = self.queue.lock();
        while self.limits.exceeded(queue.bytes(), queue.packets()) {
            if self.is_closed() {
                return Err(Error::PipeClosed);
            }
            self.space.wait(&mut queue);
        }
        if self.is_closed() {
            return Err(Error::PipeClosed);
        }

        queue.push_back(buf);
        self.avail.notify_all();
        Ok(())
    }

    /// Queue a control marker at the tail.
    pub fn send_command(&self, kind: MediaBufKind) -> Result<()> {
        let buf = MediaBuf::control(kind)
            .ok_or_else(|| Error::InvalidArgument(format!("{kind:?} is not a command")))?;
        self.push(buf);
        Ok(())
    }

    /// Queue a control marker ahead of everything already queued.
    pub fn send_command_head(&self, kind: MediaBufKind) -> Result<()> {
        let buf = MediaBuf::control(kind)
            .ok_or_else(|| Error::InvalidArgument(format!("{kind:?} is not a command")))?;
        self.push_head(buf);
        Ok(())
    }

    /// Drop everything queued and queue a single flush marker in its place.
    ///
    /// Returns the number of units dropped.
    pub fn flush(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.clear();
        queue.push_back(MediaBuf::Flush);
        debug!("Flushed {} queued units", dropped);
        self.avail.notify_all();
        self.space.notify_all();
        dropped
    }

    /// Block the consumer until something is pushed or signalled.
    pub fn wait(&self, queue: &mut MutexGuard<'_, MediaQueue>) {
        self.avail.wait(queue);
    }

    /// Like [`wait`](Self::wait), bounded by `timeout`.
    pub fn wait_for(&self, queue: &mut MutexGuard<'_, MediaQueue>, timeout: Duration) {
        let _ = self.avail.wait_for(queue, timeout);
    }

    /// Wake producers blocked on backpressure. Called by the consumer on
    /// every dequeue, with the pipeline mutex held.
    pub fn signal_space_available(&self) {
        self.space.notify_all();
    }

    /// Select the stream whose audio units are decoded.
    pub fn select_stream(&self, stream: u32) {
        self.queue.lock().select_stream(stream);
    }

    /// Summed payload bytes currently queued.
    pub fn buffer_bytes(&self) -> usize {
        self.queue.lock().bytes()
    }

    /// Units currently queued.
    pub fn packets(&self) -> usize {
        self.queue.lock().packets()
    }

    pub const fn clock(&self) -> &AudioClock {
        &self.clock
    }

    pub const fn limits(&self) -> &QueueLimits {
        &self.limits
    }

    /// Close the pipe: blocked and future `push_blocking` calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.queue.lock();
        self.space.notify_all();
        self.avail.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
