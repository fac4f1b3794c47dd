//! Media queue with packet and byte accounting.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::VecDeque;

use super::media_buf::{MediaBuf, MediaBufKind};

/// FIFO of pending units.
///
/// `bytes()` always equals the summed payload size of the queued audio units;
/// every mutation updates the counters in the same call. Synchronization is the
/// owner's job: the pipe keeps this behind its pipeline mutex.
#[derive(Debug, Default)]
pub struct MediaQueue {
    items: VecDeque<MediaBuf>,
    packets_current: usize,
    bytes_current: usize,
    /// Currently selected stream; audio units of other streams are dropped.
    stream: u32,
}

impl MediaQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit at the tail.
    pub fn push_back(&mut self, buf: MediaBuf) {
        self.account_in(&buf);
        self.items.push_back(buf);
    }

    /// Insert a unit at the head (partial reinsertion, urgent commands).
    pub fn push_front(&mut self, buf: MediaBuf) {
        self.account_in(&buf);
        self.items.push_front(buf);
    }

    /// Remove and return the head unit.
    pub fn pop_front(&mut self) -> Option<MediaBuf> {
        let buf = self.items.pop_front()?;
        self.packets_current -= 1;
        self.bytes_current -= buf.size();
        Some(buf)
    }

    /// Peek at the head unit.
    pub fn front(&self) -> Option<&MediaBuf> {
        self.items.front()
    }

    /// Kind of the head unit.
    pub fn front_kind(&self) -> Option<MediaBufKind> {
        self.items.front().map(MediaBuf::kind)
    }

    /// Number of queued units, control markers included.
    pub const fn packets(&self) -> usize {
        self.packets_current
    }

    /// Summed payload bytes of queued audio units.
    pub const fn bytes(&self) -> usize {
        self.bytes_current
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn selected_stream(&self) -> u32 {
        self.stream
    }

    pub fn select_stream(&mut self, stream: u32) {
        self.stream = stream;
    }

    /// Drop every queued unit. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        self.packets_current = 0;
        self.bytes_current = 0;
        dropped
    }

    fn account_in(&mut self, buf: &MediaBuf) {
        self.packets_current += 1;
        self.bytes_current += buf.size();
    }
}
