//! Stateful decoder capability shared between producers and the decode thread.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

use super::frame::DecodedFrame;
use crate::Result;

/// Outcome of a single decode step.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    /// Input bytes consumed by this step.
    pub consumed: usize,
    /// Frame produced by this step, if any.
    pub frame: Option<DecodedFrame>,
}

impl DecodeOutput {
    pub const fn new(consumed: usize, frame: Option<DecodedFrame>) -> Self {
        Self { consumed, frame }
    }
}

/// A stateful codec instance.
///
/// `decode` may consume fewer bytes than it was given; the caller re-feeds the
/// remainder on the next step.
pub trait Decoder: Send {
    /// Decode from the unconsumed part of a unit's payload.
    fn decode(&mut self, data: &[u8]) -> Result<DecodeOutput>;

    /// Drop any internal state (called on flush).
    fn reset(&mut self);

    /// Release codec resources. Called once when the decode thread exits.
    fn finalize(&mut self);
}

/// Shared handle to a codec instance carried by every unit of a stream.
#[derive(Clone)]
pub struct CodecHandle(Arc<Mutex<Box<dyn Decoder>>>);

impl CodecHandle {
    pub fn new(decoder: impl Decoder + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(decoder))))
    }

    /// Lock the codec for a decode step.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Decoder>> {
        self.0.lock()
    }

    /// True if both handles refer to the same codec instance.
    pub fn same_codec(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for CodecHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CodecHandle")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Decoder for Passthrough {
        fn decode(&mut self, data: &[u8]) -> Result<DecodeOutput> {
            Ok(DecodeOutput::new(data.len(), None))
        }

        fn reset(&mut self) {}

        fn finalize(&mut self) {}
    }

    #[test]
    fn test_same_codec() {
        let a = CodecHandle::new(Passthrough);
        let b = a.clone();
        let c = CodecHandle::new(Passthrough);

        assert!(a.same_codec(&b));
        assert!(!a.same_codec(&c));
    }

    #[test]
    fn test_decode_through_handle() {
        let handle = CodecHandle::new(Passthrough);
        let out = handle.lock().decode(&[1, 2, 3]);
        assert!(matches!(out, Ok(DecodeOutput { consumed: 3, frame: None })));
    }
}
