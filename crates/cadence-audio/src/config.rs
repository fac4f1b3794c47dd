//! Pipeline tuning parameters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Producer-side ceiling on queued media.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueLimits {
    /// Maximum summed payload bytes before producers block.
    pub max_bytes: usize,
    /// Maximum queued units before producers block.
    pub max_packets: usize,
}

impl QueueLimits {
    /// True when a queue holding `bytes` / `packets` is at or over the ceiling.
    pub const fn exceeded(&self, bytes: usize, packets: usize) -> bool {
        bytes >= self.max_bytes || packets >= self.max_packets
    }
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_bytes: 4 * 1024 * 1024,
            max_packets: 256,
        }
    }
}

/// Decode loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Frames handed to the sink per delivery.
    pub samples_per_deliver: usize,
    /// How long to back off when the sink reports it is full.
    pub busy_retry: Duration,
    /// Queue ceiling enforced by producers.
    pub limits: QueueLimits,
    /// Input chunk size of the rate converter, in frames.
    pub resample_chunk_frames: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            samples_per_deliver: 1024,
            busy_retry: Duration::from_millis(10),
            limits: QueueLimits::default(),
            resample_chunk_frames: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.samples_per_deliver, 1024);
        assert_eq!(config.resample_chunk_frames, 1024);
        assert_eq!(config.busy_retry, Duration::from_millis(10));
    }

    #[test]
    fn test_limits_exceeded() {
        let limits = QueueLimits {
            max_bytes: 100,
            max_packets: 4,
        };
        assert!(!limits.exceeded(99, 3));
        assert!(limits.exceeded(100, 0));
        assert!(limits.exceeded(0, 4));
    }
}
