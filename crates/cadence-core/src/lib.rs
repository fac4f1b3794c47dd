//! # cadence-core
//!
//! Core types, traits, and error handling for the Cadence audio pipeline.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
