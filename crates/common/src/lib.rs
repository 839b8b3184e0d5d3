//! Clipforge Common Utilities
//!
//! Shared infrastructure for all Clipforge crates:
//! - Error taxonomy and result aliases
//! - Timecode conversions shared by the planner and the encoder glue
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod timecode;

pub use config::*;
pub use error::*;
pub use timecode::*;
