//! Configuration module for S3Ferry
//!
//! Provides CLI arguments, the runtime configuration file and per-run
//! transfer parameters.

mod settings;

pub use settings::*;
