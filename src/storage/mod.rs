//! Object storage module
//!
//! Defines the blocking [`ObjectStore`] interface tasks call into, with a
//! native AWS SDK implementation behind the `native_s3` feature.

mod client;

#[cfg(feature = "native_s3")]
pub mod native_s3;

#[cfg(test)]
pub mod mock;

pub use client::*;

#[cfg(feature = "native_s3")]
pub use native_s3::{NativeS3Client, NativeS3Config};
