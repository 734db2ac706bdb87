//! # S3Ferry - Bulk Object-Storage Transfers
//!
//! S3Ferry runs uploads, downloads, copies, moves and deletes against
//! S3-compatible object storage on a bounded pool of worker threads.
//!
//! ## Features
//!
//! - **Task Pool**: every logical transfer is split into atomic tasks that
//!   share one bounded, stable-priority queue
//! - **Multipart Transfers**: large objects are cut into parts that complete
//!   in any order; a failed multipart upload is always aborted exactly once
//! - **Chunksize Adjustment**: split sizes stay inside provider limits
//! - **Moves**: the source is deleted only after the transfer succeeded
//! - **Streaming**: stdin uploads and stdout downloads
//!
//! ## Quick Start
//!
//! ```no_run
//! # #[cfg(feature = "native_s3")]
//! # fn main() -> s3ferry::Result<()> {
//! use s3ferry::config::{RuntimeConfig, TransferParams};
//! use s3ferry::storage::{NativeS3Client, NativeS3Config};
//! use s3ferry::transfer::{TransferHandler, TransferRecord};
//! use std::sync::Arc;
//!
//! let client = Arc::new(NativeS3Client::new(NativeS3Config::default())?);
//! let handler = TransferHandler::new(client, RuntimeConfig::default(), TransferParams::default())?;
//!
//! let result = handler.call([
//!     TransferRecord::upload("report.pdf", "mybucket/reports/report.pdf").with_size(1024),
//! ]);
//! result.print_summary();
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native_s3"))]
//! # fn main() {}
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod fs;
pub mod progress;
pub mod storage;
pub mod transfer;

// Re-export commonly used types
pub use config::{RuntimeConfig, TransferParams};
pub use core::{RunResult, TransferLimits};
pub use error::{Result, TransferError};
pub use transfer::{StreamTransferHandler, TransferHandler, TransferRecord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use s3ferry::prelude::*;
    //! ```

    pub use crate::config::{RuntimeConfig, TransferParams};
    pub use crate::core::{RunResult, TransferLimits};
    pub use crate::error::{Result, TransferError};
    pub use crate::storage::ObjectStore;
    pub use crate::transfer::{Location, OperationKind, StreamTransferHandler, TransferHandler, TransferRecord};
}
