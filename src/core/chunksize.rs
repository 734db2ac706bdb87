//! Multipart split sizing
//!
//! Provider limits and the chunksize adjustment that keeps every multipart
//! transfer inside them, plus the byte ranges a transfer is cut into.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Maximum number of parts in one multipart upload
pub const MAX_PARTS: u64 = 10_000;

/// Maximum size of a single PutObject or UploadPart body
pub const MAX_SINGLE_UPLOAD_SIZE: u64 = 5 * GIB;

/// Minimum size of a multipart part (the last part may be smaller)
pub const MIN_UPLOAD_CHUNKSIZE: u64 = 5 * MIB;

/// Maximum size of an object
pub const MAX_UPLOAD_SIZE: u64 = 5 * TIB;

/// Provider limits used for multipart planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
    /// Smallest allowed part size
    pub min_chunksize: u64,
    /// Largest allowed single request body
    pub max_single_object_size: u64,
    /// Largest allowed part count
    pub max_parts: u64,
    /// Largest allowed object
    pub max_object_size: u64,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            min_chunksize: MIN_UPLOAD_CHUNKSIZE,
            max_single_object_size: MAX_SINGLE_UPLOAD_SIZE,
            max_parts: MAX_PARTS,
            max_object_size: MAX_UPLOAD_SIZE,
        }
    }
}

impl TransferLimits {
    /// Validate that the limits describe a usable range
    pub fn validate(&self) -> Result<()> {
        if self.min_chunksize == 0 {
            return Err(TransferError::config("minimum chunksize must be positive"));
        }
        if self.min_chunksize > self.max_single_object_size {
            return Err(TransferError::config(format!(
                "minimum chunksize {} exceeds maximum single object size {}",
                self.min_chunksize, self.max_single_object_size
            )));
        }
        if self.max_parts == 0 {
            return Err(TransferError::config("maximum part count must be positive"));
        }
        if u32::try_from(self.max_parts).is_err() {
            return Err(TransferError::config(format!(
                "maximum part count {} does not fit a part number",
                self.max_parts
            )));
        }
        Ok(())
    }

    /// Compute a valid split size for a transfer.
    ///
    /// The requested size is clamped into `[min_chunksize, max_single_object_size]`.
    /// When `total_size` is known and would need more than `max_parts` parts,
    /// the chunksize grows to `ceil(total_size / max_parts)` and is re-clamped.
    pub fn adjust_chunksize(&self, requested: u64, total_size: Option<u64>) -> u64 {
        let mut chunksize = requested.clamp(self.min_chunksize, self.max_single_object_size);

        if let Some(total) = total_size {
            if part_count(total, chunksize) > self.max_parts {
                chunksize = total.div_ceil(self.max_parts);
                chunksize = chunksize.min(self.max_single_object_size);
            }
        }

        chunksize
    }

    /// Adjusted chunksize for a transfer of `size` bytes and the part count it yields
    pub fn split(&self, requested: u64, size: u64) -> Result<(u32, u64)> {
        let chunksize = self.adjust_chunksize(requested, Some(size));
        let parts = part_count(size, chunksize);
        let parts = u32::try_from(parts).map_err(|_| {
            TransferError::config(format!(
                "{} bytes in chunks of {} need {} parts, more than a part number can hold",
                size, chunksize, parts
            ))
        })?;
        Ok((parts, chunksize))
    }
}

/// Number of parts needed to cover `size` bytes
pub fn part_count(size: u64, chunksize: u64) -> u64 {
    if chunksize == 0 {
        return 0;
    }
    size.div_ceil(chunksize)
}

/// One contiguous byte range of a multipart transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number
    pub number: u32,
    /// First byte offset
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
    /// Whether this is the final part
    pub last: bool,
}

impl PartRange {
    /// Number of bytes covered by the range
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Closed HTTP range header value, `bytes=<start>-<end>`
    pub fn closed_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// HTTP range header value with the final range left open, `bytes=<start>-`
    pub fn open_ended_header(&self) -> String {
        if self.last {
            format!("bytes={}-", self.start)
        } else {
            self.closed_header()
        }
    }
}

/// Byte range of the zero-based part `index` when `size` bytes are cut into `chunksize` pieces.
///
/// `index` must be below [`part_count`].
pub fn part_range(size: u64, chunksize: u64, index: u32) -> PartRange {
    let start = u64::from(index) * chunksize;
    let end = start.saturating_add(chunksize).min(size) - 1;
    PartRange {
        number: index + 1,
        start,
        end,
        last: end + 1 == size,
    }
}
