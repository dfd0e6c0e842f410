#![forbid(unsafe_code)]
//! Error types for e4fs.
//!
//! # Error Taxonomy
//!
//! e4fs uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e4fs-types` | On-disk format violations detected while decoding bytes |
//! | Runtime | `E4Error` | `e4fs-error` (this crate) | Errors returned by the filesystem handle and the CLI |
//!
//! `e4fs-error` does not depend on `e4fs-types`; `ParseError` is converted at
//! the boundary where the byte range that failed is known (`e4fs-core`).
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | `Io` | open, seek or read failed, including short reads past the image end |
//! | `CorruptFilesystem` | no valid superblock (primary or backup), or unusable geometry |
//! | `InvalidArgument` | inode number or block group outside the image's bounds |
//! | `OutOfRange` | logical block index beyond triple-indirect addressing |
//! | `HoleNotSupported` | a logical block maps to an unallocated (zero) pointer |
//! | `Parse` | decoding failed on bytes that were read successfully |

use thiserror::Error;

/// Unified error type for all e4fs operations.
#[derive(Debug, Error)]
pub enum E4Error {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No usable superblock could be found, or its geometry cannot be used.
    #[error("corrupt filesystem: {0}")]
    CorruptFilesystem(String),

    /// A caller-supplied inode number or group index is outside the image.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The logical block index cannot be addressed through `i_block`.
    #[error("logical block {logical} is beyond the indirect addressing range")]
    OutOfRange { logical: u64 },

    /// The logical block maps to an unallocated pointer.
    ///
    /// Sparse regions are not materialised as zero-filled blocks.
    #[error("logical block {logical} is not allocated (sparse files are not supported)")]
    HoleNotSupported { logical: u64 },

    /// Parse-layer error surfaced to the caller.
    #[error("parse error: {0}")]
    Parse(String),
}

impl E4Error {
    /// Whether this error means the image cannot be used at all.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CorruptFilesystem(_))
    }
}

/// Result alias using `E4Error`.
pub type Result<T> = std::result::Result<T, E4Error>;
