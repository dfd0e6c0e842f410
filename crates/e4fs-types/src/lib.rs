#![forbid(unsafe_code)]
//! Shared types for e4fs.
//!
//! Unit-carrying newtypes keep bytes, blocks, groups and inode numbers from
//! being mixed up, and the `read_le_*` helpers give every on-disk decoder a
//! bounds-checked way to pull little-endian fields out of a byte slice.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const EXT4_SUPERBLOCK_OFFSET: usize = 1024;
pub const EXT4_SUPERBLOCK_SIZE: usize = 1024;
pub const EXT4_SUPER_MAGIC: u16 = 0xEF53;

/// Offset of `s_checksum`; the superblock checksum covers every byte before it.
pub const EXT4_SUPERBLOCK_CHECKSUM_OFFSET: usize = 0x3FC;

/// Size of one group descriptor in the 64-bit capable layout.
pub const EXT4_GROUP_DESC_SIZE: usize = 64;

/// Size of the fixed inode record layout (128-byte base plus the extended area).
pub const EXT4_INODE_RECORD_SIZE: usize = 256;

/// Number of entries in `i_block`.
pub const EXT4_N_BLOCKS: usize = 15;
/// Number of direct block pointers in `i_block`.
pub const EXT4_NDIR_BLOCKS: usize = 12;
pub const EXT4_IND_BLOCK: usize = 12;
pub const EXT4_DIND_BLOCK: usize = 13;
pub const EXT4_TIND_BLOCK: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

/// Block group index (ext4: u32 group number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Byte offset into an image.
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

/// Validated block size (must be a power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    /// Create a `BlockSize` if `value` is a power of two in [1024, 65536].
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    /// Derive the block size from `s_log_block_size` (`1024 << log`).
    pub fn from_log(log_block_size: u32) -> Result<Self, ParseError> {
        match log_block_size {
            0..=6 => Self::new(1024 << log_block_size),
            _ => Err(ParseError::InvalidField {
                field: "s_log_block_size",
                reason: "shift above 6",
            }),
        }
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Block size as a `usize`, for sizing buffers.
    pub fn as_usize(self) -> Result<usize, ParseError> {
        usize::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "block_size",
        })
    }

    /// Number of 32-bit block pointers that fit in one block.
    #[must_use]
    pub fn entries_per_block(self) -> u64 {
        u64::from(self.0) / 4
    }

    /// Convert a block number to a byte offset.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<ByteOffset> {
        block.0.checked_mul(u64::from(self.0)).map(ByteOffset)
    }
}

impl ByteOffset {
    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

impl InodeNumber {
    pub const ROOT: Self = Self(2);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

/// Borrow `data[offset..offset + len]`, or report how far short it falls.
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let end = offset.checked_add(len).ok_or(ParseError::InvalidField {
        field: "offset",
        reason: "overflow",
    })?;
    data.get(offset..end).ok_or_else(|| ParseError::InsufficientData {
        needed: len,
        offset,
        actual: data.len().saturating_sub(offset),
    })
}

/// Copy `N` bytes starting at `offset`.
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let mut out = [0_u8; N];
    out.copy_from_slice(ensure_slice(data, offset, N)?);
    Ok(out)
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    read_fixed::<1>(data, offset).map(|[b]| b)
}

pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    read_fixed(data, offset).map(u16::from_le_bytes)
}

pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    read_fixed(data, offset).map(u32::from_le_bytes)
}

/// Decode a NUL-padded label such as `s_volume_name`.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let label = bytes.split(|b| *b == 0).next().unwrap_or_default();
    String::from_utf8_lossy(label).trim().to_owned()
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

macro_rules! display_inner {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }
        )+
    };
}

display_inner!(BlockNumber, InodeNumber, GroupNumber, ByteOffset, BlockSize);

// ── POSIX file mode constants ────────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;

// ── ext4 inode flags (i_flags) ──────────────────────────────────────────────

/// Inode uses extents.
pub const EXT4_EXTENTS_FL: u32 = 0x0008_0000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_helpers() {
        let bytes = [0x34_u8, 0x12, 0x78, 0x56, 0xEF, 0xCD, 0xAB, 0x90];
        assert_eq!(read_u8(&bytes, 1).expect("u8"), 0x12);
        assert_eq!(read_le_u16(&bytes, 0).expect("u16"), 0x1234);
        assert_eq!(read_le_u32(&bytes, 0).expect("u32"), 0x5678_1234);
        assert_eq!(read_le_u32(&bytes, 4).expect("u32"), 0x90AB_CDEF);
        assert_eq!(read_fixed::<3>(&bytes, 5).expect("fixed"), [0xCD, 0xAB, 0x90]);
    }

    #[test]
    fn read_past_end_reports_insufficient_data() {
        let bytes = [0_u8; 6];
        let err = read_le_u32(&bytes, 4).unwrap_err();
        assert_eq!(
            err,
            ParseError::InsufficientData {
                needed: 4,
                offset: 4,
                actual: 2,
            }
        );
        assert!(matches!(
            ensure_slice(&bytes, usize::MAX, 2),
            Err(ParseError::InvalidField {
                field: "offset",
                ..
            })
        ));
    }

    #[test]
    fn block_size_validation() {
        assert!(BlockSize::new(1024).is_ok());
        assert!(BlockSize::new(65536).is_ok());
        assert!(BlockSize::new(512).is_err());
        assert!(BlockSize::new(3000).is_err());
        assert!(BlockSize::new(131_072).is_err());
    }

    #[test]
    fn block_size_from_log_field() {
        assert_eq!(BlockSize::from_log(0).unwrap().get(), 1024);
        assert_eq!(BlockSize::from_log(2).unwrap().get(), 4096);
        assert_eq!(BlockSize::from_log(3).unwrap().get(), 8192);
        assert_eq!(BlockSize::from_log(6).unwrap().get(), 65_536);
        assert!(BlockSize::from_log(7).is_err());
        assert!(BlockSize::from_log(u32::MAX).is_err());
    }

    #[test]
    fn block_size_conversions() {
        let bs = BlockSize::new(4096).unwrap();
        assert_eq!(bs.entries_per_block(), 1024);
        assert_eq!(bs.block_to_byte(BlockNumber(3)), Some(ByteOffset(12_288)));
        assert_eq!(bs.block_to_byte(BlockNumber(u64::MAX)), None);
    }

    #[test]
    fn trim_nul_padded_stops_at_first_nul() {
        assert_eq!(trim_nul_padded(b"root\0\0junk"), "root");
        assert_eq!(trim_nul_padded(b"\0\0\0"), "");
        assert_eq!(trim_nul_padded(b"full"), "full");
    }

    #[test]
    fn display_newtypes() {
        assert_eq!(BlockNumber(7).to_string(), "7");
        assert_eq!(InodeNumber::ROOT.to_string(), "2");
        assert_eq!(GroupNumber(3).to_string(), "3");
        assert_eq!(ByteOffset(1024).to_string(), "1024");
        assert_eq!(BlockSize::new(4096).unwrap().to_string(), "4096");
    }
}
