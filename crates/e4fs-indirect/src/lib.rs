#![forbid(unsafe_code)]
//! Legacy block mapping: logical block to physical block resolution.
//!
//! Resolves a file-relative block index through the inode's `i_block`
//! array: twelve direct pointers, then one single-, one double- and one
//! triple-indirect pointer. Each indirect block is an array of
//! `block_size / 4` little-endian 32-bit block numbers.
//!
//! Unallocated pointers are reported as holes rather than materialised as
//! zero-filled blocks.

use e4fs_error::{E4Error, Result};
use e4fs_types::{
    BlockNumber, BlockSize, EXT4_DIND_BLOCK, EXT4_IND_BLOCK, EXT4_N_BLOCKS, EXT4_NDIR_BLOCKS,
    EXT4_TIND_BLOCK, read_le_u32, u64_to_usize,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

const NDIR: u64 = EXT4_NDIR_BLOCKS as u64;

/// How many indirect blocks sit between `i_block` and the data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressingLevel {
    Direct,
    Single,
    Double,
    Triple,
}

impl AddressingLevel {
    /// Number of indirect blocks read before reaching the data block.
    #[must_use]
    pub fn depth(self) -> u32 {
        match self {
            Self::Direct => 0,
            Self::Single => 1,
            Self::Double => 2,
            Self::Triple => 3,
        }
    }

    /// First logical block covered by this level.
    #[must_use]
    pub fn first_logical(self, block_size: BlockSize) -> u64 {
        let epb = block_size.entries_per_block();
        match self {
            Self::Direct => 0,
            Self::Single => NDIR,
            Self::Double => NDIR + epb,
            Self::Triple => NDIR + epb + epb * epb,
        }
    }
}

/// Number of logical blocks reachable through `i_block`.
#[must_use]
pub fn max_addressable_blocks(block_size: BlockSize) -> u64 {
    let epb = block_size.entries_per_block();
    NDIR + epb + epb * epb + epb * epb * epb
}

/// Classify `logical` by the indirection needed to reach it.
///
/// Returns `None` once the triple-indirect range is exhausted.
#[must_use]
pub fn resolve_addressing_level(logical: u64, block_size: BlockSize) -> Option<AddressingLevel> {
    if logical < NDIR {
        return Some(AddressingLevel::Direct);
    }

    let epb = block_size.entries_per_block();
    let mut rel = logical - NDIR;
    if rel < epb {
        return Some(AddressingLevel::Single);
    }

    let epb2 = epb * epb;
    rel -= epb;
    if rel < epb2 {
        return Some(AddressingLevel::Double);
    }

    let epb3 = epb2 * epb;
    rel -= epb2;
    if rel < epb3 {
        return Some(AddressingLevel::Triple);
    }

    None
}

/// Where a logical block lives: the `i_block` slot to start from and the
/// entry index to follow in each indirect block, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectPath {
    pub level: AddressingLevel,
    pub slot: usize,
    pub indices: Vec<u64>,
}

/// Compute the lookup path for `logical`.
///
/// For the outermost indirect block the index is `logical - 12` (single),
/// `(logical - 12 - epb) / epb` (double) or
/// `(logical - 12 - epb - epb²) / epb²` (triple); inner levels take the
/// remainder modulo `epb`.
pub fn indirect_path(logical: u64, block_size: BlockSize) -> Result<IndirectPath> {
    let level =
        resolve_addressing_level(logical, block_size).ok_or(E4Error::OutOfRange { logical })?;

    let slot = match level {
        AddressingLevel::Direct => {
            return Ok(IndirectPath {
                level,
                slot: u64_to_usize(logical, "logical_block")
                    .map_err(|e| E4Error::Parse(e.to_string()))?,
                indices: Vec::new(),
            });
        }
        AddressingLevel::Single => EXT4_IND_BLOCK,
        AddressingLevel::Double => EXT4_DIND_BLOCK,
        AddressingLevel::Triple => EXT4_TIND_BLOCK,
    };

    let epb = block_size.entries_per_block();
    let rel = logical - level.first_logical(block_size);
    let indices = (0..level.depth())
        .rev()
        .map(|d| (rel / epb.pow(d)) % epb)
        .collect();

    Ok(IndirectPath {
        level,
        slot,
        indices,
    })
}

/// Translate `logical` into a physical block number.
///
/// `read_block` fetches an indirect block by physical number. A zero pointer
/// at any step, including the `i_block` slot itself, fails with
/// `HoleNotSupported`.
pub fn map_logical_block(
    i_block: &[u32; EXT4_N_BLOCKS],
    block_size: BlockSize,
    logical: u64,
    read_block: &mut dyn FnMut(BlockNumber) -> Result<Vec<u8>>,
) -> Result<BlockNumber> {
    let path = indirect_path(logical, block_size)?;
    let epb = block_size.entries_per_block();

    let mut ptr = i_block[path.slot];
    if ptr == 0 {
        return Err(E4Error::HoleNotSupported { logical });
    }

    for &index in &path.indices {
        let table = read_block(BlockNumber(u64::from(ptr)))?;
        if index >= epb {
            return Err(E4Error::HoleNotSupported { logical });
        }
        let offset = u64_to_usize(index * 4, "indirect_index")
            .map_err(|e| E4Error::Parse(e.to_string()))?;
        let entry = read_le_u32(&table, offset).map_err(|e| {
            E4Error::Parse(format!("indirect block {ptr} for logical block {logical}: {e}"))
        })?;
        trace!(logical, indirect = ptr, index, entry, "indirect step");
        if entry == 0 {
            return Err(E4Error::HoleNotSupported { logical });
        }
        ptr = entry;
    }

    Ok(BlockNumber(u64::from(ptr)))
}
