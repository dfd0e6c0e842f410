#![forbid(unsafe_code)]
//! Superblock location with backup recovery.

use crate::OpenOptions;
use e4fs_block::{ByteDevice, read_superblock_region_at};
use e4fs_error::{E4Error, Result};
use e4fs_ondisk::{
    BACKUP_SUPERBLOCK_CANDIDATES, BACKUP_SUPERBLOCK_GROUPS, Ext4Superblock,
    validate_superblock_region,
};
use e4fs_types::{ByteOffset, EXT4_SUPERBLOCK_OFFSET, EXT4_SUPERBLOCK_SIZE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Largest offset a seek can reach.
const MAX_SEEKABLE_OFFSET: u64 = i64::MAX.unsigned_abs();

/// Where the superblock in use was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SuperblockSource {
    /// Byte 1024 of the image.
    Primary,
    /// A backup copy in a sparse-super group.
    Backup {
        group: u32,
        block: u64,
        block_size: u32,
        offset: u64,
    },
}

impl SuperblockSource {
    /// Byte offset of the superblock record.
    #[must_use]
    pub fn byte_offset(self) -> ByteOffset {
        match self {
            // 1024 always fits.
            Self::Primary => ByteOffset(EXT4_SUPERBLOCK_OFFSET as u64),
            Self::Backup { offset, .. } => ByteOffset(offset),
        }
    }

    #[must_use]
    pub fn is_backup(self) -> bool {
        matches!(self, Self::Backup { .. })
    }
}

/// Read and validate (magic and checksum) the region at `offset`.
fn probe_region(dev: &dyn ByteDevice, offset: ByteOffset) -> Result<[u8; EXT4_SUPERBLOCK_SIZE]> {
    let region = read_superblock_region_at(dev, offset)?;
    validate_superblock_region(&region).map_err(|e| E4Error::Parse(e.to_string()))?;
    Ok(region)
}

/// Probe the backup superblock candidates in order.
///
/// Block sizes are tried as 4K, 1K, 2K, 8K, each with the backups of groups
/// 1, 3, 5, 7 and 9. Once a candidate offset lies past the end of the image
/// (or past the seekable range), the remaining candidates for that block
/// size are skipped. Returns the first region that validates.
pub fn scan_backup_superblocks(
    dev: &dyn ByteDevice,
) -> Option<(SuperblockSource, [u8; EXT4_SUPERBLOCK_SIZE])> {
    let image_len = dev.len_bytes();

    for candidates in &BACKUP_SUPERBLOCK_CANDIDATES {
        let block_size = candidates.block_size;
        for (&group, &block) in BACKUP_SUPERBLOCK_GROUPS.iter().zip(&candidates.blocks) {
            let Some(offset) = block
                .checked_mul(u64::from(block_size))
                .filter(|off| *off <= MAX_SEEKABLE_OFFSET && *off <= image_len)
            else {
                debug!(
                    block_size,
                    group, block, image_len, "backup candidate beyond image, next block size"
                );
                break;
            };

            match probe_region(dev, ByteOffset(offset)) {
                Ok(region) => {
                    info!(block_size, group, block, offset, "using backup superblock");
                    let source = SuperblockSource::Backup {
                        group,
                        block,
                        block_size,
                        offset,
                    };
                    return Some((source, region));
                }
                Err(error) => {
                    debug!(block_size, group, block, offset, %error, "backup candidate rejected");
                }
            }
        }
    }

    None
}

/// Locate a valid superblock: the primary, else the first valid backup.
///
/// Validity means the magic matches and the stored checksum equals the
/// recomputed one. The winning record is then decoded; an unusable
/// block-size shift is reported as `CorruptFilesystem`.
pub fn load_superblock(
    dev: &dyn ByteDevice,
    options: &OpenOptions,
) -> Result<(Ext4Superblock, SuperblockSource)> {
    let primary = probe_region(dev, SuperblockSource::Primary.byte_offset());

    let (source, region) = match primary {
        Ok(region) => (SuperblockSource::Primary, region),
        Err(error) => {
            warn!(%error, "primary superblock invalid");
            if options.skip_backup_scan {
                return Err(E4Error::CorruptFilesystem(format!(
                    "primary superblock invalid ({error}) and backup scan disabled"
                )));
            }
            scan_backup_superblocks(dev).ok_or_else(|| {
                E4Error::CorruptFilesystem(
                    "no valid superblock found (primary or backup)".to_owned(),
                )
            })?
        }
    };

    let sb = Ext4Superblock::parse_superblock_region(&region)
        .map_err(|e| E4Error::CorruptFilesystem(format!("superblock at {source:?}: {e}")))?;
    debug!(?source, block_size = sb.block_size.get(), "superblock loaded");
    Ok((sb, source))
}
