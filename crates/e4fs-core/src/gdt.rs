#![forbid(unsafe_code)]
//! Group descriptor table loading.

use crate::SuperblockSource;
use e4fs_block::{ByteDevice, read_raw};
use e4fs_error::{E4Error, Result};
use e4fs_ondisk::{Ext4GroupDesc, Ext4Superblock};
use e4fs_types::{BlockSize, ByteOffset, EXT4_GROUP_DESC_SIZE, u64_to_usize};
use std::io::ErrorKind;
use tracing::debug;

/// First byte of the block after the one holding the superblock record.
pub fn gdt_offset(source: SuperblockSource, block_size: BlockSize) -> Result<ByteOffset> {
    let bs = u64::from(block_size.get());
    (source.byte_offset().0 / bs)
        .checked_add(1)
        .and_then(|block| block.checked_mul(bs))
        .map(ByteOffset)
        .ok_or_else(|| {
            E4Error::CorruptFilesystem(format!(
                "group descriptor table offset overflows for {source:?}"
            ))
        })
}

/// Read one descriptor per block group, back to back.
///
/// The table size is checked against the image before anything is read, so a
/// superblock claiming an absurd group count fails with `Io` instead of
/// allocating.
pub fn load_gdt(
    dev: &dyn ByteDevice,
    sb: &Ext4Superblock,
    source: SuperblockSource,
) -> Result<Vec<Ext4GroupDesc>> {
    let groups = sb
        .groups_count()
        .map_err(|e| E4Error::CorruptFilesystem(e.to_string()))?;
    let offset = gdt_offset(source, sb.block_size)?;

    let table_len = u64::from(groups) * EXT4_GROUP_DESC_SIZE as u64;
    let end = offset.checked_add(table_len).ok_or_else(|| {
        E4Error::CorruptFilesystem("group descriptor table end overflows".to_owned())
    })?;
    if end.0 > dev.len_bytes() {
        return Err(E4Error::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "group descriptor table [{offset}, {end}) runs past image end {}",
                dev.len_bytes()
            ),
        )));
    }

    let len = u64_to_usize(table_len, "gdt_len").map_err(|e| E4Error::Parse(e.to_string()))?;
    let raw = read_raw(dev, offset, len)?;
    let descs = raw
        .chunks_exact(EXT4_GROUP_DESC_SIZE)
        .map(|chunk| Ext4GroupDesc::parse_from_bytes(chunk, EXT4_GROUP_DESC_SIZE))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| E4Error::Parse(e.to_string()))?;

    debug!(groups, offset = offset.0, "group descriptor table loaded");
    Ok(descs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use e4fs_block::MemByteDevice;
    use e4fs_ondisk::seal_superblock_checksum;
    use e4fs_types::{EXT4_SUPER_MAGIC, EXT4_SUPERBLOCK_SIZE};

    fn superblock(blocks: u32, blocks_per_group: u32, log: u32) -> Ext4Superblock {
        let mut sb = [0_u8; EXT4_SUPERBLOCK_SIZE];
        sb[0x38..0x3A].copy_from_slice(&EXT4_SUPER_MAGIC.to_le_bytes());
        sb[0x04..0x08].copy_from_slice(&blocks.to_le_bytes());
        sb[0x18..0x1C].copy_from_slice(&log.to_le_bytes());
        sb[0x20..0x24].copy_from_slice(&blocks_per_group.to_le_bytes());
        seal_superblock_checksum(&mut sb).expect("seal");
        Ext4Superblock::parse_superblock_region(&sb).expect("parse")
    }

    #[test]
    fn offset_follows_superblock_block() {
        let bs1k = BlockSize::new(1024).unwrap();
        let bs4k = BlockSize::new(4096).unwrap();
        assert_eq!(
            gdt_offset(SuperblockSource::Primary, bs1k).unwrap(),
            ByteOffset(2048)
        );
        assert_eq!(
            gdt_offset(SuperblockSource::Primary, bs4k).unwrap(),
            ByteOffset(4096)
        );
        let backup = SuperblockSource::Backup {
            group: 1,
            block: 8193,
            block_size: 1024,
            offset: 8193 * 1024,
        };
        assert_eq!(gdt_offset(backup, bs1k).unwrap(), ByteOffset(8194 * 1024));
    }

    #[test]
    fn reads_one_descriptor_per_group() {
        // 1K blocks, 3 groups -> table at 2048.
        let sb = superblock(20_000, 8192, 0);
        let mut image = vec![0_u8; 8 * 1024];
        for g in 0..3_u32 {
            let at = 2048 + usize::try_from(g).unwrap() * EXT4_GROUP_DESC_SIZE;
            image[at + 8..at + 12].copy_from_slice(&(100 + g).to_le_bytes());
        }
        let dev = MemByteDevice::new(image);
        let gdt = load_gdt(&dev, &sb, SuperblockSource::Primary).expect("gdt");
        assert_eq!(gdt.len(), 3);
        assert_eq!(gdt[0].inode_table_lo, 100);
        assert_eq!(gdt[2].inode_table_lo, 102);
    }

    #[test]
    fn table_past_image_end_is_io() {
        let sb = superblock(u32::MAX, 1, 0);
        let dev = MemByteDevice::new(vec![0_u8; 4096]);
        let err = load_gdt(&dev, &sb, SuperblockSource::Primary).unwrap_err();
        assert!(matches!(err, E4Error::Io(_)));
    }

    #[test]
    fn zero_blocks_per_group_is_corrupt() {
        let sb = superblock(100, 0, 0);
        let dev = MemByteDevice::new(vec![0_u8; 4096]);
        assert!(matches!(
            load_gdt(&dev, &sb, SuperblockSource::Primary),
            Err(E4Error::CorruptFilesystem(_))
        ));
    }
}
