#![forbid(unsafe_code)]
#![allow(dead_code)]

use e4fs_core::MemByteDevice;
use e4fs_ondisk::seal_superblock_checksum;
use e4fs_types::{EXT4_GROUP_DESC_SIZE, EXT4_N_BLOCKS, EXT4_SUPER_MAGIC, EXT4_SUPERBLOCK_SIZE};

/// Superblock fields the synthetic images care about.
#[derive(Debug, Clone, Copy)]
pub struct SbParams {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub log_block_size: u32,
    pub inode_size: u16,
}

impl SbParams {
    pub fn block_size(&self) -> usize {
        1024 << self.log_block_size
    }
}

/// Build a checksummed superblock region.
pub fn superblock_region(params: &SbParams) -> [u8; EXT4_SUPERBLOCK_SIZE] {
    let mut sb = [0_u8; EXT4_SUPERBLOCK_SIZE];
    sb[0x00..0x04].copy_from_slice(&params.inodes_count.to_le_bytes());
    sb[0x04..0x08].copy_from_slice(&params.blocks_count.to_le_bytes());
    let first_data_block = u32::from(params.log_block_size == 0);
    sb[0x14..0x18].copy_from_slice(&first_data_block.to_le_bytes());
    sb[0x18..0x1C].copy_from_slice(&params.log_block_size.to_le_bytes());
    sb[0x20..0x24].copy_from_slice(&params.blocks_per_group.to_le_bytes());
    sb[0x28..0x2C].copy_from_slice(&params.inodes_per_group.to_le_bytes());
    sb[0x38..0x3A].copy_from_slice(&EXT4_SUPER_MAGIC.to_le_bytes());
    sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes());
    sb[0x58..0x5A].copy_from_slice(&params.inode_size.to_le_bytes());
    sb[0x78..0x80].copy_from_slice(b"e4fstest");
    seal_superblock_checksum(&mut sb).expect("seal superblock");
    sb
}

/// In-memory ext4 image under construction.
pub struct ImageBuilder {
    pub image: Vec<u8>,
    pub block_size: usize,
}

impl ImageBuilder {
    pub fn new(block_size: usize, blocks: usize) -> Self {
        Self {
            image: vec![0_u8; block_size * blocks],
            block_size,
        }
    }

    pub fn put_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub fn put_superblock(&mut self, offset: usize, params: &SbParams) {
        self.put_bytes(offset, &superblock_region(params));
    }

    /// Write descriptor `group` of a table starting at `table_offset`.
    pub fn put_group_desc(&mut self, table_offset: usize, group: usize, inode_table: u32) {
        let at = table_offset + group * EXT4_GROUP_DESC_SIZE;
        self.put_u32(at + 0x08, inode_table);
    }

    pub fn put_inode(
        &mut self,
        offset: usize,
        mode: u16,
        size: u32,
        flags: u32,
        i_block: &[u32; EXT4_N_BLOCKS],
    ) {
        self.put_bytes(offset, &mode.to_le_bytes());
        self.put_u32(offset + 0x04, size);
        self.put_bytes(offset + 0x1A, &1_u16.to_le_bytes());
        self.put_u32(offset + 0x20, flags);
        for (i, ptr) in i_block.iter().enumerate() {
            self.put_u32(offset + 0x28 + i * 4, *ptr);
        }
    }

    /// Set entry `index` of the indirect block `block`.
    pub fn put_pointer(&mut self, block: u32, index: usize, value: u32) {
        let at = block as usize * self.block_size + index * 4;
        self.put_u32(at, value);
    }

    /// Fill data block `block` with `fill`.
    pub fn fill_block(&mut self, block: u32, fill: u8) {
        let start = block as usize * self.block_size;
        self.image[start..start + self.block_size].fill(fill);
    }

    pub fn into_device(self) -> MemByteDevice {
        MemByteDevice::new(self.image)
    }
}

/// 1K-block image: 2 groups of 8192 blocks, 2048 inodes each, inode table
/// of group 0 at block 100, group 1 at block 8300. Primary superblock only.
pub fn small_1k_image() -> ImageBuilder {
    let params = SbParams {
        inodes_count: 4096,
        blocks_count: 16_384,
        blocks_per_group: 8192,
        inodes_per_group: 2048,
        log_block_size: 0,
        inode_size: 256,
    };
    let mut builder = ImageBuilder::new(1024, 2048);
    builder.put_superblock(1024, &params);
    builder.put_group_desc(2048, 0, 100);
    builder.put_group_desc(2048, 1, 8300);
    builder
}

/// Offset of inode `ino` in [`small_1k_image`] (group 0 only).
pub fn small_1k_inode_offset(ino: usize) -> usize {
    100 * 1024 + (ino - 1) * 256
}
