#![forbid(unsafe_code)]
//! On-disk format decoding for ext4 structures.
//!
//! Pure decoding crate: no I/O, no side effects. Turns byte slices into
//! typed superblocks, group descriptors and inodes, and validates
//! superblock regions with ext4's CRC-32C.

pub mod checksum;
pub mod ext4;

pub use checksum::{ext4_crc32c, ext4_crc32c_update};
pub use ext4::{
    BACKUP_SUPERBLOCK_CANDIDATES, BACKUP_SUPERBLOCK_GROUPS, BackupCandidates, Ext4GroupDesc,
    Ext4Inode, Ext4Superblock, SuperblockChecksum, seal_superblock_checksum, superblock_checksum,
    validate_superblock_region,
};
