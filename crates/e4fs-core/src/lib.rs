#![forbid(unsafe_code)]
//! Read-only access to ext4 images.
//!
//! [`Ext4Fs`] bundles the validated superblock, the group descriptor table
//! and the image device. Opening locates a superblock (falling back to
//! backup copies when the primary fails validation), derives the geometry
//! and loads the descriptor table; after that the handle resolves inode
//! numbers and maps logical file blocks through `i_block`.
//!
//! ```ignore
//! let fs = Ext4Fs::open("disk.img")?;
//! let inode = fs.read_inode(InodeNumber(12))?;
//! let first = fs.read_logical_block(&inode, 0)?;
//! ```

mod gdt;
mod inode;
mod superblock;

pub use gdt::{gdt_offset, load_gdt};
pub use inode::{InodeLocation, locate_inode, read_inode_at};
pub use superblock::{SuperblockSource, load_superblock, scan_backup_superblocks};

pub use e4fs_block::{BlockBuf, ByteDevice, FileByteDevice, MemByteDevice};
pub use e4fs_error::{E4Error, Result};
pub use e4fs_indirect::{AddressingLevel, max_addressable_blocks, resolve_addressing_level};
pub use e4fs_ondisk::{
    Ext4GroupDesc, Ext4Inode, Ext4Superblock, SuperblockChecksum, superblock_checksum,
};

use e4fs_types::{
    BlockNumber, BlockSize, ByteOffset, EXT4_INODE_RECORD_SIZE, GroupNumber, InodeNumber,
    u64_to_usize,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

// ── Options & geometry ──────────────────────────────────────────────────────

/// Options controlling how an image is opened.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Address inode records by the superblock's `s_inode_size` instead of
    /// the fixed 256-byte record.
    pub honor_inode_size: bool,
    /// Fail as soon as the primary superblock is invalid instead of
    /// scanning the backup copies.
    pub skip_backup_scan: bool,
}

/// Geometry derived from the superblock at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext4Geometry {
    /// Block size in bytes.
    pub block_size: u32,
    pub blocks_count: u64,
    pub blocks_per_group: u32,
    pub inodes_count: u32,
    /// `inodes_count / groups_count`, not the superblock's own field.
    pub inodes_per_group: u32,
    /// `ceil(blocks_count / blocks_per_group)`.
    pub groups_count: u32,
    pub first_data_block: u32,
    /// Stride between inode records in an inode table.
    pub inode_record_size: u32,
}

impl Ext4Geometry {
    /// Derive the geometry, rejecting values that would make inode lookup
    /// meaningless.
    pub fn from_superblock(sb: &Ext4Superblock, options: &OpenOptions) -> Result<Self> {
        let groups_count = sb
            .groups_count()
            .map_err(|e| E4Error::CorruptFilesystem(e.to_string()))?;
        if groups_count == 0 {
            return Err(E4Error::CorruptFilesystem(
                "superblock reports zero blocks".to_owned(),
            ));
        }

        let inodes_per_group = sb.inodes_count / groups_count;
        if inodes_per_group == 0 {
            return Err(E4Error::CorruptFilesystem(format!(
                "{} inodes cannot fill {groups_count} groups",
                sb.inodes_count
            )));
        }
        if sb.inodes_count % groups_count != 0 {
            warn!(
                inodes_count = sb.inodes_count,
                groups_count, "inode count is not a multiple of the group count"
            );
        }
        if inodes_per_group != sb.inodes_per_group {
            debug!(
                derived = inodes_per_group,
                stored = sb.inodes_per_group,
                "derived inodes per group differs from superblock"
            );
        }

        let inode_record_size = if options.honor_inode_size {
            let size = u32::from(sb.inode_size);
            if size < 128 || size > sb.block_size.get() {
                return Err(E4Error::CorruptFilesystem(format!(
                    "s_inode_size {size} outside 128..={}",
                    sb.block_size
                )));
            }
            size
        } else {
            // 256 always fits.
            EXT4_INODE_RECORD_SIZE as u32
        };

        Ok(Self {
            block_size: sb.block_size.get(),
            blocks_count: sb.blocks_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_count: sb.inodes_count,
            inodes_per_group,
            groups_count,
            first_data_block: sb.first_data_block,
            inode_record_size,
        })
    }
}

// ── Ext4Fs ──────────────────────────────────────────────────────────────────

/// An opened ext4 image.
///
/// Only ever constructed fully: if any step of opening fails, the device and
/// anything loaded so far are dropped before the error is returned.
pub struct Ext4Fs {
    sb: Ext4Superblock,
    source: SuperblockSource,
    gdt: Vec<Ext4GroupDesc>,
    geometry: Ext4Geometry,
    dev: Box<dyn ByteDevice>,
}

impl std::fmt::Debug for Ext4Fs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext4Fs")
            .field("source", &self.source)
            .field("geometry", &self.geometry)
            .field("groups_loaded", &self.gdt.len())
            .field("dev_len", &self.dev.len_bytes())
            .finish_non_exhaustive()
    }
}

impl Ext4Fs {
    /// Open an image at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Box::new(dev), options)
    }

    /// Open a filesystem from an already-opened device.
    pub fn from_device(dev: Box<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let (sb, source) = load_superblock(&*dev, options)?;
        let geometry = Ext4Geometry::from_superblock(&sb, options)?;
        let gdt = load_gdt(&*dev, &sb, source)?;

        info!(
            ?source,
            block_size = geometry.block_size,
            groups = geometry.groups_count,
            inodes_per_group = geometry.inodes_per_group,
            image_len = dev.len_bytes(),
            "opened ext4 image"
        );
        Ok(Self {
            sb,
            source,
            gdt,
            geometry,
            dev,
        })
    }

    /// Release the image.
    pub fn close(self) {
        debug!("closing ext4 image");
        drop(self);
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &Ext4Superblock {
        &self.sb
    }

    #[must_use]
    pub fn superblock_source(&self) -> SuperblockSource {
        self.source
    }

    #[must_use]
    pub fn group_descs(&self) -> &[Ext4GroupDesc] {
        &self.gdt
    }

    #[must_use]
    pub fn group_desc(&self, group: GroupNumber) -> Option<&Ext4GroupDesc> {
        usize::try_from(group.0).ok().and_then(|g| self.gdt.get(g))
    }

    #[must_use]
    pub fn block_size(&self) -> BlockSize {
        self.sb.block_size
    }

    #[must_use]
    pub fn groups_count(&self) -> u32 {
        self.geometry.groups_count
    }

    #[must_use]
    pub fn inodes_per_group(&self) -> u32 {
        self.geometry.inodes_per_group
    }

    /// Image length in bytes.
    #[must_use]
    pub fn image_size(&self) -> u64 {
        self.dev.len_bytes()
    }

    #[must_use]
    pub fn inode_record_size(&self) -> u32 {
        self.geometry.inode_record_size
    }

    #[must_use]
    pub fn geometry(&self) -> &Ext4Geometry {
        &self.geometry
    }

    /// The device backing this filesystem.
    #[must_use]
    pub fn device(&self) -> &dyn ByteDevice {
        &*self.dev
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Read `len` bytes at an absolute image offset.
    pub fn read_raw(&self, offset: ByteOffset, len: usize) -> Result<Vec<u8>> {
        e4fs_block::read_raw(&*self.dev, offset, len)
    }

    /// Read one block by physical number.
    pub fn read_physical_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        e4fs_block::read_physical_block(&*self.dev, self.sb.block_size, block)
    }

    pub fn locate_inode(&self, ino: InodeNumber) -> Result<InodeLocation> {
        locate_inode(&self.geometry, &self.gdt, ino)
    }

    /// Read inode `ino`. Nothing is cached; each call hits the device.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext4Inode> {
        let location = self.locate_inode(ino)?;
        read_inode_at(&*self.dev, &location, self.geometry.inode_record_size)
    }

    /// Translate a file-relative block index to a physical block number.
    pub fn map_logical_block(&self, inode: &Ext4Inode, logical: u64) -> Result<BlockNumber> {
        if inode.uses_extents() {
            warn!(
                logical,
                "inode uses extents; mapping i_block as indirect pointers anyway"
            );
        }
        let mut read_block = |block: BlockNumber| -> Result<Vec<u8>> {
            self.read_physical_block(block).map(BlockBuf::into_inner)
        };
        e4fs_indirect::map_logical_block(&inode.block, self.sb.block_size, logical, &mut read_block)
    }

    /// Read the data block at `logical` within `inode`.
    pub fn read_logical_block(&self, inode: &Ext4Inode, logical: u64) -> Result<BlockBuf> {
        let physical = self.map_logical_block(inode, logical)?;
        self.read_physical_block(physical)
    }

    /// Read a whole file: `ceil(size / block_size)` blocks, truncated to
    /// `i_size`. Any hole fails the read.
    ///
    /// An `i_size` larger than the image is `CorruptFilesystem`.
    pub fn read_file(&self, inode: &Ext4Inode) -> Result<Vec<u8>> {
        let image_size = self.image_size();
        if inode.size > image_size {
            return Err(E4Error::CorruptFilesystem(format!(
                "i_size {} exceeds image size {image_size}",
                inode.size
            )));
        }
        let size = u64_to_usize(inode.size, "i_size").map_err(|e| E4Error::Parse(e.to_string()))?;
        let block_size = u64::from(self.sb.block_size.get());
        let blocks = inode.size.div_ceil(block_size);
        let capacity = u64_to_usize(blocks * block_size, "file buffer")
            .map_err(|e| E4Error::Parse(e.to_string()))?;

        let mut data = Vec::with_capacity(capacity);
        for logical in 0..blocks {
            let block = self.read_logical_block(inode, logical)?;
            data.extend_from_slice(block.as_slice());
        }
        data.truncate(size);
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use e4fs_ondisk::seal_superblock_checksum;
    use e4fs_types::{EXT4_SUPER_MAGIC, EXT4_SUPERBLOCK_SIZE};

    fn sb_with(inodes: u32, blocks: u32, blocks_per_group: u32, inode_size: u16) -> Ext4Superblock {
        let mut sb = [0_u8; EXT4_SUPERBLOCK_SIZE];
        sb[0x38..0x3A].copy_from_slice(&EXT4_SUPER_MAGIC.to_le_bytes());
        sb[0x00..0x04].copy_from_slice(&inodes.to_le_bytes());
        sb[0x04..0x08].copy_from_slice(&blocks.to_le_bytes());
        sb[0x20..0x24].copy_from_slice(&blocks_per_group.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&inode_size.to_le_bytes());
        seal_superblock_checksum(&mut sb).expect("seal");
        Ext4Superblock::parse_superblock_region(&sb).expect("parse")
    }

    #[test]
    fn geometry_derives_group_counts() {
        let sb = sb_with(16_384, 16_385, 8192, 256);
        let geo = Ext4Geometry::from_superblock(&sb, &OpenOptions::default()).unwrap();
        assert_eq!(geo.groups_count, 3);
        assert_eq!(geo.inodes_per_group, 5461);
        assert_eq!(geo.inode_record_size, 256);
        assert_eq!(geo.block_size, 1024);
    }

    #[test]
    fn geometry_rejects_unusable_values() {
        let opts = OpenOptions::default();
        assert!(matches!(
            Ext4Geometry::from_superblock(&sb_with(100, 0, 8192, 256), &opts),
            Err(E4Error::CorruptFilesystem(_))
        ));
        assert!(matches!(
            Ext4Geometry::from_superblock(&sb_with(100, 8192, 0, 256), &opts),
            Err(E4Error::CorruptFilesystem(_))
        ));
        assert!(matches!(
            Ext4Geometry::from_superblock(&sb_with(1, 3 * 8192, 8192, 256), &opts),
            Err(E4Error::CorruptFilesystem(_))
        ));
    }

    #[test]
    fn honor_inode_size_uses_superblock_field() {
        let honor = OpenOptions {
            honor_inode_size: true,
            ..OpenOptions::default()
        };
        let geo = Ext4Geometry::from_superblock(&sb_with(64, 8192, 8192, 128), &honor).unwrap();
        assert_eq!(geo.inode_record_size, 128);

        let fixed =
            Ext4Geometry::from_superblock(&sb_with(64, 8192, 8192, 128), &OpenOptions::default())
                .unwrap();
        assert_eq!(fixed.inode_record_size, 256);

        assert!(Ext4Geometry::from_superblock(&sb_with(64, 8192, 8192, 64), &honor).is_err());
        assert!(Ext4Geometry::from_superblock(&sb_with(64, 8192, 8192, 2048), &honor).is_err());
    }

    #[test]
    fn geometry_serializes() {
        let geo = Ext4Geometry::from_superblock(
            &sb_with(16_384, 16_384, 8192, 256),
            &OpenOptions::default(),
        )
        .unwrap();
        let json = serde_json::to_string(&geo).unwrap();
        let back: Ext4Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, geo);
    }

    #[test]
    fn handle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Ext4Fs>();
    }

    #[test]
    fn open_garbage_is_corrupt() {
        let dev = MemByteDevice::new(vec![0xAB; 64 * 1024]);
        let err = Ext4Fs::from_device(Box::new(dev), &OpenOptions::default()).unwrap_err();
        assert!(err.is_fatal());
    }
}
