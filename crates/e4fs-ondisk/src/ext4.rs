#![forbid(unsafe_code)]

use crate::checksum::ext4_crc32c;
use e4fs_types::{
    BlockSize, EXT4_EXTENTS_FL, EXT4_N_BLOCKS, EXT4_SUPER_MAGIC,
    EXT4_SUPERBLOCK_CHECKSUM_OFFSET, EXT4_SUPERBLOCK_SIZE, ParseError, S_IFDIR, S_IFLNK, S_IFMT,
    S_IFREG, ensure_slice, read_fixed, read_le_u16, read_le_u32, read_u8, trim_nul_padded,
};
use serde::{Deserialize, Serialize};

// ── Feature bits consulted by the parser ────────────────────────────────────

pub const EXT4_FEATURE_INCOMPAT_64BIT: u32 = 0x0080;

// ── Backup superblock locations ─────────────────────────────────────────────

/// Block groups that carry a backup superblock on a `sparse_super` image,
/// in the order they are probed.
pub const BACKUP_SUPERBLOCK_GROUPS: [u32; 5] = [1, 3, 5, 7, 9];

/// Absolute block numbers of the backups for one candidate block size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupCandidates {
    pub block_size: u32,
    /// One entry per group in [`BACKUP_SUPERBLOCK_GROUPS`].
    pub blocks: [u64; 5],
}

/// Probe order for backup superblocks: 4K first, then 1K, 2K and 8K.
pub const BACKUP_SUPERBLOCK_CANDIDATES: [BackupCandidates; 4] = [
    BackupCandidates {
        block_size: 4096,
        blocks: [32_768, 98_304, 163_840, 229_376, 294_912],
    },
    BackupCandidates {
        block_size: 1024,
        blocks: [8193, 24_577, 40_961, 57_345, 73_729],
    },
    BackupCandidates {
        block_size: 2048,
        blocks: [16_384, 49_152, 81_920, 114_688, 147_456],
    },
    BackupCandidates {
        block_size: 8192,
        blocks: [65_528, 196_584, 327_640, 458_696, 589_752],
    },
];

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext4Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u64,
    pub reserved_blocks_count: u64,
    pub free_blocks_count: u64,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub block_size: BlockSize,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub first_ino: u32,
    pub desc_size: u16,
    pub block_group_nr: u16,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    pub volume_name: String,
    pub last_mounted: String,

    // ── Revision & OS ────────────────────────────────────────────────────
    pub rev_level: u32,
    pub minor_rev_level: u16,
    pub creator_os: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,

    // ── State ────────────────────────────────────────────────────────────
    pub state: u16,
    pub errors: u16,
    pub mnt_count: u16,
    pub max_mnt_count: u16,

    // ── Timestamps ───────────────────────────────────────────────────────
    pub mtime: u32,
    pub wtime: u32,
    pub lastcheck: u32,
    pub mkfs_time: u32,

    // ── Checksums ────────────────────────────────────────────────────────
    pub checksum_type: u8,
    pub checksum: u32,
}

/// Stored and recomputed superblock checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperblockChecksum {
    pub stored: u32,
    pub computed: u32,
}

impl SuperblockChecksum {
    #[must_use]
    pub fn matches(self) -> bool {
        self.stored == self.computed
    }
}

/// Compute the checksum of a raw 1024-byte superblock region.
///
/// The covered range is `[0, 0x3FC)`, i.e. the record with `s_checksum`
/// left out.
pub fn superblock_checksum(region: &[u8]) -> Result<SuperblockChecksum, ParseError> {
    let covered = ensure_slice(region, 0, EXT4_SUPERBLOCK_CHECKSUM_OFFSET)?;
    Ok(SuperblockChecksum {
        stored: read_le_u32(region, EXT4_SUPERBLOCK_CHECKSUM_OFFSET)?,
        computed: ext4_crc32c(covered),
    })
}

/// Validate a raw superblock region: magic first, then checksum.
///
/// A matching magic alone is not enough; unrelated data can carry `0xEF53`
/// at the right offset.
pub fn validate_superblock_region(region: &[u8]) -> Result<(), ParseError> {
    if region.len() < EXT4_SUPERBLOCK_SIZE {
        return Err(ParseError::InsufficientData {
            needed: EXT4_SUPERBLOCK_SIZE,
            offset: 0,
            actual: region.len(),
        });
    }

    let magic = read_le_u16(region, 0x38)?;
    if magic != EXT4_SUPER_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(EXT4_SUPER_MAGIC),
            actual: u64::from(magic),
        });
    }

    if !superblock_checksum(region)?.matches() {
        return Err(ParseError::InvalidField {
            field: "s_checksum",
            reason: "superblock CRC32C mismatch",
        });
    }
    Ok(())
}

/// Recompute and store `s_checksum` in a superblock region.
///
/// Returns the value written.
pub fn seal_superblock_checksum(region: &mut [u8]) -> Result<u32, ParseError> {
    let computed = superblock_checksum(region)?.computed;
    region[EXT4_SUPERBLOCK_CHECKSUM_OFFSET..EXT4_SUPERBLOCK_CHECKSUM_OFFSET + 4]
        .copy_from_slice(&computed.to_le_bytes());
    Ok(computed)
}

impl Ext4Superblock {
    /// Parse an ext4 superblock from a 1024-byte superblock region.
    ///
    /// Only the magic and the block-size shift are checked here; use
    /// [`validate_superblock_region`] for the checksum.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT4_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT4_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, 0x38)?;
        if magic != EXT4_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT4_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let blocks_lo = u64::from(read_le_u32(region, 0x04)?);
        let blocks_hi = u64::from(read_le_u32(region, 0x150)?);

        let r_blocks_lo = u64::from(read_le_u32(region, 0x08)?);
        let r_blocks_hi = u64::from(read_le_u32(region, 0x154)?);

        let free_blocks_lo = u64::from(read_le_u32(region, 0x0C)?);
        let free_blocks_hi = u64::from(read_le_u32(region, 0x158)?);

        let log_block_size = read_le_u32(region, 0x18)?;
        let block_size = BlockSize::from_log(log_block_size)?;

        let feature_incompat = read_le_u32(region, 0x60)?;
        // The high words only carry meaning on 64-bit images.
        let is_64bit = feature_incompat & EXT4_FEATURE_INCOMPAT_64BIT != 0;
        let combine = |lo: u64, hi: u64| if is_64bit { lo | (hi << 32) } else { lo };

        Ok(Self {
            inodes_count: read_le_u32(region, 0x00)?,
            blocks_count: combine(blocks_lo, blocks_hi),
            reserved_blocks_count: combine(r_blocks_lo, r_blocks_hi),
            free_blocks_count: combine(free_blocks_lo, free_blocks_hi),
            free_inodes_count: read_le_u32(region, 0x10)?,
            first_data_block: read_le_u32(region, 0x14)?,
            log_block_size,
            block_size,
            blocks_per_group: read_le_u32(region, 0x20)?,
            inodes_per_group: read_le_u32(region, 0x28)?,
            inode_size: read_le_u16(region, 0x58)?,
            first_ino: read_le_u32(region, 0x54)?,
            desc_size: read_le_u16(region, 0xFE)?,
            block_group_nr: read_le_u16(region, 0x5A)?,

            magic,
            uuid: read_fixed::<16>(region, 0x68)?,
            volume_name: trim_nul_padded(&read_fixed::<16>(region, 0x78)?),
            last_mounted: trim_nul_padded(&read_fixed::<64>(region, 0x88)?),

            rev_level: read_le_u32(region, 0x4C)?,
            minor_rev_level: read_le_u16(region, 0x3E)?,
            creator_os: read_le_u32(region, 0x48)?,

            feature_compat: read_le_u32(region, 0x5C)?,
            feature_incompat,
            feature_ro_compat: read_le_u32(region, 0x64)?,

            state: read_le_u16(region, 0x3A)?,
            errors: read_le_u16(region, 0x3C)?,
            mnt_count: read_le_u16(region, 0x34)?,
            max_mnt_count: read_le_u16(region, 0x36)?,

            mtime: read_le_u32(region, 0x2C)?,
            wtime: read_le_u32(region, 0x30)?,
            lastcheck: read_le_u32(region, 0x40)?,
            mkfs_time: read_le_u32(region, 0x108)?,

            checksum_type: read_u8(region, 0x175)?,
            checksum: read_le_u32(region, EXT4_SUPERBLOCK_CHECKSUM_OFFSET)?,
        })
    }

    #[must_use]
    pub fn is_64bit(&self) -> bool {
        self.feature_incompat & EXT4_FEATURE_INCOMPAT_64BIT != 0
    }

    /// Number of block groups: `ceil(blocks_count / blocks_per_group)`.
    pub fn groups_count(&self) -> Result<u32, ParseError> {
        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "cannot be zero",
            });
        }
        let groups = self
            .blocks_count
            .div_ceil(u64::from(self.blocks_per_group));
        u32::try_from(groups).map_err(|_| ParseError::IntegerConversion {
            field: "groups_count",
        })
    }
}

// ── Group descriptor ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext4GroupDesc {
    pub block_bitmap: u64,
    pub inode_bitmap: u64,
    pub inode_table_lo: u32,
    pub inode_table_hi: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub used_dirs_count: u32,
    pub itable_unused: u32,
    pub flags: u16,
    pub checksum: u16,
}

impl Ext4GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8], desc_size: usize) -> Result<Self, ParseError> {
        if desc_size < 32 {
            return Err(ParseError::InvalidField {
                field: "s_desc_size",
                reason: "descriptor size must be >= 32",
            });
        }
        if bytes.len() < desc_size {
            return Err(ParseError::InsufficientData {
                needed: desc_size,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let block_bitmap_lo = u64::from(read_le_u32(bytes, 0x00)?);
        let inode_bitmap_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let inode_table_lo = read_le_u32(bytes, 0x08)?;
        let free_blocks_lo = u32::from(read_le_u16(bytes, 0x0C)?);
        let free_inodes_lo = u32::from(read_le_u16(bytes, 0x0E)?);
        let used_dirs_lo = u32::from(read_le_u16(bytes, 0x10)?);
        let flags = read_le_u16(bytes, 0x12)?;
        let itable_unused_lo = u32::from(read_le_u16(bytes, 0x1C)?);
        let checksum = read_le_u16(bytes, 0x1E)?;

        if desc_size >= 64 {
            let block_bitmap_hi = u64::from(read_le_u32(bytes, 0x20)?);
            let inode_bitmap_hi = u64::from(read_le_u32(bytes, 0x24)?);
            let inode_table_hi = read_le_u32(bytes, 0x28)?;
            let free_blocks_hi = u32::from(read_le_u16(bytes, 0x2C)?);
            let free_inodes_hi = u32::from(read_le_u16(bytes, 0x2E)?);
            let used_dirs_hi = u32::from(read_le_u16(bytes, 0x30)?);
            let itable_unused_hi = u32::from(read_le_u16(bytes, 0x32)?);

            Ok(Self {
                block_bitmap: block_bitmap_lo | (block_bitmap_hi << 32),
                inode_bitmap: inode_bitmap_lo | (inode_bitmap_hi << 32),
                inode_table_lo,
                inode_table_hi,
                free_blocks_count: free_blocks_lo | (free_blocks_hi << 16),
                free_inodes_count: free_inodes_lo | (free_inodes_hi << 16),
                used_dirs_count: used_dirs_lo | (used_dirs_hi << 16),
                itable_unused: itable_unused_lo | (itable_unused_hi << 16),
                flags,
                checksum,
            })
        } else {
            Ok(Self {
                block_bitmap: block_bitmap_lo,
                inode_bitmap: inode_bitmap_lo,
                inode_table_lo,
                inode_table_hi: 0,
                free_blocks_count: free_blocks_lo,
                free_inodes_count: free_inodes_lo,
                used_dirs_count: used_dirs_lo,
                itable_unused: itable_unused_lo,
                flags,
                checksum,
            })
        }
    }

    /// Full 64-bit inode table block (low and high words combined).
    #[must_use]
    pub fn inode_table(&self) -> u64 {
        u64::from(self.inode_table_lo) | (u64::from(self.inode_table_hi) << 32)
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext4Inode {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub links_count: u16,
    pub blocks: u64,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u64,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    pub extra_isize: u16,
    pub checksum: u32,

    /// `i_block`: 0-11 direct, 12 single, 13 double, 14 triple indirect.
    pub block: [u32; EXT4_N_BLOCKS],
}

impl Ext4Inode {
    /// Parse an ext4 inode from raw bytes.
    ///
    /// Requires at least the 128-byte base record. The extended area is read
    /// when the buffer and `i_extra_isize` cover it.
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < 128 {
            return Err(ParseError::InsufficientData {
                needed: 128,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let uid_lo = u32::from(read_le_u16(bytes, 0x02)?);
        let gid_lo = u32::from(read_le_u16(bytes, 0x18)?);
        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = u64::from(read_le_u32(bytes, 0x6C)?);
        let blocks_lo = u64::from(read_le_u32(bytes, 0x1C)?);
        let file_acl_lo = u64::from(read_le_u32(bytes, 0x68)?);

        let mut block = [0_u32; EXT4_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        // Linux osd2 layout.
        let blocks_hi = u64::from(read_le_u16(bytes, 0x74)?);
        let file_acl_hi = u64::from(read_le_u16(bytes, 0x76)?);
        let uid_hi = u32::from(read_le_u16(bytes, 0x78)?);
        let gid_hi = u32::from(read_le_u16(bytes, 0x7A)?);
        let checksum_lo = u32::from(read_le_u16(bytes, 0x7C)?);

        let (extra_isize, checksum_hi) = if bytes.len() >= 0x84 {
            let extra_isize = read_le_u16(bytes, 0x80)?;
            let checksum_hi = if 128 + usize::from(extra_isize) >= 0x84 {
                u32::from(read_le_u16(bytes, 0x82)?)
            } else {
                0
            };
            (extra_isize, checksum_hi)
        } else {
            (0, 0)
        };

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: uid_lo | (uid_hi << 16),
            gid: gid_lo | (gid_hi << 16),
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: blocks_lo | (blocks_hi << 32),
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: file_acl_lo | (file_acl_hi << 32),

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            extra_isize,
            checksum: checksum_lo | (checksum_hi << 16),
            block,
        })
    }

    /// File type bits of `i_mode`.
    #[must_use]
    pub fn file_type_mode(&self) -> u16 {
        self.mode & S_IFMT
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.file_type_mode() == S_IFREG
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.file_type_mode() == S_IFDIR
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.file_type_mode() == S_IFLNK
    }

    /// Whether `i_block` holds an extent tree rather than block pointers.
    #[must_use]
    pub fn uses_extents(&self) -> bool {
        (self.flags & EXT4_EXTENTS_FL) != 0
    }
}
