#![forbid(unsafe_code)]
//! Block I/O layer.
//!
//! Provides the `ByteDevice` trait, a file-backed device that serialises
//! seek+read pairs on one shared handle, an in-memory device, and the two
//! read primitives everything else is built on: [`read_raw`] for
//! fixed-offset structures and [`read_physical_block`] for whole blocks.

use e4fs_error::{E4Error, Result};
use e4fs_types::{BlockNumber, BlockSize, ByteOffset, EXT4_SUPERBLOCK_SIZE};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::trace;

/// Owned block buffer.
///
/// Invariant: length == block size of the read that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte-addressed, read-only device.
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    ///
    /// A read that would run past the end of the device fails with
    /// `E4Error::Io` (`UnexpectedEof`).
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;
}

/// File-backed image opened read-only.
///
/// All reads go through one `File` whose cursor is shared, so each read
/// repositions and reads while holding the lock.
#[derive(Debug)]
pub struct FileByteDevice {
    file: Mutex<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        trace!(path = %path.as_ref().display(), len, "opened image");
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset.0))?;
        file.read_exact(buf)?;
        drop(file);
        Ok(())
    }
}

/// In-memory image.
#[derive(Debug, Clone, Default)]
pub struct MemByteDevice {
    data: Vec<u8>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        let start = usize::try_from(offset.0).ok();
        let end = start.and_then(|start| start.checked_add(buf.len()));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.data.len() => {
                buf.copy_from_slice(&self.data[start..end]);
                Ok(())
            }
            _ => Err(E4Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "read out of bounds: offset={offset} len={} image_len={}",
                    buf.len(),
                    self.data.len()
                ),
            ))),
        }
    }
}

/// Read `len` bytes at `offset`.
pub fn read_raw(dev: &dyn ByteDevice, offset: ByteOffset, len: usize) -> Result<Vec<u8>> {
    trace!(offset = offset.0, len, "read_raw");
    let mut buf = vec![0_u8; len];
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}

/// Read one physical block at `block * block_size`.
///
/// There is no check against the filesystem's block count; a block beyond
/// the end of the image fails as an I/O error.
pub fn read_physical_block(
    dev: &dyn ByteDevice,
    block_size: BlockSize,
    block: BlockNumber,
) -> Result<BlockBuf> {
    let offset = block_size.block_to_byte(block).ok_or_else(|| {
        E4Error::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("block offset overflow: block={block} block_size={block_size}"),
        ))
    })?;
    let len = block_size
        .as_usize()
        .map_err(|e| E4Error::Parse(e.to_string()))?;
    trace!(block = block.0, offset = offset.0, "read_physical_block");
    read_raw(dev, offset, len).map(BlockBuf::new)
}

/// Read a 1024-byte superblock region at `offset`.
pub fn read_superblock_region_at(
    dev: &dyn ByteDevice,
    offset: ByteOffset,
) -> Result<[u8; EXT4_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT4_SUPERBLOCK_SIZE];
    dev.read_exact_at(offset, &mut buf)?;
    Ok(buf)
}
