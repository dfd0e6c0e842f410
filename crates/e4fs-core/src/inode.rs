#![forbid(unsafe_code)]
//! Inode number to inode record resolution.

use crate::Ext4Geometry;
use e4fs_block::{ByteDevice, read_raw};
use e4fs_error::{E4Error, Result};
use e4fs_ondisk::{Ext4GroupDesc, Ext4Inode};
use e4fs_types::{ByteOffset, GroupNumber, InodeNumber};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Position of an inode record on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeLocation {
    pub group: GroupNumber,
    /// Zero-based slot within the group's inode table.
    pub index: u32,
    pub offset: ByteOffset,
}

/// Compute where inode `ino` lives.
///
/// Only the low 32 bits of the inode table pointer are used.
pub fn locate_inode(
    geometry: &Ext4Geometry,
    gdt: &[Ext4GroupDesc],
    ino: InodeNumber,
) -> Result<InodeLocation> {
    if ino.0 == 0 {
        return Err(E4Error::InvalidArgument("inode 0 does not exist".to_owned()));
    }

    if geometry.inodes_per_group == 0 {
        return Err(E4Error::CorruptFilesystem(
            "geometry has zero inodes per group".to_owned(),
        ));
    }
    let per_group = u64::from(geometry.inodes_per_group);
    let group = (ino.0 - 1) / per_group;
    let index = (ino.0 - 1) % per_group;

    let desc = usize::try_from(group)
        .ok()
        .filter(|_| group < u64::from(geometry.groups_count))
        .and_then(|g| gdt.get(g))
        .ok_or_else(|| {
            E4Error::InvalidArgument(format!(
                "inode {ino} is in group {group}, image has {} groups",
                geometry.groups_count
            ))
        })?;

    let table = u64::from(desc.inode_table_lo);
    let offset = table
        .checked_mul(u64::from(geometry.block_size))
        .and_then(|base| base.checked_add(index * u64::from(geometry.inode_record_size)))
        .map(ByteOffset)
        .ok_or_else(|| {
            E4Error::CorruptFilesystem(format!(
                "inode {ino}: table block {table} offset overflows"
            ))
        })?;

    // Both fit: group < groups_count (u32) and index < inodes_per_group (u32).
    let location = InodeLocation {
        group: GroupNumber(u32::try_from(group).unwrap_or(u32::MAX)),
        index: u32::try_from(index).unwrap_or(u32::MAX),
        offset,
    };
    trace!(ino = ino.0, ?location, "located inode");
    Ok(location)
}

/// Read and decode the inode record at `location`.
pub fn read_inode_at(
    dev: &dyn ByteDevice,
    location: &InodeLocation,
    record_size: u32,
) -> Result<Ext4Inode> {
    let len = usize::try_from(record_size)
        .map_err(|_| E4Error::Parse(format!("inode record size {record_size} overflows")))?;
    let raw = read_raw(dev, location.offset, len)?;
    Ext4Inode::parse_from_bytes(&raw).map_err(|e| E4Error::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn geometry(inodes_per_group: u32, groups_count: u32) -> Ext4Geometry {
        Ext4Geometry {
            block_size: 4096,
            blocks_count: u64::from(groups_count) * 32_768,
            blocks_per_group: 32_768,
            inodes_count: inodes_per_group * groups_count,
            inodes_per_group,
            groups_count,
            first_data_block: 0,
            inode_record_size: 256,
        }
    }

    fn gdt(tables: &[u32]) -> Vec<Ext4GroupDesc> {
        tables
            .iter()
            .map(|&t| {
                let mut raw = [0_u8; 64];
                raw[8..12].copy_from_slice(&t.to_le_bytes());
                Ext4GroupDesc::parse_from_bytes(&raw, 64).expect("gd")
            })
            .collect()
    }

    #[test]
    fn root_inode_is_second_slot_of_group_zero() {
        let loc = locate_inode(&geometry(8192, 2), &gdt(&[5, 40]), InodeNumber::ROOT).unwrap();
        assert_eq!(loc.group, GroupNumber(0));
        assert_eq!(loc.index, 1);
        assert_eq!(loc.offset, ByteOffset(5 * 4096 + 256));
    }

    #[test]
    fn first_inode_of_second_group() {
        let loc = locate_inode(&geometry(8192, 2), &gdt(&[5, 40]), InodeNumber(8193)).unwrap();
        assert_eq!(loc.group, GroupNumber(1));
        assert_eq!(loc.index, 0);
        assert_eq!(loc.offset, ByteOffset(40 * 4096));
    }

    #[test]
    fn inode_zero_and_beyond_last_group_rejected() {
        let geo = geometry(8192, 2);
        let table = gdt(&[5, 40]);
        assert!(matches!(
            locate_inode(&geo, &table, InodeNumber(0)),
            Err(E4Error::InvalidArgument(_))
        ));
        assert!(matches!(
            locate_inode(&geo, &table, InodeNumber(2 * 8192 + 1)),
            Err(E4Error::InvalidArgument(_))
        ));
        assert!(locate_inode(&geo, &table, InodeNumber(2 * 8192)).is_ok());
        assert!(matches!(
            locate_inode(&geo, &table, InodeNumber(u64::MAX)),
            Err(E4Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_inodes_per_group_is_corrupt() {
        let geo = geometry(0, 1);
        assert!(matches!(
            locate_inode(&geo, &gdt(&[5]), InodeNumber::ROOT),
            Err(E4Error::CorruptFilesystem(_))
        ));
    }

    #[test]
    fn honors_record_size() {
        let mut geo = geometry(8192, 1);
        geo.inode_record_size = 128;
        let loc = locate_inode(&geo, &gdt(&[5]), InodeNumber(11)).unwrap();
        assert_eq!(loc.offset, ByteOffset(5 * 4096 + 10 * 128));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn location_inverts_to_inode_number(
            per_group in 1_u32..20_000,
            groups in 1_u32..8,
            pick in any::<u64>(),
        ) {
            let geo = geometry(per_group, groups);
            let tables: Vec<u32> = (0..groups).map(|g| 10 + g * 1000).collect();
            let table = gdt(&tables);
            let ino = 1 + pick % (u64::from(per_group) * u64::from(groups));

            let loc = locate_inode(&geo, &table, InodeNumber(ino)).unwrap();
            prop_assert_eq!(
                u64::from(loc.group.0) * u64::from(per_group) + u64::from(loc.index) + 1,
                ino
            );
            let base = u64::from(tables[loc.group.0 as usize]) * 4096;
            prop_assert_eq!(loc.offset.0, base + u64::from(loc.index) * 256);
        }
    }
}
