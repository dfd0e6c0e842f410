//! CRC-32C (Castagnoli) as ext4 stores it.
//!
//! The running value starts at `0xFFFF_FFFF` and is returned without the
//! final inversion that the usual CRC-32C convention applies. This is the
//! raw `crc32c_le(~0, ...)` form the kernel's `ext4_chksum` writes into
//! metadata, so `ext4_crc32c(data) == !crc32c::crc32c(data)`.

/// Reflected form of the Castagnoli polynomial `0x1EDC6F41`.
pub const CRC32C_POLY_REFLECTED: u32 = 0x82F6_3B78;

/// Initial running value.
pub const CRC32C_INIT: u32 = 0xFFFF_FFFF;

static CRC32C_TABLE: [u32; 256] = build_table();

#[allow(clippy::cast_possible_truncation)] // i < 256
const fn build_table() -> [u32; 256] {
    let mut table = [0_u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ CRC32C_POLY_REFLECTED;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Continue a checksum from `seed` over `data`.
#[must_use]
pub fn ext4_crc32c_update(seed: u32, data: &[u8]) -> u32 {
    data.iter().fold(seed, |crc, &byte| {
        let idx = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        (crc >> 8) ^ CRC32C_TABLE[idx]
    })
}

/// Checksum `data` from the standard initial value, without final inversion.
#[must_use]
pub fn ext4_crc32c(data: &[u8]) -> u32 {
    ext4_crc32c_update(CRC32C_INIT, data)
}
