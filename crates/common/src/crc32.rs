//! IEEE CRC-32 for legacy checksum fields.
//!
//! CRC-32 detects accidental corruption only; collisions are trivial to
//! forge. Nothing that claims forensic integrity may rely on it.

use flate2::Crc;

/// Compute the CRC-32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(data);
    crc.sum()
}

/// CRC-32 as 8 lowercase hex characters.
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32(data))
}

/// Check data against an expected hex CRC-32 (case-insensitive).
pub fn verify_crc32(data: &[u8], expected: &str) -> bool {
    let expected = expected.trim().trim_start_matches("0x");
    u32::from_str_radix(expected, 16)
        .map(|e| e == crc32(data))
        .unwrap_or(false)
}
