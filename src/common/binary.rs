// Shared binary decoding utilities for EWF structures
//
// Sections are read into memory in one go and decoded from byte slices;
// every accessor is bounds-checked and little-endian.

use crate::ewf::{EwfError, EwfResult};

// =============================================================================
// Slice Readers
// =============================================================================

fn slice_at<'a>(data: &'a [u8], offset: usize, length: usize) -> EwfResult<&'a [u8]> {
    offset
        .checked_add(length)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            EwfError::invalid_format(
                "binary::read",
                format!(
                    "{} bytes at offset {} exceed buffer of {} bytes",
                    length,
                    offset,
                    data.len()
                ),
            )
        })
}

/// Read u8 at specific offset
pub fn read_u8_at(data: &[u8], offset: usize) -> EwfResult<u8> {
    Ok(slice_at(data, offset, 1)?[0])
}

/// Read u16 little-endian at specific offset
pub fn read_u16_le_at(data: &[u8], offset: usize) -> EwfResult<u16> {
    let bytes = slice_at(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 little-endian at specific offset
pub fn read_u32_le_at(data: &[u8], offset: usize) -> EwfResult<u32> {
    let bytes = slice_at(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read u64 little-endian at specific offset
pub fn read_u64_le_at(data: &[u8], offset: usize) -> EwfResult<u64> {
    let bytes = slice_at(data, offset, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// Borrow `length` bytes at `offset`
pub fn read_bytes_at(data: &[u8], offset: usize, length: usize) -> EwfResult<&[u8]> {
    slice_at(data, offset, length)
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Convert bytes to null-terminated string
pub fn bytes_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).to_string()
}
