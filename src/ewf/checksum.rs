//! Adler-32, the checksum EWF stores for section descriptors, tables and
//! uncompressed chunks

use adler2::Adler32;

/// Calculate the Adler-32 of `data`, continuing from `initial` (1 for a fresh checksum)
pub fn calculate_adler32(data: &[u8], initial: u32) -> u32 {
    let mut hasher = Adler32::from_checksum(initial);
    hasher.write_slice(data);
    hasher.checksum()
}

/// Adler-32 of `data` from the standard seed
#[inline]
pub fn adler32(data: &[u8]) -> u32 {
    adler2::adler32_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(adler32(b""), 1);
        assert_eq!(adler32(b"Wikipedia"), 0x11e6_0398);
        assert_eq!(adler32(&[0u8; 32768]), 0x8000_0001);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i * 7) as u8).collect();
        let split = calculate_adler32(&data[..12_345], 1);
        assert_eq!(calculate_adler32(&data[12_345..], split), adler32(&data));
        assert_eq!(calculate_adler32(&data, 1), adler32(&data));
    }
}
