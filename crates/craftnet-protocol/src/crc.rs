//! CRC-32 used by the enveloped wire form.
//!
//! The relay path may re-wrap frames through a textual intermediate, so
//! every enveloped message carries a checksum of its JSON body. The
//! parameters are normative: reflected polynomial `0xEDB88320`, seed
//! `0xFFFFFFFF`, final XOR `0xFFFFFFFF` — any peer implementation must
//! match bit-for-bit to interoperate.

const POLY: u32 = 0xEDB8_8320;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = build_table();

/// Computes the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ TABLE[idx];
    }
    crc ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_standard_check_vector() {
        // The canonical CRC-32 check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc32_empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_crc32_single_bit_flip_changes_checksum() {
        let original = b"{\"type\":\"chat\",\"text\":\"hello\"}".to_vec();
        let base = crc32(&original);
        for byte_idx in 0..original.len() {
            for bit in 0..8 {
                let mut corrupted = original.clone();
                corrupted[byte_idx] ^= 1 << bit;
                assert_ne!(
                    crc32(&corrupted),
                    base,
                    "flip of bit {bit} in byte {byte_idx} went undetected"
                );
            }
        }
    }

    #[test]
    fn test_crc32_is_deterministic() {
        let data = b"the same bytes every time";
        assert_eq!(crc32(data), crc32(data));
    }
}
