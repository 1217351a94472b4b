//! Hash algorithms available to calculations and to register rehash.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown hash algorithm: {0}")]
pub struct UnknownHashAlgorithm(pub String);

/// Supported hash algorithms, named as in configuration documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// CRC-16/ARC (poly 0x8005, reflected, init 0).
    Crc16,
    /// CRC-32 (IEEE 802.3).
    Crc32,
    /// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF).
    CrcCcitt,
    /// One's complement internet checksum.
    Csum16,
    /// Leading 8 bytes as a big-endian integer.
    Identity,
    /// XOR of big-endian 16-bit words.
    Xor16,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 6] = [
        HashAlgorithm::Crc16,
        HashAlgorithm::Crc32,
        HashAlgorithm::CrcCcitt,
        HashAlgorithm::Csum16,
        HashAlgorithm::Identity,
        HashAlgorithm::Xor16,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Crc16 => "crc16",
            Self::Crc32 => "crc32",
            Self::CrcCcitt => "crcCCITT",
            Self::Csum16 => "csum16",
            Self::Identity => "identity",
            Self::Xor16 => "xor16",
        }
    }

    pub fn compute(&self, input: &[u8]) -> u64 {
        match self {
            Self::Crc16 => u64::from(crc16_arc(input)),
            Self::Crc32 => u64::from(crc32fast::hash(input)),
            Self::CrcCcitt => u64::from(crc16_ccitt_false(input)),
            Self::Csum16 => u64::from(csum16(input)),
            Self::Identity => input
                .iter()
                .take(8)
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
            Self::Xor16 => u64::from(xor16(input)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|algo| algo.name() == s)
            .ok_or_else(|| UnknownHashAlgorithm(s.to_string()))
    }
}

fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    crc
}

fn crc16_ccitt_false(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

// Odd trailing byte is padded with a zero low byte.
fn words(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    data.chunks(2).map(|chunk| {
        let hi = u16::from(chunk[0]) << 8;
        let lo = chunk.get(1).copied().map(u16::from).unwrap_or(0);
        hi | lo
    })
}

fn csum16(data: &[u8]) -> u16 {
    let mut sum: u32 = words(data).map(u32::from).sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn xor16(data: &[u8]) -> u16 {
    words(data).fold(0, |acc, w| acc ^ w)
}

/// Packs `(value, bitwidth)` pairs MSB-first into bytes, left-padding the
/// result with zero bits up to a byte boundary.
///
/// This is the byte string calculations hash for their input fields, and
/// the one rehash uses for a single recorded value.
pub fn pack_fields(fields: &[(u64, u32)]) -> Vec<u8> {
    let total: usize = fields.iter().map(|(_, width)| *width as usize).sum();
    let nbytes = total.div_ceil(8);
    let mut out = vec![0u8; nbytes];
    let mut bit = nbytes * 8 - total;

    for &(value, width) in fields {
        for i in (0..width).rev() {
            if (value >> i) & 1 == 1 {
                out[bit / 8] |= 0x80 >> (bit % 8);
            }
            bit += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_crc_check_values() {
        assert_eq!(HashAlgorithm::Crc16.compute(CHECK), 0xBB3D);
        assert_eq!(HashAlgorithm::Crc32.compute(CHECK), 0xCBF4_3926);
        assert_eq!(HashAlgorithm::CrcCcitt.compute(CHECK), 0x29B1);
    }

    #[test]
    fn test_csum16_rfc1071_example() {
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(HashAlgorithm::Csum16.compute(&data), 0x220d);
    }

    #[test]
    fn test_identity_and_xor16() {
        assert_eq!(
            HashAlgorithm::Identity.compute(&[0xc0, 0xa8, 0x07, 0x02]),
            0xc0a8_0702
        );
        assert_eq!(
            HashAlgorithm::Xor16.compute(&[0xc0, 0xa8, 0x07, 0x02]),
            0xc0a8 ^ 0x0702
        );
        assert_eq!(HashAlgorithm::Xor16.compute(&[0x12]), 0x1200);
    }

    #[test]
    fn test_parse_names() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(algo.name().parse::<HashAlgorithm>(), Ok(algo));
        }
        assert_eq!(
            "crccccccc32".parse::<HashAlgorithm>(),
            Err(UnknownHashAlgorithm("crccccccc32".to_string()))
        );
        assert!("CRC16".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_pack_fields() {
        assert_eq!(pack_fields(&[(0xc0a8_0702, 32)]), vec![0xc0, 0xa8, 0x07, 0x02]);
        // 4 + 8 bits, left padded to 2 bytes
        assert_eq!(pack_fields(&[(0x4, 4), (0x5a, 8)]), vec![0x04, 0x5a]);
        assert_eq!(pack_fields(&[(1, 1)]), vec![0x01]);
        assert!(pack_fields(&[]).is_empty());
    }
}
