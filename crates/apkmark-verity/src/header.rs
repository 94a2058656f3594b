//! 64-byte fs-verity header
//!
//! ```text
//!  0  magic "TrueBrew"            8 bytes
//!  8  major version (1)           u8
//!  9  minor version (0)           u8
//! 10  log2(block size) (12)       u8
//! 11  log2(digests per block) (7) u8
//! 12  meta hash algorithm (1)     u16
//! 14  data hash algorithm (1)     u16
//! 16  flags (0)                   u32
//! 20  reserved                    u32
//! 24  content size                u64
//! 32  authenticated extensions    u8
//! 33  unauthenticated extensions  u8
//! 34  salt                        8 bytes
//! 42  reserved                    22 bytes
//! ```

use apkmark_core::constants::{
    CHUNK_SIZE_LOG2, DIGESTS_PER_CHUNK_LOG2, SALT_SIZE, VERITY_HASH_ALGORITHM_SHA256,
    VERITY_HEADER_SIZE, VERITY_MAGIC,
};
use apkmark_core::{ApkmarkError, ApkmarkResult};
use serde::Serialize;

const MAJOR_VERSION: u8 = 1;
const MINOR_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VerityHeader {
    pub salt: [u8; SALT_SIZE],
    pub content_size: u64,
}

impl VerityHeader {
    pub fn new(salt: [u8; SALT_SIZE], content_size: u64) -> Self {
        Self { salt, content_size }
    }

    pub fn to_bytes(&self) -> [u8; VERITY_HEADER_SIZE] {
        let mut out = [0u8; VERITY_HEADER_SIZE];
        out[0..8].copy_from_slice(VERITY_MAGIC);
        out[8] = MAJOR_VERSION;
        out[9] = MINOR_VERSION;
        out[10] = CHUNK_SIZE_LOG2;
        out[11] = DIGESTS_PER_CHUNK_LOG2;
        out[12..14].copy_from_slice(&VERITY_HASH_ALGORITHM_SHA256.to_le_bytes());
        out[14..16].copy_from_slice(&VERITY_HASH_ALGORITHM_SHA256.to_le_bytes());
        out[24..32].copy_from_slice(&self.content_size.to_le_bytes());
        out[34..42].copy_from_slice(&self.salt);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> ApkmarkResult<Self> {
        let invalid = |msg: String| ApkmarkError::InvalidVerityHeader(msg);

        if bytes.len() < VERITY_HEADER_SIZE {
            return Err(invalid(format!("{} bytes, need {VERITY_HEADER_SIZE}", bytes.len())));
        }
        if &bytes[0..8] != VERITY_MAGIC {
            return Err(invalid("bad magic".into()));
        }
        if bytes[8] != MAJOR_VERSION {
            return Err(invalid(format!("unsupported major version {}", bytes[8])));
        }
        if bytes[10] != CHUNK_SIZE_LOG2 || bytes[11] != DIGESTS_PER_CHUNK_LOG2 {
            return Err(invalid(format!(
                "unsupported geometry: log2 block {}, log2 arity {}",
                bytes[10], bytes[11]
            )));
        }
        let meta = u16::from_le_bytes([bytes[12], bytes[13]]);
        let data = u16::from_le_bytes([bytes[14], bytes[15]]);
        if meta != VERITY_HASH_ALGORITHM_SHA256 || data != VERITY_HASH_ALGORITHM_SHA256 {
            return Err(invalid(format!("unsupported hash algorithms {meta}/{data}")));
        }

        let mut size = [0u8; 8];
        size.copy_from_slice(&bytes[24..32]);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[34..42]);
        Ok(Self {
            salt,
            content_size: u64::from_le_bytes(size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_fsverity_v1() {
        let header = VerityHeader::new([1, 2, 3, 4, 5, 6, 7, 8], 0x0102_0304_0506);
        let bytes = header.to_bytes();

        assert_eq!(&bytes[0..8], b"TrueBrew");
        assert_eq!(bytes[8..12], [1, 0, 12, 7]);
        assert_eq!(bytes[12..16], [1, 0, 1, 0]);
        assert_eq!(bytes[16..24], [0u8; 8]);
        assert_eq!(bytes[24..32], 0x0102_0304_0506u64.to_le_bytes());
        assert_eq!(bytes[32..34], [0, 0]);
        assert_eq!(bytes[34..42], [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bytes[42..], [0u8; 22]);
    }

    #[test]
    fn parses_what_it_writes() {
        let header = VerityHeader::new([9; SALT_SIZE], 12345);
        assert_eq!(VerityHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn rejects_foreign_headers() {
        let good = VerityHeader::new([0; SALT_SIZE], 1).to_bytes();

        let mut bad_magic = good;
        bad_magic[0] = b't';
        assert!(VerityHeader::from_bytes(&bad_magic).is_err());

        let mut bad_block = good;
        bad_block[10] = 16;
        assert!(VerityHeader::from_bytes(&bad_block).is_err());

        let mut bad_alg = good;
        bad_alg[12] = 2;
        assert!(matches!(
            VerityHeader::from_bytes(&bad_alg),
            Err(ApkmarkError::InvalidVerityHeader(_))
        ));

        assert!(VerityHeader::from_bytes(&good[..63]).is_err());
    }
}
