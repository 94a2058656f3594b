//! Binary layout constants for APK containers and fs-verity trees
//!
//! All multi-byte fields are little-endian.
//!
//! ```text
//! | ZIP entries | APK signing block | central directory | EOCD (+ comment) |
//!
//! APK signing block:
//! [u64 size][entries ...][u64 size][16-byte magic "APK Sig Block 42"]
//! entry: [u64 length][u32 id][length - 4 bytes value]
//! ```

// ── End of central directory ──────────────────────────────────────────────────

/// End of central directory record signature
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;

/// Size of an EOCD record with an empty comment
pub const EOCD_MIN_SIZE: usize = 22;

/// Offset of the central directory offset field within the EOCD record
pub const EOCD_CD_OFFSET_FIELD_OFFSET: usize = 16;

/// Offset of the comment length field within the EOCD record
pub const EOCD_COMMENT_LENGTH_FIELD_OFFSET: usize = 20;

/// Longest comment a 16-bit length field can describe
pub const EOCD_MAX_COMMENT_SIZE: usize = u16::MAX as usize;

/// ZIP64 end of central directory locator signature
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;

/// Size of the ZIP64 EOCD locator, which immediately precedes the EOCD
pub const ZIP64_EOCD_LOCATOR_SIZE: usize = 20;

// ── APK signing block ─────────────────────────────────────────────────────────

/// Low 64 bits of the signing block magic ("APK Sig ")
pub const APK_SIG_BLOCK_MAGIC_LO: u64 = 0x2067_6953_204b_5041;

/// High 64 bits of the signing block magic ("Block 42")
pub const APK_SIG_BLOCK_MAGIC_HI: u64 = 0x3234_206b_636f_6c42;

/// Smallest possible block: two size fields and the magic
pub const APK_SIG_BLOCK_MIN_SIZE: usize = 32;

/// Size of each of the two block size fields
pub const APK_SIG_BLOCK_SIZE_FIELD: usize = 8;

/// Trailing size field plus magic
pub const APK_SIG_BLOCK_FOOTER_SIZE: usize = 24;

/// Largest value either block size field may hold
pub const APK_SIG_BLOCK_MAX_SIZE_FIELD: u64 = i32::MAX as u64 - APK_SIG_BLOCK_SIZE_FIELD as u64;

/// Entry header: u64 length followed by u32 id
pub const APK_SIG_ENTRY_HEADER_SIZE: usize = 12;

/// APK Signature Scheme v2 entry id
pub const APK_SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109_871a;

/// Entry id carrying a distribution channel number
pub const CHANNEL_BLOCK_ID: u32 = 0x1234_5678;

// ── fs-verity ─────────────────────────────────────────────────────────────────

/// Bytes per verity data block
pub const CHUNK_SIZE: usize = 4096;

/// log2(CHUNK_SIZE)
pub const CHUNK_SIZE_LOG2: u8 = 12;

/// SHA-256 output size
pub const DIGEST_SIZE: usize = 32;

/// log2(CHUNK_SIZE / DIGEST_SIZE)
pub const DIGESTS_PER_CHUNK_LOG2: u8 = 7;

/// Size of a serialized verity header
pub const VERITY_HEADER_SIZE: usize = 64;

/// Verity header magic
pub const VERITY_MAGIC: &[u8; 8] = b"TrueBrew";

/// Hash algorithm id for SHA-256
pub const VERITY_HASH_ALGORITHM_SHA256: u16 = 1;

/// Salt length carried by the verity header
pub const SALT_SIZE: usize = 8;

/// Salt used when the caller does not supply one
pub const DEFAULT_SALT: [u8; SALT_SIZE] = [0u8; SALT_SIZE];

/// Bytes handed to one digest worker at a time (1 MiB)
pub const DEFAULT_REGION_SIZE: usize = 1024 * 1024;

/// Largest single window a region feeds at once
pub const FEED_WINDOW_SIZE: usize = 64 * 1024;

/// Divide and round up to the closest integer.
pub const fn divide_roundup(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor - 1) / divisor
}
