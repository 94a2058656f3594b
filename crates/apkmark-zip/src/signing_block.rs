//! APK signing block lookup and parsing
//!
//! The block ends exactly where the central directory begins:
//!
//! ```text
//! offset                                              directory offset
//! v                                                                  v
//! [u64 size][u64 len][u32 id][value] ... [u64 size][magic (16 bytes)]
//! ```
//!
//! `size` counts everything after the leading size field, so the block spans
//! `size + 8` bytes. Both size fields must agree.

use apkmark_core::constants::{
    APK_SIG_BLOCK_FOOTER_SIZE, APK_SIG_BLOCK_MAGIC_HI, APK_SIG_BLOCK_MAGIC_LO, APK_SIG_BLOCK_MAX_SIZE_FIELD,
    APK_SIG_BLOCK_MIN_SIZE, APK_SIG_BLOCK_SIZE_FIELD, APK_SIG_ENTRY_HEADER_SIZE,
};
use apkmark_core::{ApkmarkError, ApkmarkResult, ByteRegion};

use crate::eocd::{locate_eocd, EndOfDirectoryRecord};

/// One `(id, value)` pair stored in the signing block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningBlockEntry {
    pub id: u32,
    /// Absolute offset of the entry's length prefix
    pub offset: u64,
    pub value: Vec<u8>,
}

impl SigningBlockEntry {
    /// Bytes the entry occupies, including its 12-byte header
    pub fn record_size(&self) -> u64 {
        APK_SIG_ENTRY_HEADER_SIZE as u64 + self.value.len() as u64
    }
}

/// A located and parsed signing block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningBlockRegion {
    /// Absolute offset of the leading size field
    pub offset: u64,
    /// Bytes spanned by the block, both size fields and the magic included
    pub total_size: u64,
    /// Entries in file order
    pub entries: Vec<SigningBlockEntry>,
}

impl SigningBlockRegion {
    /// The value stored in each of the two size fields
    pub fn size_field(&self) -> u64 {
        self.total_size - APK_SIG_BLOCK_SIZE_FIELD as u64
    }

    /// Absolute offset of the central directory, which follows the block
    pub fn directory_offset(&self) -> u64 {
        self.offset + self.total_size
    }

    /// First entry with `id`, scanning in file order.
    pub fn find(&self, id: u32) -> Option<&SigningBlockEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}

/// Locate the EOCD record and the signing block in front of the central directory.
pub fn locate<R: ByteRegion + ?Sized>(
    container: &R,
) -> ApkmarkResult<(EndOfDirectoryRecord, SigningBlockRegion)> {
    let eocd = locate_eocd(container)?;
    let block = read_signing_block(container, eocd.directory_offset as u64)?;
    Ok((eocd, block))
}

/// Locate and parse the signing block of `container`.
pub fn locate_signing_block<R: ByteRegion + ?Sized>(
    container: &R,
) -> ApkmarkResult<SigningBlockRegion> {
    locate(container).map(|(_, block)| block)
}

/// Parse the signing block that ends at `directory_offset`.
pub fn read_signing_block<R: ByteRegion + ?Sized>(
    container: &R,
    directory_offset: u64,
) -> ApkmarkResult<SigningBlockRegion> {
    let (offset, size_field) = find_block_bounds(container, directory_offset)?;
    let total_size = size_field + APK_SIG_BLOCK_SIZE_FIELD as u64;

    let entries_start = offset + APK_SIG_BLOCK_SIZE_FIELD as u64;
    let entries_end = directory_offset - APK_SIG_BLOCK_FOOTER_SIZE as u64;
    let entries = parse_entries(container, offset, entries_start, entries_end)?;

    tracing::debug!(
        offset,
        total_size,
        entries = entries.len(),
        "found APK signing block"
    );

    Ok(SigningBlockRegion {
        offset,
        total_size,
        entries,
    })
}

/// Returns the block's absolute offset and the value of its size fields.
fn find_block_bounds<R: ByteRegion + ?Sized>(
    container: &R,
    directory_offset: u64,
) -> ApkmarkResult<(u64, u64)> {
    let not_found = |reason: String| ApkmarkError::SignatureBlockNotFound {
        offset: directory_offset,
        reason,
    };

    if directory_offset < APK_SIG_BLOCK_MIN_SIZE as u64 {
        return Err(not_found(format!(
            "central directory starts at {directory_offset}, too early for a signing block"
        )));
    }

    let footer_offset = directory_offset - APK_SIG_BLOCK_FOOTER_SIZE as u64;
    let size_in_footer = container.read_u64_le(footer_offset)?;
    let magic_lo = container.read_u64_le(footer_offset + 8)?;
    let magic_hi = container.read_u64_le(footer_offset + 16)?;
    if magic_lo != APK_SIG_BLOCK_MAGIC_LO || magic_hi != APK_SIG_BLOCK_MAGIC_HI {
        return Err(not_found(
            "no signing block magic before the central directory".into(),
        ));
    }

    if size_in_footer < APK_SIG_BLOCK_FOOTER_SIZE as u64
        || size_in_footer > APK_SIG_BLOCK_MAX_SIZE_FIELD
    {
        return Err(not_found(format!(
            "signing block size {size_in_footer} out of range"
        )));
    }

    let total_size = size_in_footer + APK_SIG_BLOCK_SIZE_FIELD as u64;
    let Some(offset) = directory_offset.checked_sub(total_size) else {
        return Err(not_found(format!(
            "signing block of {total_size} bytes would start before the file"
        )));
    };

    let size_in_header = container.read_u64_le(offset)?;
    if size_in_header != size_in_footer {
        return Err(not_found(format!(
            "size in header ({size_in_header}) does not match size in footer ({size_in_footer})"
        )));
    }

    Ok((offset, size_in_footer))
}

fn parse_entries<R: ByteRegion + ?Sized>(
    container: &R,
    block_offset: u64,
    start: u64,
    end: u64,
) -> ApkmarkResult<Vec<SigningBlockEntry>> {
    let malformed = |reason: String| ApkmarkError::MalformedSigningBlock {
        offset: block_offset,
        reason,
    };

    let mut entries = Vec::new();
    let mut pos = start;
    while pos < end {
        let remaining = end - pos;
        let index = entries.len();
        if remaining < APK_SIG_BLOCK_SIZE_FIELD as u64 {
            return Err(malformed(format!(
                "entry #{index} at {pos}: {remaining} bytes left, too few for a length prefix"
            )));
        }
        let length = container.read_u64_le(pos)?;
        if length < 4 || length > remaining - APK_SIG_BLOCK_SIZE_FIELD as u64 {
            return Err(malformed(format!(
                "entry #{index} at {pos}: length {length} out of range ({remaining} bytes left)"
            )));
        }
        let id = container.read_u32_le(pos + 8)?;
        let value = container.read_vec(pos + APK_SIG_ENTRY_HEADER_SIZE as u64, length as usize - 4)?;
        tracing::trace!(id = format_args!("{id:#010x}"), offset = pos, length, "signing block entry");

        entries.push(SigningBlockEntry {
            id,
            offset: pos,
            value,
        });
        pos += APK_SIG_BLOCK_SIZE_FIELD as u64 + length;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ContainerBuilder;
    use apkmark_core::constants::APK_SIGNATURE_SCHEME_V2_BLOCK_ID;
    use apkmark_core::MemoryRegion;

    fn signed_apk() -> Vec<u8> {
        ContainerBuilder::new()
            .file("classes.dex", &[0xDE; 300])
            .file("res/raw.bin", b"resource")
            .signing_entry(APK_SIGNATURE_SCHEME_V2_BLOCK_ID, &[0x11; 64])
            .signing_entry(0x4242_4242, b"meta")
            .build()
    }

    #[test]
    fn locates_block_and_entries() {
        let apk = signed_apk();
        let (eocd, block) = locate(&MemoryRegion::new(&apk)).unwrap();

        // size fields + magic + two entries
        assert_eq!(block.total_size, 8 + (12 + 64) + (12 + 4) + 8 + 16);
        assert_eq!(block.directory_offset(), eocd.directory_offset as u64);
        assert_eq!(block.size_field(), block.total_size - 8);
        assert_eq!(block.entries.len(), 2);
        assert_eq!(block.entries[0].id, APK_SIGNATURE_SCHEME_V2_BLOCK_ID);
        assert_eq!(block.entries[0].offset, block.offset + 8);
        assert_eq!(block.entries[1].value, b"meta");
        assert_eq!(block.find(0x4242_4242).unwrap().record_size(), 16);
        assert!(block.find(7).is_none());
    }

    #[test]
    fn empty_block_has_no_entries() {
        let apk = ContainerBuilder::new()
            .file("a", b"a")
            .empty_signing_block()
            .build();
        let block = locate_signing_block(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(block.total_size, APK_SIG_BLOCK_MIN_SIZE as u64);
        assert!(block.entries.is_empty());
    }

    #[test]
    fn unsigned_archive_has_no_block() {
        let apk = ContainerBuilder::new().file("a.txt", b"plain zip").build();
        assert!(matches!(
            locate_signing_block(&MemoryRegion::new(&apk)),
            Err(ApkmarkError::SignatureBlockNotFound { .. })
        ));
    }

    #[test]
    fn any_flipped_magic_byte_hides_the_block() {
        let apk = signed_apk();
        let cd = locate(&MemoryRegion::new(&apk)).unwrap().0.directory_offset as usize;
        for i in cd - 16..cd {
            let mut corrupt = apk.clone();
            corrupt[i] ^= 0x01;
            let err = locate_signing_block(&MemoryRegion::new(&corrupt)).unwrap_err();
            assert!(
                matches!(err, ApkmarkError::SignatureBlockNotFound { .. }),
                "flipping magic byte {i} gave {err:?}"
            );
        }
    }

    #[test]
    fn mismatched_size_fields_are_rejected() {
        let mut apk = signed_apk();
        let block = locate_signing_block(&MemoryRegion::new(&apk)).unwrap();
        let at = block.offset as usize;
        apk[at] = apk[at].wrapping_add(1);
        let err = locate_signing_block(&MemoryRegion::new(&apk)).unwrap_err();
        assert!(matches!(err, ApkmarkError::SignatureBlockNotFound { ref reason, .. } if reason.contains("does not match")));
    }

    #[test]
    fn oversized_footer_size_is_rejected() {
        let mut apk = signed_apk();
        let cd = locate(&MemoryRegion::new(&apk)).unwrap().0.directory_offset as usize;
        apk[cd - 24..cd - 16].copy_from_slice(&(cd as u64).to_le_bytes());
        assert!(matches!(
            locate_signing_block(&MemoryRegion::new(&apk)),
            Err(ApkmarkError::SignatureBlockNotFound { .. })
        ));
    }

    #[test]
    fn entry_overrunning_block_is_malformed() {
        let mut apk = signed_apk();
        let block = locate_signing_block(&MemoryRegion::new(&apk)).unwrap();
        let at = block.entries[1].offset as usize;
        apk[at..at + 8].copy_from_slice(&1000u64.to_le_bytes());
        let err = locate_signing_block(&MemoryRegion::new(&apk)).unwrap_err();
        assert!(matches!(err, ApkmarkError::MalformedSigningBlock { offset, .. } if offset == block.offset));
    }

    #[test]
    fn entry_shorter_than_id_is_malformed() {
        let mut apk = signed_apk();
        let block = locate_signing_block(&MemoryRegion::new(&apk)).unwrap();
        let at = block.entries[0].offset as usize;
        apk[at..at + 8].copy_from_slice(&3u64.to_le_bytes());
        assert!(matches!(
            locate_signing_block(&MemoryRegion::new(&apk)),
            Err(ApkmarkError::MalformedSigningBlock { .. })
        ));
    }
}
