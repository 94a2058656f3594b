//! End of central directory lookup
//!
//! The EOCD record sits at the very end of the archive, followed only by an
//! optional comment of up to 65535 bytes. We scan backward from the position
//! implied by an empty comment and accept the first candidate whose comment
//! length field reaches exactly to EOF, so the match nearest the end wins.

use apkmark_core::constants::{
    EOCD_CD_OFFSET_FIELD_OFFSET, EOCD_COMMENT_LENGTH_FIELD_OFFSET, EOCD_MAX_COMMENT_SIZE,
    EOCD_MIN_SIZE, EOCD_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE, ZIP64_EOCD_LOCATOR_SIZE,
};
use apkmark_core::{ApkmarkError, ApkmarkResult, ByteRegion};
use serde::Serialize;

/// Offset of the central directory size field within the EOCD record
const EOCD_CD_SIZE_FIELD_OFFSET: usize = 12;

/// The fields of the EOCD record that locating the signing block needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndOfDirectoryRecord {
    /// Always `EOCD_SIGNATURE`
    pub signature: u32,
    /// Absolute offset of the central directory
    pub directory_offset: u32,
    /// Size of the central directory in bytes
    pub directory_size: u32,
    /// Absolute offset of the record itself
    pub record_offset: u64,
    /// Length of the trailing comment
    pub comment_length: u16,
}

impl EndOfDirectoryRecord {
    /// Absolute offset of the central directory offset field
    pub fn directory_offset_field(&self) -> u64 {
        self.record_offset + EOCD_CD_OFFSET_FIELD_OFFSET as u64
    }
}

/// Find the EOCD record without any further validation.
pub fn find_eocd<R: ByteRegion + ?Sized>(container: &R) -> ApkmarkResult<EndOfDirectoryRecord> {
    let size = container.size();
    if size < EOCD_MIN_SIZE as u64 {
        return Err(ApkmarkError::UnsupportedContainerFormat(format!(
            "{size} bytes is too small for an end of central directory record"
        )));
    }

    let max_comment = (size - EOCD_MIN_SIZE as u64).min(EOCD_MAX_COMMENT_SIZE as u64) as usize;
    let tail_len = EOCD_MIN_SIZE + max_comment;
    let tail_start = size - tail_len as u64;
    let tail = container.read_vec(tail_start, tail_len)?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    for comment_len in 0..=max_comment {
        let pos = tail_len - EOCD_MIN_SIZE - comment_len;
        if tail[pos..pos + 4] != signature {
            continue;
        }
        let field = pos + EOCD_COMMENT_LENGTH_FIELD_OFFSET;
        let recorded = u16::from_le_bytes([tail[field], tail[field + 1]]) as usize;
        if recorded != comment_len {
            tracing::trace!(
                offset = tail_start + pos as u64,
                recorded,
                expected = comment_len,
                "skipping EOCD signature with inconsistent comment length"
            );
            continue;
        }

        let record = EndOfDirectoryRecord {
            signature: EOCD_SIGNATURE,
            directory_offset: le_u32(&tail, pos + EOCD_CD_OFFSET_FIELD_OFFSET),
            directory_size: le_u32(&tail, pos + EOCD_CD_SIZE_FIELD_OFFSET),
            record_offset: tail_start + pos as u64,
            comment_length: comment_len as u16,
        };
        tracing::debug!(
            record_offset = record.record_offset,
            directory_offset = record.directory_offset,
            comment_length = comment_len,
            "found end of central directory"
        );
        return Ok(record);
    }

    Err(ApkmarkError::UnsupportedContainerFormat(
        "no end of central directory record".into(),
    ))
}

/// Find the EOCD record and check that the container is a plain (non-ZIP64)
/// archive whose central directory ends right where the record begins.
pub fn locate_eocd<R: ByteRegion + ?Sized>(container: &R) -> ApkmarkResult<EndOfDirectoryRecord> {
    let record = find_eocd(container)?;

    if is_zip64_locator_present(container, record.record_offset)? {
        return Err(ApkmarkError::UnsupportedContainerFormat(
            "ZIP64 archives are not supported".into(),
        ));
    }

    let cd_offset = record.directory_offset as u64;
    if cd_offset > record.record_offset {
        return Err(ApkmarkError::UnsupportedContainerFormat(format!(
            "central directory offset {cd_offset} is past the EOCD record at {}",
            record.record_offset
        )));
    }
    if cd_offset + record.directory_size as u64 != record.record_offset {
        return Err(ApkmarkError::UnsupportedContainerFormat(format!(
            "central directory ({cd_offset}+{}) is not immediately followed by the EOCD record at {}",
            record.directory_size, record.record_offset
        )));
    }

    Ok(record)
}

/// Whether a ZIP64 EOCD locator immediately precedes the EOCD record.
pub fn is_zip64_locator_present<R: ByteRegion + ?Sized>(
    container: &R,
    record_offset: u64,
) -> ApkmarkResult<bool> {
    let Some(locator) = record_offset.checked_sub(ZIP64_EOCD_LOCATOR_SIZE as u64) else {
        return Ok(false);
    };
    Ok(container.read_u32_le(locator)? == ZIP64_EOCD_LOCATOR_SIGNATURE)
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ContainerBuilder;
    use apkmark_core::MemoryRegion;

    #[test]
    fn finds_record_without_comment() {
        let apk = ContainerBuilder::new().file("a.txt", b"hello").build();
        let record = locate_eocd(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(record.record_offset, apk.len() as u64 - EOCD_MIN_SIZE as u64);
        assert_eq!(record.comment_length, 0);
        assert_eq!(record.signature, EOCD_SIGNATURE);
    }

    #[test]
    fn finds_record_behind_comment() {
        let apk = ContainerBuilder::new()
            .file("a.txt", b"hello")
            .comment(b"built by apkmark")
            .build();
        let record = locate_eocd(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(record.comment_length, 16);
        assert_eq!(
            record.record_offset,
            apk.len() as u64 - EOCD_MIN_SIZE as u64 - 16
        );
    }

    #[test]
    fn ignores_signature_bytes_inside_comment() {
        let mut comment = EOCD_SIGNATURE.to_le_bytes().to_vec();
        comment.extend_from_slice(&[0xAB; 40]);
        let apk = ContainerBuilder::new()
            .file("a.txt", b"hello")
            .comment(&comment)
            .build();
        let record = locate_eocd(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(record.comment_length as usize, comment.len());
    }

    fn eocd_bytes(directory_size: u32, directory_offset: u32, comment_length: u16) -> Vec<u8> {
        let mut record = EOCD_SIGNATURE.to_le_bytes().to_vec();
        record.extend_from_slice(&[0; 8]);
        record.extend_from_slice(&directory_size.to_le_bytes());
        record.extend_from_slice(&directory_offset.to_le_bytes());
        record.extend_from_slice(&comment_length.to_le_bytes());
        assert_eq!(record.len(), EOCD_MIN_SIZE);
        record
    }

    #[test]
    fn record_nearest_the_end_wins() {
        let builder = ContainerBuilder::new().file("a.txt", b"hello");
        let plain = builder.build();
        let real = locate_eocd(&MemoryRegion::new(&plain)).unwrap();

        // the comment ends with a second record claiming an empty comment
        let fake = eocd_bytes(real.directory_size, real.directory_offset, 0);
        let apk = builder.clone().comment(&fake).build();
        let region = MemoryRegion::new(&apk);

        let found = find_eocd(&region).unwrap();
        assert_eq!(found.record_offset, apk.len() as u64 - EOCD_MIN_SIZE as u64);
        assert_eq!(found.record_offset, plain.len() as u64);
        assert_eq!(found.comment_length, 0);

        // its directory no longer ends where the record starts
        assert!(matches!(
            locate_eocd(&region),
            Err(ApkmarkError::UnsupportedContainerFormat(ref m)) if m.contains("not immediately followed")
        ));
    }

    #[test]
    fn consistent_record_inside_comment_is_accepted() {
        let builder = ContainerBuilder::new().file("a.txt", b"hello");
        let plain = builder.build();
        let real = locate_eocd(&MemoryRegion::new(&plain)).unwrap();

        // directory size stretched over the real record so it ends at the fake one
        let fake = eocd_bytes(
            real.directory_size + EOCD_MIN_SIZE as u32,
            real.directory_offset,
            0,
        );
        let apk = builder.clone().comment(&fake).build();

        let record = locate_eocd(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(record.record_offset, plain.len() as u64);
        assert_eq!(record.directory_offset, real.directory_offset);
        assert_eq!(record.directory_size, real.directory_size + EOCD_MIN_SIZE as u32);
    }

    #[test]
    fn accepts_maximum_comment() {
        let comment = vec![b'x'; EOCD_MAX_COMMENT_SIZE];
        let apk = ContainerBuilder::new()
            .file("a.txt", b"hello")
            .comment(&comment)
            .build();
        let record = locate_eocd(&MemoryRegion::new(&apk)).unwrap();
        assert_eq!(record.comment_length as usize, EOCD_MAX_COMMENT_SIZE);
    }

    #[test]
    fn rejects_non_archives() {
        let junk = vec![0u8; 100];
        assert!(matches!(
            find_eocd(&MemoryRegion::new(&junk)),
            Err(ApkmarkError::UnsupportedContainerFormat(_))
        ));
        assert!(matches!(
            find_eocd(&MemoryRegion::new(&junk[..10])),
            Err(ApkmarkError::UnsupportedContainerFormat(_))
        ));
    }

    #[test]
    fn rejects_zip64() {
        let apk = ContainerBuilder::new()
            .file("a.txt", b"hello")
            .zip64_locator()
            .build();
        let region = MemoryRegion::new(&apk);
        let record = find_eocd(&region).unwrap();
        assert!(is_zip64_locator_present(&region, record.record_offset).unwrap());
        let err = locate_eocd(&region).unwrap_err();
        assert!(matches!(err, ApkmarkError::UnsupportedContainerFormat(ref m) if m.contains("ZIP64")));
    }

    #[test]
    fn rejects_directory_offset_past_record() {
        let mut apk = ContainerBuilder::new().file("a.txt", b"hello").build();
        let field = apk.len() - EOCD_MIN_SIZE + EOCD_CD_OFFSET_FIELD_OFFSET;
        apk[field..field + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            locate_eocd(&MemoryRegion::new(&apk)),
            Err(ApkmarkError::UnsupportedContainerFormat(_))
        ));
    }
}
