//! Signing block editor
//!
//! Inserting an entry rebuilds the whole container in memory:
//!
//! ```text
//! bytes[0, block + 8) ++ [u64 len][u32 id][value] ++ bytes[block + 8, end)
//! ```
//!
//! and then patches the three fields that depend on the block's length: the
//! leading size field, the trailing size field (now at `new directory offset -
//! 24`) and the central directory offset inside the EOCD record.
//!
//! New entries go directly after the leading size field, in front of every
//! existing entry. Readers scanning forward therefore see the most recently
//! inserted entry for an id first, and `extract_entry` returns that one.

use apkmark_core::constants::{
    APK_SIGNATURE_SCHEME_V2_BLOCK_ID, APK_SIG_BLOCK_FOOTER_SIZE, APK_SIG_BLOCK_MAX_SIZE_FIELD,
    APK_SIG_BLOCK_SIZE_FIELD, APK_SIG_ENTRY_HEADER_SIZE, EOCD_CD_OFFSET_FIELD_OFFSET,
};
use apkmark_core::{ApkmarkError, ApkmarkResult, ByteRegion};

use crate::eocd::EndOfDirectoryRecord;
use crate::signing_block::{locate, locate_signing_block, SigningBlockRegion};

/// Return a copy of `container` with `(id, value)` prepended to its signing block.
pub fn insert_entry<R: ByteRegion + ?Sized>(
    container: &R,
    id: u32,
    value: &[u8],
) -> ApkmarkResult<Vec<u8>> {
    let (eocd, block) = locate(container)?;
    let layout = shifted_layout(&eocd, &block, value.len() as u64)?;
    let record_size = layout.record_size;

    let size = container.size();
    let insertion_point = block.offset + APK_SIG_BLOCK_SIZE_FIELD as u64;

    let mut out = Vec::with_capacity((size + record_size) as usize);
    container.feed(0, insertion_point, &mut out)?;
    out.extend_from_slice(&(record_size - APK_SIG_BLOCK_SIZE_FIELD as u64).to_le_bytes());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(value);
    container.feed(insertion_point, size - insertion_point, &mut out)?;

    let size_field = layout.size_field.to_le_bytes();
    patch(&mut out, block.offset as usize, &size_field);
    let trailing = layout.directory_offset as usize - APK_SIG_BLOCK_FOOTER_SIZE;
    patch(&mut out, trailing, &size_field);
    let cd_field = layout.record_offset as usize + EOCD_CD_OFFSET_FIELD_OFFSET;
    patch(&mut out, cd_field, &layout.directory_offset.to_le_bytes());

    tracing::info!(
        id = format_args!("{id:#010x}"),
        value_len = value.len(),
        block_size = layout.size_field + APK_SIG_BLOCK_SIZE_FIELD as u64,
        directory_offset = layout.directory_offset,
        "inserted signing block entry"
    );
    Ok(out)
}

/// Field values after inserting one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShiftedLayout {
    /// Bytes the new entry adds, header included
    record_size: u64,
    /// New value of both block size fields
    size_field: u64,
    directory_offset: u32,
    record_offset: u64,
}

/// Work out where everything lands once a `value_len`-byte entry is added.
///
/// The grown block must still be readable by the locator, and the central
/// directory offset must still fit its 32-bit EOCD field.
fn shifted_layout(
    eocd: &EndOfDirectoryRecord,
    block: &SigningBlockRegion,
    value_len: u64,
) -> ApkmarkResult<ShiftedLayout> {
    let record_size = APK_SIG_ENTRY_HEADER_SIZE as u64 + value_len;

    let size_field = block.size_field() + record_size;
    if size_field > APK_SIG_BLOCK_MAX_SIZE_FIELD {
        return Err(ApkmarkError::OffsetOverflow(format!(
            "signing block size would grow to {size_field}, past the limit of {APK_SIG_BLOCK_MAX_SIZE_FIELD}"
        )));
    }

    let directory_offset = eocd.directory_offset as u64 + record_size;
    let directory_offset = u32::try_from(directory_offset).map_err(|_| {
        ApkmarkError::OffsetOverflow(format!(
            "central directory would move to {directory_offset}, past the 32-bit limit"
        ))
    })?;

    Ok(ShiftedLayout {
        record_size,
        size_field,
        directory_offset,
        record_offset: eocd.record_offset + record_size,
    })
}

/// Value of the first entry with `id`, or `None` when the block has no such entry.
pub fn extract_entry<R: ByteRegion + ?Sized>(
    container: &R,
    id: u32,
) -> ApkmarkResult<Option<Vec<u8>>> {
    let block = locate_signing_block(container)?;
    Ok(block.find(id).map(|entry| entry.value.clone()))
}

/// Return a copy of `container` tagged with a channel number under `block_id`.
pub fn write_channel<R: ByteRegion + ?Sized>(
    container: &R,
    block_id: u32,
    channel: i32,
) -> ApkmarkResult<Vec<u8>> {
    insert_entry(container, block_id, &channel.to_le_bytes())
}

/// Channel number stored under `block_id`, if any.
pub fn read_channel<R: ByteRegion + ?Sized>(
    container: &R,
    block_id: u32,
) -> ApkmarkResult<Option<i32>> {
    let block = locate_signing_block(container)?;
    let Some(entry) = block.find(block_id) else {
        return Ok(None);
    };
    let bytes: [u8; 4] = entry.value.as_slice().try_into().map_err(|_| {
        ApkmarkError::MalformedSigningBlock {
            offset: block.offset,
            reason: format!(
                "channel entry at {} holds {} bytes, expected 4",
                entry.offset,
                entry.value.len()
            ),
        }
    })?;
    Ok(Some(i32::from_le_bytes(bytes)))
}

/// Whether the signing block carries an APK Signature Scheme v2 entry.
pub fn has_v2_signature<R: ByteRegion + ?Sized>(container: &R) -> ApkmarkResult<bool> {
    let block = locate_signing_block(container)?;
    Ok(block.find(APK_SIGNATURE_SCHEME_V2_BLOCK_ID).is_some())
}

fn patch(buf: &mut [u8], at: usize, bytes: &[u8]) {
    buf[at..at + bytes.len()].copy_from_slice(bytes);
}
