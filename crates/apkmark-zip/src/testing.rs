//! Synthetic APK containers for tests and benchmarks
//!
//! Produces a stored (uncompressed) ZIP with real local headers, central
//! directory and EOCD record, optionally with a signing block, a trailing
//! comment or a ZIP64 locator. CRCs and timestamps are left zero.

use apkmark_core::constants::{
    APK_SIG_BLOCK_MAGIC_HI, APK_SIG_BLOCK_MAGIC_LO, EOCD_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE,
};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;

#[derive(Debug, Default, Clone)]
pub struct ContainerBuilder {
    files: Vec<(String, Vec<u8>)>,
    signing_block: Option<Vec<(u32, Vec<u8>)>>,
    comment: Vec<u8>,
    zip64_locator: bool,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.files.push((name.to_string(), data.to_vec()));
        self
    }

    /// Add an entry to the signing block, creating the block if needed.
    pub fn signing_entry(mut self, id: u32, value: &[u8]) -> Self {
        self.signing_block
            .get_or_insert_with(Vec::new)
            .push((id, value.to_vec()));
        self
    }

    /// Emit a signing block with no entries.
    pub fn empty_signing_block(mut self) -> Self {
        self.signing_block.get_or_insert_with(Vec::new);
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Place a ZIP64 EOCD locator in front of the EOCD record.
    pub fn zip64_locator(mut self) -> Self {
        self.zip64_locator = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut local_offsets = Vec::with_capacity(self.files.len());

        for (name, data) in &self.files {
            local_offsets.push(out.len() as u32);
            put_u32(&mut out, LOCAL_HEADER_SIGNATURE);
            put_u16(&mut out, 20); // version needed
            put_u16(&mut out, 0); // flags
            put_u16(&mut out, 0); // stored
            put_u32(&mut out, 0); // time + date
            put_u32(&mut out, 0); // crc32
            put_u32(&mut out, data.len() as u32);
            put_u32(&mut out, data.len() as u32);
            put_u16(&mut out, name.len() as u16);
            put_u16(&mut out, 0); // extra length
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);
        }

        if let Some(entries) = &self.signing_block {
            out.extend_from_slice(&signing_block(entries));
        }

        let cd_offset = out.len() as u32;
        for ((name, data), local) in self.files.iter().zip(&local_offsets) {
            put_u32(&mut out, CENTRAL_HEADER_SIGNATURE);
            put_u16(&mut out, 20); // version made by
            put_u16(&mut out, 20); // version needed
            put_u16(&mut out, 0);
            put_u16(&mut out, 0);
            put_u32(&mut out, 0);
            put_u32(&mut out, 0);
            put_u32(&mut out, data.len() as u32);
            put_u32(&mut out, data.len() as u32);
            put_u16(&mut out, name.len() as u16);
            put_u16(&mut out, 0); // extra length
            put_u16(&mut out, 0); // comment length
            put_u16(&mut out, 0); // disk number
            put_u16(&mut out, 0); // internal attributes
            put_u32(&mut out, 0); // external attributes
            put_u32(&mut out, *local);
            out.extend_from_slice(name.as_bytes());
        }
        let cd_size = out.len() as u32 - cd_offset;

        if self.zip64_locator {
            put_u32(&mut out, ZIP64_EOCD_LOCATOR_SIGNATURE);
            put_u32(&mut out, 0);
            out.extend_from_slice(&0u64.to_le_bytes());
            put_u32(&mut out, 1);
        }

        put_u32(&mut out, EOCD_SIGNATURE);
        put_u16(&mut out, 0);
        put_u16(&mut out, 0);
        put_u16(&mut out, self.files.len() as u16);
        put_u16(&mut out, self.files.len() as u16);
        put_u32(&mut out, cd_size);
        put_u32(&mut out, cd_offset);
        put_u16(&mut out, self.comment.len() as u16);
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Serialize a signing block holding `entries` in order.
pub fn signing_block(entries: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, value) in entries {
        body.extend_from_slice(&(4 + value.len() as u64).to_le_bytes());
        put_u32(&mut body, *id);
        body.extend_from_slice(value);
    }
    let size = body.len() as u64 + 8 + 16;

    let mut block = Vec::with_capacity(body.len() + 32);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(&body);
    block.extend_from_slice(&size.to_le_bytes());
    block.extend_from_slice(&APK_SIG_BLOCK_MAGIC_LO.to_le_bytes());
    block.extend_from_slice(&APK_SIG_BLOCK_MAGIC_HI.to_le_bytes());
    block
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}
