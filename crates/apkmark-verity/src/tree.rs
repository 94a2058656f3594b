//! fs-verity Merkle tree construction
//!
//! Level 0 holds one salted digest per 4096-byte chunk of content (the last
//! partial chunk zero-padded). Each further level digests the previous one,
//! until a level fits in a single chunk. Every level is zero-padded to a
//! chunk boundary. The root hash is the salted digest of the top level.
//!
//! Serialized verity data is the 64-byte header followed by the levels, top
//! level first:
//!
//! ```text
//! [header][level n-1][level n-2] ... [level 0]
//! ```

use apkmark_core::constants::{
    divide_roundup, CHUNK_SIZE, DEFAULT_REGION_SIZE, DIGEST_SIZE, SALT_SIZE,
};
use apkmark_core::{ApkmarkError, ApkmarkResult, ByteRegion, MemoryRegion};
use rayon::prelude::*;

use crate::digester::ChunkDigester;
use crate::header::VerityHeader;

/// How content digests are scheduled
#[derive(Debug, Clone, Copy)]
pub struct TreeOptions {
    /// Digest content regions on the rayon pool
    pub parallel: bool,
    /// Bytes fed to each worker; a positive multiple of `CHUNK_SIZE`
    pub region_size: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            region_size: DEFAULT_REGION_SIZE,
        }
    }
}

/// A complete verity tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerityResult {
    pub header: VerityHeader,
    /// Levels, top (closest to the root) first, each a multiple of `CHUNK_SIZE`
    pub levels: Vec<Vec<u8>>,
    pub root_hash: [u8; DIGEST_SIZE],
}

impl VerityResult {
    /// Total bytes of all tree levels
    pub fn tree_size(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Header followed by every level, top first.
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = self.header.to_bytes();
        let mut out = Vec::with_capacity(header.len() + self.tree_size());
        out.extend_from_slice(&header);
        for level in &self.levels {
            out.extend_from_slice(level);
        }
        out
    }
}

/// Padded byte size of every tree level for `content_size` bytes of content,
/// bottom level first. Empty content has no levels.
pub fn tree_level_sizes(content_size: u64) -> Vec<u64> {
    let chunk = CHUNK_SIZE as u64;
    let mut sizes = Vec::new();
    let mut data_size = content_size;
    while data_size > 0 {
        let digests = divide_roundup(data_size, chunk) * DIGEST_SIZE as u64;
        let level = divide_roundup(digests, chunk) * chunk;
        sizes.push(level);
        if level <= chunk {
            break;
        }
        data_size = level;
    }
    sizes
}

/// Build the verity tree of `content` with default options.
pub fn build_verity_tree<R: ByteRegion + ?Sized>(
    content: &R,
    salt: &[u8; SALT_SIZE],
) -> ApkmarkResult<VerityResult> {
    build_verity_tree_with(content, salt, &TreeOptions::default())
}

/// Build the verity tree of `content`.
pub fn build_verity_tree_with<R: ByteRegion + ?Sized>(
    content: &R,
    salt: &[u8; SALT_SIZE],
    options: &TreeOptions,
) -> ApkmarkResult<VerityResult> {
    if options.region_size == 0 || options.region_size % CHUNK_SIZE != 0 {
        return Err(ApkmarkError::Config(format!(
            "region size {} is not a positive multiple of {CHUNK_SIZE}",
            options.region_size
        )));
    }

    let content_size = content.size();
    let header = VerityHeader::new(*salt, content_size);
    let sizes = tree_level_sizes(content_size);

    let mut levels: Vec<Vec<u8>> = Vec::with_capacity(sizes.len());
    for (depth, &size) in sizes.iter().enumerate() {
        let mut level = vec![0u8; size as usize];
        match levels.last() {
            None => digest_level(content, salt, &mut level, options)?,
            Some(below) => {
                digest_level(&MemoryRegion::new(below), salt, &mut level, options)?
            }
        }
        tracing::debug!(depth, size, "built verity level");
        levels.push(level);
    }

    let mut root_hash = [0u8; DIGEST_SIZE];
    if let Some(top) = levels.last() {
        let mut digester = ChunkDigester::new(salt, &mut root_hash);
        digester.consume(&top[..CHUNK_SIZE])?;
        digester.finish()?;
    }
    levels.reverse();

    tracing::info!(
        content_size,
        levels = levels.len(),
        root_hash = %hex::encode(root_hash),
        "built verity tree"
    );

    Ok(VerityResult {
        header,
        levels,
        root_hash,
    })
}

/// Digest every chunk of `input` into `output`, which must be at least the
/// padded level size.
fn digest_level<R: ByteRegion + ?Sized>(
    input: &R,
    salt: &[u8; SALT_SIZE],
    output: &mut [u8],
    options: &TreeOptions,
) -> ApkmarkResult<()> {
    let input_size = input.size();
    let region_size = options.region_size as u64;

    if !options.parallel || input_size <= region_size {
        let mut digester = ChunkDigester::new(salt, output);
        input.feed(0, input_size, &mut digester)?;
        digester.finish_partial()?;
        digester.fill_up_last_output_chunk()?;
        digester.finish()?;
        return Ok(());
    }

    // Each region owns a disjoint slice of the output; workers share nothing
    // but the read-only input.
    let digests_per_region = options.region_size / CHUNK_SIZE * DIGEST_SIZE;
    let digest_bytes = divide_roundup(input_size, CHUNK_SIZE as u64) as usize * DIGEST_SIZE;
    output[..digest_bytes]
        .par_chunks_mut(digests_per_region)
        .enumerate()
        .try_for_each(|(index, out)| {
            let offset = index as u64 * region_size;
            let length = region_size.min(input_size - offset);
            let mut digester = ChunkDigester::new(salt, out);
            input.feed(offset, length, &mut digester)?;
            digester.finish_partial()?;
            digester.finish().map(|_| ())
        })
}
