//! Salted per-chunk SHA-256
//!
//! A `ChunkDigester` hashes its input in 4096-byte windows. Every window is
//! hashed as `SHA-256(salt || window)` and the 32-byte result is appended to
//! an output slice owned by the digester. Input may arrive in slices of any
//! length; a window that straddles two `consume` calls carries over.
//!
//! With the default all-zero salt two identical windows produce identical
//! digests wherever they sit in the stream. Position binding, if wanted, has
//! to come from the salt.

use apkmark_core::constants::{CHUNK_SIZE, DIGEST_SIZE, SALT_SIZE};
use apkmark_core::{ApkmarkError, ApkmarkResult, DataSink};
use sha2::{Digest, Sha256};

pub struct ChunkDigester<'a> {
    salt: [u8; SALT_SIZE],
    hasher: Sha256,
    /// Bytes of the current window hashed so far; always < CHUNK_SIZE
    pending: usize,
    output: &'a mut [u8],
    written: usize,
}

impl<'a> ChunkDigester<'a> {
    pub fn new(salt: &[u8; SALT_SIZE], output: &'a mut [u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        Self {
            salt: *salt,
            hasher,
            pending: 0,
            output,
            written: 0,
        }
    }

    /// Bytes of an unfinished window
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Bytes written to the output so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Hash `data`, emitting one digest per completed window.
    pub fn consume(&mut self, mut data: &[u8]) -> ApkmarkResult<()> {
        while !data.is_empty() {
            let allowance = data.len().min(CHUNK_SIZE - self.pending);
            self.hasher.update(&data[..allowance]);
            self.pending += allowance;
            data = &data[allowance..];

            if self.pending == CHUNK_SIZE {
                self.emit_digest()?;
            }
        }
        Ok(())
    }

    /// Zero-pad the unfinished window, if any, and emit its digest.
    ///
    /// This is the explicit final flush for input whose length is not a
    /// multiple of the window size.
    pub fn finish_partial(&mut self) -> ApkmarkResult<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let padding = [0u8; CHUNK_SIZE];
        let missing = CHUNK_SIZE - self.pending;
        self.consume(&padding[..missing])
    }

    /// Zero the output up to the next window boundary.
    pub fn fill_up_last_output_chunk(&mut self) -> ApkmarkResult<()> {
        let last = self.written % CHUNK_SIZE;
        if last == 0 {
            return Ok(());
        }
        let end = self.written + CHUNK_SIZE - last;
        self.reserve(end - self.written)?.fill(0);
        self.written = end;
        Ok(())
    }

    /// Finish, returning the number of output bytes written.
    ///
    /// Fails with `IncompleteDigestState` if part of a window is still
    /// buffered; call `finish_partial` first for unaligned input.
    pub fn finish(self) -> ApkmarkResult<usize> {
        if self.pending != 0 {
            return Err(ApkmarkError::IncompleteDigestState {
                pending: self.pending,
            });
        }
        Ok(self.written)
    }

    fn emit_digest(&mut self) -> ApkmarkResult<()> {
        let digest = self.hasher.finalize_reset();
        self.reserve(DIGEST_SIZE)?.copy_from_slice(&digest);
        self.written += DIGEST_SIZE;
        self.hasher.update(self.salt);
        self.pending = 0;
        Ok(())
    }

    fn reserve(&mut self, len: usize) -> ApkmarkResult<&mut [u8]> {
        let capacity = self.output.len();
        self.output
            .get_mut(self.written..self.written + len)
            .ok_or(ApkmarkError::OutOfBounds {
                offset: self.written as u64,
                length: len as u64,
                size: capacity as u64,
            })
    }
}

impl DataSink for ChunkDigester<'_> {
    fn consume(&mut self, data: &[u8]) -> ApkmarkResult<()> {
        ChunkDigester::consume(self, data)
    }
}
