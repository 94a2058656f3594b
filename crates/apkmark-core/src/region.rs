//! Randomly addressable byte stores
//!
//! A `ByteRegion` hands bounded windows of its bytes to a `DataSink`. There is
//! no cursor: every `feed` names its own offset, so any number of workers can
//! read disjoint (or overlapping) ranges of the same region concurrently.
//!
//! - `MemoryRegion`: a borrowed byte slice, fed without copying
//! - `FileRegion`: positional reads against an open file
//! - `RegionSlice`: a bounded `[offset, offset + length)` view over another region

use std::fs::File;
use std::io;
use std::path::Path;

use crate::constants::FEED_WINDOW_SIZE;
use crate::error::{ApkmarkError, ApkmarkResult};

/// Consumer of bytes fed from a region.
pub trait DataSink {
    fn consume(&mut self, data: &[u8]) -> ApkmarkResult<()>;
}

impl DataSink for Vec<u8> {
    fn consume(&mut self, data: &[u8]) -> ApkmarkResult<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Fixed-size, read-only byte store.
pub trait ByteRegion: Send + Sync {
    /// Total size in bytes.
    fn size(&self) -> u64;

    /// Feed `[offset, offset + length)` into `sink`, in one or more calls.
    ///
    /// Fails with `OutOfBounds` before feeding anything if the range does not
    /// fit inside the region.
    fn feed(&self, offset: u64, length: u64, sink: &mut dyn DataSink) -> ApkmarkResult<()>;

    /// Copy `[offset, offset + length)` into a new buffer.
    fn read_vec(&self, offset: u64, length: usize) -> ApkmarkResult<Vec<u8>> {
        let mut out = Vec::with_capacity(length);
        self.feed(offset, length as u64, &mut out)?;
        Ok(out)
    }

    fn read_u16_le(&self, offset: u64) -> ApkmarkResult<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(&self.read_vec(offset, 2)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn read_u32_le(&self, offset: u64) -> ApkmarkResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.read_vec(offset, 4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, offset: u64) -> ApkmarkResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.read_vec(offset, 8)?);
        Ok(u64::from_le_bytes(buf))
    }
}

impl<T: ByteRegion + ?Sized> ByteRegion for &T {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn feed(&self, offset: u64, length: u64, sink: &mut dyn DataSink) -> ApkmarkResult<()> {
        (**self).feed(offset, length, sink)
    }
}

/// Validate that `[offset, offset + length)` lies inside `size` bytes.
pub fn check_range(offset: u64, length: u64, size: u64) -> ApkmarkResult<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(ApkmarkError::out_of_bounds(offset, length, size)),
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// A region over a borrowed byte slice
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion<'a> {
    data: &'a [u8],
}

impl<'a> MemoryRegion<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl<'a> From<&'a [u8]> for MemoryRegion<'a> {
    fn from(data: &'a [u8]) -> Self {
        Self::new(data)
    }
}

impl<'a> From<&'a Vec<u8>> for MemoryRegion<'a> {
    fn from(data: &'a Vec<u8>) -> Self {
        Self::new(data.as_slice())
    }
}

impl ByteRegion for MemoryRegion<'_> {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn feed(&self, offset: u64, length: u64, sink: &mut dyn DataSink) -> ApkmarkResult<()> {
        check_range(offset, length, self.size())?;
        let start = offset as usize;
        let end = start + length as usize;
        sink.consume(&self.data[start..end])
    }
}

// ── File-backed ───────────────────────────────────────────────────────────────

/// A region over an open file, read with positional I/O.
///
/// The size is captured when the region is created; the file must not change
/// length while the region is in use.
#[derive(Debug)]
pub struct FileRegion {
    file: File,
    size: u64,
}

impl FileRegion {
    pub fn open(path: &Path) -> ApkmarkResult<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> ApkmarkResult<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl ByteRegion for FileRegion {
    fn size(&self) -> u64 {
        self.size
    }

    fn feed(&self, offset: u64, length: u64, sink: &mut dyn DataSink) -> ApkmarkResult<()> {
        check_range(offset, length, self.size)?;

        let mut buf = vec![0u8; (length as usize).min(FEED_WINDOW_SIZE)];
        let mut done = 0u64;
        while done < length {
            let n = ((length - done) as usize).min(buf.len());
            read_exact_at(&self.file, &mut buf[..n], offset + done)?;
            sink.consume(&buf[..n])?;
            done += n as u64;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

// ── Bounded views ─────────────────────────────────────────────────────────────

/// A bounded view `[offset, offset + length)` over another region
#[derive(Debug, Clone, Copy)]
pub struct RegionSlice<'a, R: ByteRegion + ?Sized> {
    inner: &'a R,
    offset: u64,
    length: u64,
}

impl<'a, R: ByteRegion + ?Sized> RegionSlice<'a, R> {
    pub fn new(inner: &'a R, offset: u64, length: u64) -> ApkmarkResult<Self> {
        check_range(offset, length, inner.size())?;
        Ok(Self {
            inner,
            offset,
            length,
        })
    }

    /// Offset of this view within the region it wraps
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: ByteRegion + ?Sized> ByteRegion for RegionSlice<'_, R> {
    fn size(&self) -> u64 {
        self.length
    }

    fn feed(&self, offset: u64, length: u64, sink: &mut dyn DataSink) -> ApkmarkResult<()> {
        check_range(offset, length, self.length)?;
        self.inner.feed(self.offset + offset, length, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn memory_region_feeds_requested_range() {
        let data = pattern(1000);
        let region = MemoryRegion::new(&data);
        assert_eq!(region.size(), 1000);
        assert_eq!(region.read_vec(10, 5).unwrap(), &data[10..15]);
        assert!(region.read_vec(1000, 0).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_feed_is_rejected() {
        let data = pattern(16);
        let region = MemoryRegion::new(&data);
        let mut sink = Vec::new();
        let err = region.feed(10, 7, &mut sink).unwrap_err();
        assert!(matches!(err, ApkmarkError::OutOfBounds { size: 16, .. }));
        assert!(sink.is_empty(), "nothing may be fed on a failed range check");

        assert!(region.feed(u64::MAX, 2, &mut sink).is_err());
    }

    #[test]
    fn integer_reads_are_little_endian() {
        let data = [0x50, 0x4b, 0x05, 0x06, 1, 0, 0, 0, 0, 0, 0, 0];
        let region = MemoryRegion::new(&data);
        assert_eq!(region.read_u32_le(0).unwrap(), 0x0605_4b50);
        assert_eq!(region.read_u16_le(4).unwrap(), 1);
        assert_eq!(region.read_u64_le(4).unwrap(), 1);
    }

    #[test]
    fn nested_slices_compose_offsets() {
        let data = pattern(512);
        let region = MemoryRegion::new(&data);
        let outer = RegionSlice::new(&region, 100, 300).unwrap();
        let inner = RegionSlice::new(&outer, 50, 20).unwrap();
        assert_eq!(inner.size(), 20);
        assert_eq!(inner.offset(), 50);
        assert_eq!(inner.read_vec(0, 20).unwrap(), &data[150..170]);
        assert!(inner.read_vec(10, 11).is_err());
        assert!(RegionSlice::new(&region, 500, 13).is_err());
    }

    #[test]
    fn file_region_reads_across_windows() {
        let data = pattern(FEED_WINDOW_SIZE * 2 + 123);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();
        tmp.flush().unwrap();

        let region = FileRegion::open(tmp.path()).unwrap();
        assert_eq!(region.size(), data.len() as u64);

        let start = FEED_WINDOW_SIZE as u64 - 7;
        let got = region.read_vec(start, FEED_WINDOW_SIZE + 20).unwrap();
        assert_eq!(got, &data[start as usize..start as usize + FEED_WINDOW_SIZE + 20]);
        assert!(region.read_vec(data.len() as u64 - 1, 2).is_err());
    }

    proptest! {
        #[test]
        fn file_and_memory_regions_agree(
            data in proptest::collection::vec(any::<u8>(), 1..=8192),
            a in any::<u16>(),
            b in any::<u16>(),
        ) {
            let len = data.len() as u64;
            let start = a as u64 % len;
            let length = b as u64 % (len - start + 1);

            let mut tmp = tempfile::NamedTempFile::new().unwrap();
            tmp.write_all(&data).unwrap();
            tmp.flush().unwrap();

            let file = FileRegion::open(tmp.path()).unwrap();
            let mem = MemoryRegion::new(&data);
            prop_assert_eq!(
                file.read_vec(start, length as usize).unwrap(),
                mem.read_vec(start, length as usize).unwrap()
            );
        }
    }
}
