//! Byte sources consumed by the detector and every analyzer
//!
//! A [`ByteSource`] is a forward-only stream: `read_into` fills the buffer
//! unless end-of-file is reached, and `skip` advances without returning data,
//! reporting whether the whole skip succeeded. Backward seeking is never
//! required, so every analyzer works on pipes as well as on files.
//!
//! Adapters:
//! - [`ReadSource`]: any [`Read`], skips by reading and discarding
//! - [`SeekSource`]: a [`Read`] + [`Seek`] with a known size, skips large
//!   regions with a forward seek
//! - [`SliceSource`]: an in-memory buffer
//! - [`PrereadSource`]: replays already-read header bytes before continuing
//! - [`SubSource`]: a bounded view over a parent source for nested payloads

use crate::error::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom};

/// Skips shorter than this are served by reading and discarding
pub const SEEK_THRESHOLD: u64 = 32768;

/// Largest single buffer grown by [`ByteSourceExt::read_vec`] before data
/// actually arrives
const READ_CHUNK: usize = 65536;

/// Forward-only byte stream
pub trait ByteSource {
    /// Reads into `buf`, returning the number of bytes read
    ///
    /// Returns fewer than `buf.len()` bytes only at end-of-file.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Advances `n` bytes, returning `false` if the source ended first
    fn skip(&mut self, n: u64) -> Result<bool>;

    /// Number of bytes consumed so far
    fn position(&self) -> u64;
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_into(buf)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        (**self).skip(n)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_into(buf)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        (**self).skip(n)
    }

    fn position(&self) -> u64 {
        (**self).position()
    }
}

/// Convenience readers built on [`ByteSource`]
pub trait ByteSourceExt: ByteSource {
    /// Reads up to `n` bytes, fewer only at end-of-file
    ///
    /// The buffer grows as data arrives, so a bogus size field cannot force
    /// a huge allocation up front.
    fn read_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n.min(READ_CHUNK));
        while out.len() < n {
            let start = out.len();
            let want = (n - start).min(READ_CHUNK);
            out.resize(start + want, 0);
            let got = self.read_into(&mut out[start..])?;
            out.truncate(start + got);
            if got < want {
                break;
            }
        }
        Ok(out)
    }

    /// Reads exactly `n` bytes or fails with [`Error::Truncated`]
    fn read_exact_vec(&mut self, n: usize, what: &str) -> Result<Vec<u8>> {
        let data = self.read_vec(n)?;
        if data.len() < n {
            return Err(Error::truncated(what));
        }
        Ok(data)
    }

    /// Reads a fixed-size array or fails with [`Error::Truncated`]
    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        if self.read_into(&mut buf)? < N {
            return Err(Error::truncated(what));
        }
        Ok(buf)
    }

    /// Reads a single byte or fails with [`Error::Truncated`]
    fn read_byte(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_array::<1>(what)?[0])
    }

    /// Skips `n` bytes or fails with [`Error::Truncated`]
    fn skip_exact(&mut self, n: u64, what: &str) -> Result<()> {
        if !self.skip(n)? {
            return Err(Error::truncated(what));
        }
        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSourceExt for S {}

fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}

/// Sequential source over any reader
pub struct ReadSource<R: Read> {
    inner: R,
    pos: u64,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = read_fill(&mut self.inner, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let copied = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.pos += copied;
        Ok(copied == n)
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// Source over a seekable reader of known size
///
/// Skips of [`SEEK_THRESHOLD`] bytes or more are done with a forward seek.
/// A seek past `size` reports failure.
pub struct SeekSource<R: Read + Seek> {
    inner: R,
    pos: u64,
    size: u64,
}

impl<R: Read + Seek> SeekSource<R> {
    /// Wraps `inner`, which must be positioned at its start
    pub fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            pos: 0,
            size,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for SeekSource<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = read_fill(&mut self.inner, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        if n < SEEK_THRESHOLD {
            let copied = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
            self.pos += copied;
            return Ok(copied == n);
        }
        let target = self.pos.saturating_add(n);
        if target > self.size {
            self.inner.seek(SeekFrom::Start(self.size))?;
            self.pos = self.size;
            return Ok(false);
        }
        self.inner.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(true)
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

/// Source over an in-memory buffer
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl ByteSource for SliceSource<'_> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = self.remaining();
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let rest = self.remaining().len() as u64;
        if n > rest {
            self.pos = self.data.len();
            return Ok(false);
        }
        self.pos += n as usize;
        Ok(true)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}

/// Replays a header that was already read, then continues with `inner`
///
/// Positions count from the start of the header, so an analyzer sees the
/// same offsets it would see on the untouched stream.
pub struct PrereadSource<S: ByteSource> {
    header: Vec<u8>,
    hpos: usize,
    inner: S,
}

impl<S: ByteSource> PrereadSource<S> {
    pub fn new(header: Vec<u8>, inner: S) -> Self {
        Self {
            header,
            hpos: 0,
            inner,
        }
    }
}

impl<S: ByteSource> ByteSource for PrereadSource<S> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let buffered = &self.header[self.hpos..];
        let n = buf.len().min(buffered.len());
        buf[..n].copy_from_slice(&buffered[..n]);
        self.hpos += n;
        if n == buf.len() {
            return Ok(n);
        }
        Ok(n + self.inner.read_into(&mut buf[n..])?)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let buffered = (self.header.len() - self.hpos) as u64;
        if n <= buffered {
            self.hpos += n as usize;
            return Ok(true);
        }
        self.hpos = self.header.len();
        self.inner.skip(n - buffered)
    }

    fn position(&self) -> u64 {
        // The inner source has consumed exactly the header before replay starts.
        self.inner.position() - (self.header.len() - self.hpos) as u64
    }
}

/// Bounded view over a parent source
///
/// Reads stop at `limit` bytes; the parent keeps its own cursor, advanced by
/// whatever the view consumed.
pub struct SubSource<S: ByteSource> {
    inner: S,
    remaining: u64,
    consumed: u64,
}

impl<S: ByteSource> SubSource<S> {
    pub fn new(inner: S, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            consumed: 0,
        }
    }

    /// Bytes left in the view
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Skips whatever is left of the view in the parent
    pub fn finish(mut self) -> Result<bool> {
        let rest = self.remaining;
        self.skip(rest)
    }
}

impl<S: ByteSource> ByteSource for SubSource<S> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read_into(&mut buf[..want])?;
        self.remaining -= n as u64;
        self.consumed += n as u64;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let want = n.min(self.remaining);
        let start = self.inner.position();
        let ok = self.inner.skip(want)?;
        let moved = if ok {
            want
        } else {
            self.inner.position().saturating_sub(start).min(want)
        };
        self.remaining -= moved;
        self.consumed += moved;
        Ok(ok && want == n)
    }

    fn position(&self) -> u64 {
        self.consumed
    }
}

/// Source over a memory-mapped file
#[cfg(feature = "memory-mapped")]
pub struct MmapSource {
    map: memmap2::Mmap,
    pos: usize,
}

#[cfg(feature = "memory-mapped")]
impl MmapSource {
    /// Maps `file` read-only
    ///
    /// # Safety
    ///
    /// The file must not be truncated or modified while mapped.
    pub unsafe fn new(file: &std::fs::File) -> Result<Self> {
        let map = memmap2::Mmap::map(file)?;
        Ok(Self { map, pos: 0 })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(feature = "memory-mapped")]
impl ByteSource for MmapSource {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let rest = &self.map[self.pos..];
        let n = buf.len().min(rest.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let rest = (self.map.len() - self.pos) as u64;
        if n > rest {
            self.pos = self.map.len();
            return Ok(false);
        }
        self.pos += n as usize;
        Ok(true)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}
