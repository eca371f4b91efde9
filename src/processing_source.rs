//! Processing source wrapper for single-pass detect-and-process operations
//!
//! This module provides a [`ByteSource`] wrapper that hands every byte the
//! detector consumes to a callback, so a caller can hash or copy a stream
//! while it is being analyzed, without reading it twice.

use crate::{
    error::Result,
    source::ByteSource,
};

/// Size of the scratch buffer used to feed skipped bytes to the callback
const SKIP_CHUNK: usize = 8192;

/// A source wrapper that processes data through a callback as it is consumed
///
/// Skipped regions are read through the callback as well, so the callback
/// sees the exact prefix of the stream that detection touched.
///
/// # Exclude Mode
///
/// The wrapper supports an "exclude mode" that temporarily disables
/// processing. While it is active, reads are forwarded untouched and skips
/// are delegated to the inner source (which may seek).
///
/// # Example
///
/// ```rust
/// use media_probe::{processing_source::ProcessingSource, SliceSource};
/// use sha2::{Digest, Sha256};
///
/// let data = b"GIF89a\x10\x00\x20\x00\x00\x00\x00";
/// let mut hasher = Sha256::new();
/// let mut source = ProcessingSource::new(SliceSource::new(data), |chunk| {
///     hasher.update(chunk);
/// });
/// let info = media_probe::detect(&mut source, Default::default())?;
/// assert_eq!(info.format(), Some("gif"));
/// # Ok::<(), media_probe::Error>(())
/// ```
pub struct ProcessingSource<S: ByteSource, F: FnMut(&[u8])> {
    inner: S,
    processor: F,
    exclude_mode: bool,
}

impl<S: ByteSource, F: FnMut(&[u8])> ProcessingSource<S, F> {
    /// Create a new processing source
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying source to read from
    /// * `processor` - Callback function that processes each chunk of data
    pub fn new(inner: S, processor: F) -> Self {
        Self {
            inner,
            processor,
            exclude_mode: false,
        }
    }

    /// Set exclude mode
    ///
    /// When exclude mode is enabled, data is consumed but not processed.
    pub fn set_exclude_mode(&mut self, exclude: bool) {
        self.exclude_mode = exclude;
    }

    /// Check if exclude mode is currently active
    pub fn is_exclude_mode(&self) -> bool {
        self.exclude_mode
    }

    /// Consume the wrapper and return the underlying source
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ByteSource, F: FnMut(&[u8])> ByteSource for ProcessingSource<S, F> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read_into(buf)?;
        if !self.exclude_mode && n > 0 {
            (self.processor)(&buf[..n]);
        }
        Ok(n)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        if self.exclude_mode {
            return self.inner.skip(n);
        }
        let mut scratch = [0u8; SKIP_CHUNK];
        let mut left = n;
        while left > 0 {
            let want = left.min(SKIP_CHUNK as u64) as usize;
            let got = self.inner.read_into(&mut scratch[..want])?;
            if got > 0 {
                (self.processor)(&scratch[..got]);
            }
            if got < want {
                return Ok(false);
            }
            left -= want as u64;
        }
        Ok(true)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }
}
