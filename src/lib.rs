//! Streaming media format detection and shallow header metadata extraction.
//!
//! This crate identifies the format of a file from its first few bytes and
//! then reads just enough of its headers to report container, codec and
//! track parameters: image dimensions, video codec and frame size, audio
//! codec, channel count, sample rate and sample size.
//!
//! # Design Principles
//!
//! - **Streaming**: Input is consumed forward-only through a [`ByteSource`];
//!   large payloads are skipped, never read into memory
//! - **Signature database**: Formats are matched against declarative header
//!   specs ranked by confidence (see [`signature`] and [`FormatDb`])
//! - **Bounded**: Every size field read from a file is checked against a
//!   fixed limit before anything is allocated
//! - **Partial results**: A truncated or corrupt file still reports whatever
//!   was found before the error
//!
//! # Quick Start
//!
//! ```no_run
//! # fn main() -> media_probe::Result<()> {
//! let info = media_probe::detect_path("movie.mkv")?;
//! println!("format: {:?}", info.format());
//! for track in &info.tracks {
//!     println!("{:?} track: {}", track.kind, track.codec);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Streams
//!
//! Any [`std::io::Read`] can be analyzed. When the partial record matters
//! on failure, use [`detect_into`]:
//!
//! ```no_run
//! use media_probe::{detect_into, Info, ReadSource};
//!
//! # fn main() {
//! let stdin = std::io::stdin();
//! let mut source = ReadSource::new(stdin.lock());
//! let mut info = Info::new();
//! if let Err(e) = detect_into(&mut source, &mut info) {
//!     eprintln!("error: {e}");
//! }
//! for (field, value) in info.fields() {
//!     println!("{field}={value:?}");
//! }
//! # }
//! ```

pub mod bits;
pub mod codecs;
pub mod containers;
mod error;
pub mod format_db;
pub mod formats;
pub mod info;
pub mod processing_source;
pub mod signature;
pub mod source;

pub use error::{Error, ErrorKind, Result};
pub use format_db::{FormatDb, FormatDbConfig, FormatDef, UNKNOWN_FORMAT};
pub use info::{Field, Info, Track, TrackKind, Value};
pub use processing_source::ProcessingSource;
#[cfg(feature = "memory-mapped")]
pub use source::MmapSource;
pub use source::{ByteSource, ReadSource, SeekSource, SliceSource};

// Test utilities - only compiled for tests or when explicitly enabled
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

use std::{fs::File, io::BufReader, path::Path};

/// The process-wide format database, built and validated on first use
pub fn registry() -> Result<&'static FormatDb> {
    formats::registry()
}

/// Detects the format of `source` and extracts its header metadata
///
/// `seed` may carry caller-provided fields (such as `f` and `size`); they
/// are kept unless an analyzer overwrites them.
pub fn detect(source: &mut dyn ByteSource, seed: Info) -> Result<Info> {
    let mut info = seed;
    registry()?.analyze(source, &mut info)?;
    Ok(info)
}

/// Like [`detect`], but leaves the partial record in `info` on failure
///
/// On failure `error` is set to the [`ErrorKind`] of the error, which is
/// also returned.
pub fn detect_into(source: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let result = registry().and_then(|db| db.analyze(source, info));
    if let Err(e) = &result {
        tracing::debug!(error = %e, format = ?info.format(), "analysis failed");
        info.set(Field::Error, e.kind().as_str());
    }
    result
}

/// Detects the format of an in-memory buffer
pub fn detect_bytes(data: &[u8]) -> Result<Info> {
    detect(&mut SliceSource::new(data), Info::new())
}

/// Detects the format of a file
///
/// The record is seeded with the file name and size, and large skips seek
/// instead of reading.
pub fn detect_path(path: impl AsRef<Path>) -> Result<Info> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut info = Info::with_filename(path.display().to_string());
    info.set(Field::Size, size);
    let mut source = SeekSource::new(BufReader::new(file), size);
    detect(&mut source, info)
}

/// Every format name detection can report, sorted
///
/// Includes the formats analyzers refine to, such as `webm` or `agif`.
/// Empty if the built-in table failed to build.
pub fn list_formats() -> Vec<&'static str> {
    registry().map(|db| db.formats().collect()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_bytes_empty() {
        let info = detect_bytes(b"").unwrap();
        assert_eq!(info.format(), Some("empty"));
        assert_eq!(info.fields().count(), 1);
    }

    #[test]
    fn test_detect_unknown() {
        let info = detect_bytes(b"Unknown data, nothing to see here").unwrap();
        assert_eq!(info.format(), Some(UNKNOWN_FORMAT));
    }

    #[test]
    fn test_detect_keeps_seed_fields() {
        let seed = Info::with_filename("a.gif");
        let info = detect(&mut SliceSource::new(b"GIF89a\x05\x01\x03\x02"), seed).unwrap();
        assert_eq!(info.get_str(&Field::Filename), Some("a.gif"));
        assert_eq!(info.format(), Some("gif"));
    }

    #[test]
    fn test_detect_into_records_error() {
        let mut info = Info::new();
        // flac STREAMINFO cut short
        let result = detect_into(&mut SliceSource::new(b"fLaC\0\0\0\x22\x10"), &mut info);
        assert!(matches!(result, Err(Error::Truncated(_))));
        assert_eq!(info.format(), Some("flac"));
        assert_eq!(info.get_str(&Field::Error), Some("truncated"));
    }

    #[test]
    fn test_list_formats() {
        let formats = list_formats();
        assert!(formats.windows(2).all(|w| w[0] < w[1]));
        for name in ["gif", "agif", "mkv", "webm", "mov", "mpeg-ts", "wmv", "empty"] {
            assert!(formats.contains(&name), "{name}");
        }
        assert!(!formats.contains(&UNKNOWN_FORMAT));
    }

    #[test]
    fn test_detect_path() {
        let dir = std::env::temp_dir().join(format!("media-probe-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sample.png");
        std::fs::write(&path, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\x05\x01\0\0\x03\x02").unwrap();
        let info = detect_path(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(info.format(), Some("png"));
        assert_eq!(info.get_u64(&Field::Size), Some(24));
        assert_eq!((info.width(), info.height()), (Some(1281), Some(770)));
        assert!(info.get_str(&Field::Filename).unwrap().ends_with("sample.png"));
    }
}
