//! PNG header reader
//!
//! Reads the IHDR chunk (after an optional Apple `CgBI` chunk) and peeks at
//! the chunk after it: an `acTL` chunk there makes the file an animated PNG.

use crate::{
    error::{Error, Result},
    info::{Field, Info},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Rest of IHDR, its CRC and the next chunk header
const IHDR_TAIL_SIZE: usize = 5 + 4 + 8;

/// Analyzes a PNG image and refines the format to `apng` when animated
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<16>("png header")?;
    if &header[..8] != PNG_SIGNATURE {
        return Err(Error::bad("png signature not found"));
    }
    info.set_format("png");
    let mut chunk = [0u8; 8];
    chunk.copy_from_slice(&header[8..16]);

    // iOS-optimized PNG
    if &chunk[4..8] == b"CgBI" && BigEndian::read_u32(&chunk[0..4]) == 4 {
        src.skip_exact(8, "png CgBI chunk")?;
        info.set(Field::Subformat, "apple");
        chunk = src.read_array::<8>("png chunk header")?;
    }
    if &chunk[4..8] != b"IHDR" {
        return Err(Error::bad("png IHDR chunk expected"));
    }
    let dims = src.read_array::<8>("png IHDR")?;
    info.set(Field::Codec, "flate");
    info.set_dimensions(
        BigEndian::read_u32(&dims[0..4]),
        BigEndian::read_u32(&dims[4..8]),
    );

    let tail = src.read_vec(IHDR_TAIL_SIZE)?;
    if tail.len() == IHDR_TAIL_SIZE && &tail[13..17] == b"acTL" {
        info.set_format("apng");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    const STILL: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\x05\x01\0\0\x03\x02";

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_ihdr() {
        let (result, info) = run(STILL);
        result.unwrap();
        assert_eq!(info.format(), Some("png"));
        assert_eq!(info.codec(), Some("flate"));
        assert_eq!((info.width(), info.height()), (Some(1281), Some(770)));
    }

    #[test]
    fn test_animated() {
        let mut data = STILL.to_vec();
        data.extend_from_slice(b"\x08\x03\0\0\0????\0\0\0\x08acTL\0\0\0\x02\0\0\0\0");
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.format(), Some("apng"));
        assert_eq!(info.width(), Some(1281));
    }

    #[test]
    fn test_apple_cgbi() {
        let mut data = b"\x89PNG\r\n\x1a\n\0\0\0\x04CgBI\x50\0\x20\x06\x2c\xb8\x77\x66".to_vec();
        data.extend_from_slice(&STILL[8..]);
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.format(), Some("png"));
        assert_eq!(info.subformat(), Some("apple"));
        assert_eq!((info.width(), info.height()), (Some(1281), Some(770)));
    }

    #[test]
    fn test_missing_ihdr() {
        let (result, _) = run(b"\x89PNG\r\n\x1a\n\0\0\0\x04gAMA\0\0\xb1\x8f");
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
