//! JPEG marker walker
//!
//! Segments are skipped until the first start-of-frame marker, which holds
//! the image dimensions.

use crate::{
    error::{Error, Result},
    info::{Field, Info},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

const MARKER_PREFIX: u8 = 0xFF;
const SOI: u8 = 0xD8; // Start of Image
const EOI: u8 = 0xD9; // End of Image
const SOS: u8 = 0xDA; // Start of Scan
const SOF0: u8 = 0xC0;
const SOF15: u8 = 0xCF;
const DHT: u8 = 0xC4;
const JPG: u8 = 0xC8;
const DAC: u8 = 0xCC;

fn is_start_of_frame(marker: u8) -> bool {
    (SOF0..=SOF15).contains(&marker) && !matches!(marker, DHT | JPG | DAC)
}

/// Analyzes a JPEG image
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<4>("jpeg signature")?;
    if header[..3] != [MARKER_PREFIX, SOI, MARKER_PREFIX] {
        return Err(Error::bad("jpeg signature not found"));
    }
    info.set_format("jpeg");
    info.set(Field::Codec, "jpeg");

    let mut marker = header[3];
    loop {
        // Fill bytes
        while marker == MARKER_PREFIX {
            marker = src.read_byte("jpeg marker")?;
        }
        if matches!(marker, SOI | EOI | SOS) {
            return Err(Error::InvalidSegment {
                offset: src.position() - 1,
                reason: format!("unexpected jpeg marker 0x{marker:02X} before frame header"),
            });
        }
        let size = BigEndian::read_u16(&src.read_array::<2>("jpeg segment size")?);
        if size < 2 {
            return Err(Error::bad(format!("jpeg segment too small: {size}")));
        }
        trace!(marker, size, "jpeg segment");
        if is_start_of_frame(marker) {
            let frame = src.read_array::<5>("jpeg frame header")?;
            let height = BigEndian::read_u16(&frame[1..3]) as u32;
            let width = BigEndian::read_u16(&frame[3..5]) as u32;
            info.set_dimensions(width, height);
            return Ok(());
        }
        src.skip_exact(size as u64 - 2, "jpeg segment")?;
        let next = src.read_array::<2>("jpeg marker")?;
        if next[0] != MARKER_PREFIX {
            return Err(Error::InvalidSegment {
                offset: src.position() - 2,
                reason: "jpeg marker expected".into(),
            });
        }
        marker = next[1];
    }
}
