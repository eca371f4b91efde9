//! Minimal TIFF parser
//!
//! Reads the first IFD for the image size and compression.
//!
//! TIFF Structure:
//! - Header: byte order (II/MM), magic (0x002A), IFD offset
//! - IFD (Image File Directory): tag count, tags (12 bytes each), next IFD offset
//! - Tags: tag ID (2), type (2), count (4), value/offset (4)

use crate::{
    error::{Error, Result},
    info::{Field, Info},
    source::{ByteSource, ByteSourceExt},
};
use tracing::trace;

/// TIFF tag IDs
mod tags {
    pub const IMAGE_WIDTH: u16 = 0x0100;
    pub const IMAGE_LENGTH: u16 = 0x0101;
    pub const COMPRESSION: u16 = 0x0103;
}

/// TIFF data types
mod types {
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
}

const HEADER_SIZE: u64 = 8;
const IFD_ENTRY_SIZE: usize = 12;

/// Maximum number of IFD entries accepted
pub const MAX_IFD_TAGS: u16 = 1000;

/// Largest IFD0 offset followed
pub const MAX_IFD_OFFSET: u64 = 1 << 20;

/// Byte order for reading multi-byte values
#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    fn read_u16(&self, data: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes([data[0], data[1]]),
            ByteOrder::BigEndian => u16::from_be_bytes([data[0], data[1]]),
        }
    }

    fn read_u32(&self, data: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            ByteOrder::BigEndian => u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
        }
    }
}

fn compression_codec(value: u32) -> String {
    match value {
        1 => "uncompressed".into(),
        2 => "ccitt-rle".into(),
        3 => "fax3".into(),
        4 => "fax4".into(),
        5 => "lzw".into(),
        6 | 7 => "jpeg".into(),
        8 | 32946 => "zip".into(),
        32773 => "packbits".into(),
        34712 => "jpeg2000".into(),
        other => other.to_string(),
    }
}

/// Reads a SHORT or LONG tag value stored inline in the entry
fn inline_value(order: ByteOrder, entry: &[u8]) -> Option<u32> {
    match order.read_u16(&entry[2..4]) {
        types::SHORT => Some(order.read_u16(&entry[8..10]) as u32),
        types::LONG => Some(order.read_u32(&entry[8..12])),
        _ => None,
    }
}

/// Analyzes a TIFF image
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<8>("tiff header")?;
    let order = match &header[..2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return Err(Error::bad("tiff byte order mark not found")),
    };
    if order.read_u16(&header[2..4]) != 42 {
        return Err(Error::bad("bad tiff magic"));
    }
    info.set_format("tiff");
    let ifd_offset = order.read_u32(&header[4..8]) as u64;
    if ifd_offset < HEADER_SIZE {
        return Err(Error::bad(format!("bad tiff ifd offset: {ifd_offset}")));
    }
    if ifd_offset > MAX_IFD_OFFSET {
        return Err(Error::DataTooLarge {
            size: ifd_offset,
            max: MAX_IFD_OFFSET,
        });
    }
    src.skip_exact(ifd_offset - HEADER_SIZE, "tiff ifd")?;

    let count = order.read_u16(&src.read_array::<2>("tiff ifd")?);
    if count > MAX_IFD_TAGS {
        return Err(Error::DataTooLarge {
            size: count as u64,
            max: MAX_IFD_TAGS as u64,
        });
    }
    trace!(ifd_offset, count, "tiff ifd0");
    let entries = src.read_exact_vec(count as usize * IFD_ENTRY_SIZE, "tiff ifd entries")?;
    let (mut width, mut height) = (None, None);
    for entry in entries.chunks_exact(IFD_ENTRY_SIZE) {
        let tag = order.read_u16(&entry[0..2]);
        let Some(value) = inline_value(order, entry) else {
            continue;
        };
        match tag {
            tags::IMAGE_WIDTH => width = Some(value),
            tags::IMAGE_LENGTH => height = Some(value),
            tags::COMPRESSION => info.set(Field::Codec, compression_codec(value)),
            _ => {}
        }
    }
    if let (Some(width), Some(height)) = (width, height) {
        info.set_dimensions(width, height);
    }
    Ok(())
}
