//! GIF header and block walker
//!
//! The logical screen size comes from the header. Blocks are then walked up
//! to the second image descriptor, which makes the file an animated GIF.

use crate::{
    error::{Error, Result},
    info::{Field, Info},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

const TRAILER: u8 = 0x3b;
const EXTENSION: u8 = 0x21;
const IMAGE_DESCRIPTOR: u8 = 0x2c;

const APPLICATION_EXTENSION: u8 = 0xff;
const GRAPHIC_CONTROL_EXTENSION: u8 = 0xf9;
const COMMENT_EXTENSION: u8 = 0xfe;

/// Size of a colour table flagged in a packed byte, in bytes
fn color_table_size(packed: u8) -> u64 {
    if packed & 0x80 != 0 {
        6 << (packed & 7)
    } else {
        0
    }
}

/// Skips data sub-blocks up to and including the zero-length terminator
fn skip_sub_blocks(src: &mut dyn ByteSource) -> Result<()> {
    loop {
        let size = src.read_byte("gif sub-block")?;
        if size == 0 {
            return Ok(());
        }
        src.skip_exact(size as u64, "gif sub-block")?;
    }
}

/// Analyzes a GIF image and refines the format to `agif` when it has more
/// than one frame
///
/// The input may end at any block boundary.
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<10>("gif header")?;
    if &header[..4] != b"GIF8" || !matches!(&header[4..6], b"7a" | b"9a") {
        return Err(Error::bad("gif signature not found"));
    }
    info.set_format("gif");
    info.set(Field::Codec, "lzw");
    info.set_dimensions(
        LittleEndian::read_u16(&header[6..8]) as u32,
        LittleEndian::read_u16(&header[8..10]) as u32,
    );

    let descriptor = src.read_vec(3)?;
    if descriptor.len() < 3 {
        return Ok(());
    }
    if !src.skip(color_table_size(descriptor[0]))? {
        return Ok(());
    }

    let mut frame_count = 0u32;
    loop {
        let Some(&introducer) = src.read_vec(1)?.first() else {
            return Ok(());
        };
        match introducer {
            TRAILER => {
                return if frame_count == 0 {
                    Err(Error::bad("gif has no frames"))
                } else {
                    Ok(())
                };
            }
            EXTENSION => {
                let label = src.read_byte("gif extension label")?;
                match label {
                    APPLICATION_EXTENSION | COMMENT_EXTENSION => skip_sub_blocks(src)?,
                    GRAPHIC_CONTROL_EXTENSION => {
                        let block = src.read_array::<6>("gif graphic control extension")?;
                        if block[0] != 4 || block[5] != 0 {
                            return Err(Error::bad("bad gif graphic control extension"));
                        }
                    }
                    other => {
                        return Err(Error::bad(format!("unknown gif extension: 0x{other:02x}")))
                    }
                }
            }
            IMAGE_DESCRIPTOR => {
                frame_count += 1;
                trace!(frame_count, "gif image descriptor");
                if frame_count > 1 {
                    info.set_format("agif");
                    return Ok(());
                }
                src.skip_exact(8, "gif image descriptor")?;
                let packed = src.read_byte("gif image descriptor")?;
                src.skip_exact(color_table_size(packed), "gif local color table")?;
                // LZW minimum code size
                src.skip_exact(1, "gif image data")?;
                skip_sub_blocks(src)?;
            }
            other => {
                return Err(Error::InvalidSegment {
                    offset: src.position() - 1,
                    reason: format!("unknown gif block: 0x{other:02x}"),
                })
            }
        }
    }
}
