//! VP8 key frame header and VP8L (lossless WebP) header parsers

use crate::{
    bits::LsbBitReader,
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{ByteOrder, LittleEndian};

/// Start code following the 3-byte frame tag of a key frame
pub const KEY_FRAME_START_CODE: [u8; 3] = [0x9d, 0x01, 0x2a];

/// First byte of a VP8L bitstream
pub const VP8L_SIGNATURE: u8 = 0x2f;

/// Bytes needed to read the dimensions of a key frame
pub const KEY_FRAME_HEADER_SIZE: usize = 10;

/// Returns `(width, height)` of a VP8 key frame
pub fn parse_key_frame(data: &[u8]) -> Result<(u32, u32)> {
    if data.len() < KEY_FRAME_HEADER_SIZE {
        return Err(Error::truncated("vp8 frame header"));
    }
    let tag = data[0];
    if tag & 1 != 0 {
        return Err(Error::bad("vp8 frame is not a key frame"));
    }
    if (tag >> 1) & 7 > 3 {
        return Err(Error::bad(format!("bad vp8 version: {}", (tag >> 1) & 7)));
    }
    if data[3..6] != KEY_FRAME_START_CODE {
        return Err(Error::bad("vp8 key frame start code not found"));
    }
    // Top two bits of each are the upscaling mode.
    let width = LittleEndian::read_u16(&data[6..8]) & 0x3fff;
    let height = LittleEndian::read_u16(&data[8..10]) & 0x3fff;
    Ok((width as u32, height as u32))
}

/// Returns `(width, height)` of a VP8L bitstream header
pub fn parse_vp8l_header(data: &[u8]) -> Result<(u32, u32)> {
    let Some((&signature, rest)) = data.split_first() else {
        return Err(Error::truncated("vp8l header"));
    };
    if signature != VP8L_SIGNATURE {
        return Err(Error::bad(format!("bad vp8l signature: 0x{signature:02x}")));
    }
    let mut br = LsbBitReader::new(rest);
    let width = br.read_bits(14)? + 1;
    let height = br.read_bits(14)? + 1;
    br.read_bits(1)?; // alpha_is_used
    let version = br.read_bits(3)?;
    if version != 0 {
        return Err(Error::bad(format!("bad vp8l version: {version}")));
    }
    Ok((width, height))
}

/// Builds a video track from a VP8 key frame
pub fn parse_track(data: &[u8]) -> Result<Track> {
    let (width, height) = parse_key_frame(data)?;
    let mut track = Track::video("vp8");
    track.set_dimensions(width, height)?;
    Ok(track)
}

/// Analyzes a raw VP8 key frame
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(KEY_FRAME_HEADER_SIZE)?;
    info.set_format("vp8");
    let track = parse_track(&data)?;
    info.add_track(track);
    Ok(())
}
