//! VP9 uncompressed key frame header parser

use crate::{
    bits::BitReader,
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};

pub const SYNC_CODE: u32 = 0x498342;

/// Enough bytes for the frame size of any key frame header
pub const MAX_HEADER_SIZE: usize = 16;

const CS_RGB: u32 = 7;

/// Fields of an uncompressed key frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFrame {
    pub profile: u8,
    pub bit_depth: u8,
    pub width: u32,
    pub height: u32,
}

/// Parses the uncompressed header of a VP9 key frame
pub fn parse_key_frame(data: &[u8]) -> Result<KeyFrame> {
    let mut br = BitReader::new(data).named("vp9 frame header");
    if br.read_bits(2)? != 2 {
        return Err(Error::bad("bad vp9 frame marker"));
    }
    let profile_low = br.read_bit()?;
    let profile = (br.read_bit()? << 1 | profile_low) as u8;
    if profile == 3 && br.read_flag()? {
        return Err(Error::bad("vp9 reserved bit set"));
    }
    if br.read_flag()? {
        return Err(Error::bad("vp9 frame shows an existing frame"));
    }
    if br.read_flag()? {
        return Err(Error::bad("vp9 frame is not a key frame"));
    }
    br.skip_bits(2)?; // show_frame, error_resilient_mode
    if br.read_bits(24)? != SYNC_CODE {
        return Err(Error::bad("vp9 sync code not found"));
    }
    // color_config()
    let mut bit_depth = 8;
    if profile >= 2 {
        bit_depth = if br.read_flag()? { 12 } else { 10 };
    }
    let color_space = br.read_bits(3)?;
    if color_space != CS_RGB {
        br.skip_bits(1)?; // color_range
        if profile == 1 || profile == 3 {
            br.skip_bits(3)?; // subsampling_x, subsampling_y, reserved_zero
        }
    } else if profile == 1 || profile == 3 {
        br.skip_bits(1)?;
    }
    let width = br.read_bits(16)? + 1;
    let height = br.read_bits(16)? + 1;
    Ok(KeyFrame {
        profile,
        bit_depth,
        width,
        height,
    })
}

pub fn parse_track(data: &[u8]) -> Result<Track> {
    let frame = parse_key_frame(data)?;
    let mut track = Track::video("vp9");
    track.set_dimensions(frame.width, frame.height)?;
    track.set_extra("profile", frame.profile);
    Ok(track)
}

/// Analyzes a raw VP9 key frame
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_HEADER_SIZE)?;
    info.set_format("vp9");
    let track = parse_track(&data)?;
    info.add_track(track);
    Ok(())
}
