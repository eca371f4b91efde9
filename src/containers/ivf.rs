//! IVF (`DKIF`) walker
//!
//! The 32-byte file header names the codec and usually the frame size. When
//! the header leaves the size at zero, the first frame is handed to the
//! codec's key frame parser.

use super::fourcc_lower;
use crate::{
    codecs::{av1, h264, vp8, vp9},
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt, SubSource},
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

pub const IVF_HEADER_SIZE: usize = 32;
const FRAME_HEADER_SIZE: usize = 12;

/// Bytes of the first frame handed to the codec parser
pub const MAX_FRAME_READ: usize = 4096;

/// Largest extra header tail skipped before the first frame
const MAX_HEADER_SIZE: u64 = 1024;

fn codec_for(fourcc: &[u8]) -> String {
    match fourcc_lower(fourcc).as_str() {
        "vp80" => "vp8".into(),
        "vp90" => "vp9".into(),
        "av01" => "av1".into(),
        "h264" | "avc1" => "h264".into(),
        other => other.into(),
    }
}

fn parse_first_frame(codec: &str, frame: &[u8], whole: bool) -> Result<Option<Track>> {
    Ok(Some(match codec {
        "vp8" => vp8::parse_track(frame)?,
        "vp9" => vp9::parse_track(frame)?,
        "av1" => av1::parse_track(frame, whole)?,
        "h264" => h264::parse_track(frame)?,
        _ => return Ok(None),
    }))
}

/// Analyzes an IVF file
///
/// A header cut short after the fourcc still yields the track.
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_vec(IVF_HEADER_SIZE)?;
    if !header.starts_with(b"DKIF") {
        return Err(Error::bad("ivf signature not found"));
    }
    info.set_format("ivf");
    if header.len() < 12 {
        return Ok(());
    }
    let codec = codec_for(&header[8..12]);
    let mut track = Track::video(codec.as_str());
    if header.len() >= 16 {
        let width = LittleEndian::read_u16(&header[12..14]) as u32;
        let height = LittleEndian::read_u16(&header[14..16]) as u32;
        trace!(codec = %codec, width, height, "ivf header");
        if width != 0 && height != 0 {
            track.set_dimensions(width, height)?;
            info.add_track(track);
            return Ok(());
        }
    }
    if header.len() < IVF_HEADER_SIZE {
        info.add_track(track);
        return Ok(());
    }

    let header_size = LittleEndian::read_u16(&header[6..8]) as u64;
    if header_size > MAX_HEADER_SIZE {
        return Err(Error::DataTooLarge {
            size: header_size,
            max: MAX_HEADER_SIZE,
        });
    }
    if header_size > IVF_HEADER_SIZE as u64 {
        src.skip_exact(header_size - IVF_HEADER_SIZE as u64, "ivf header")?;
    }
    let frame_header = src.read_vec(FRAME_HEADER_SIZE)?;
    if frame_header.len() == FRAME_HEADER_SIZE {
        let size = LittleEndian::read_u32(&frame_header[0..4]) as u64;
        let mut frame_src = SubSource::new(&mut *src, size);
        let frame = frame_src.read_vec(MAX_FRAME_READ)?;
        let whole = frame.len() as u64 == size;
        if let Some(parsed) = parse_first_frame(&codec, &frame, whole)? {
            track = parsed;
        }
    }
    info.add_track(track);
    Ok(())
}
