//! RealMedia (`.RMF`) and RealAudio (`.ra\xfd`) headers
//!
//! A RealMedia file is a sequence of `<id><u32 BE size>` chunks, the size
//! counting the 8-byte chunk header. Each stream is described by an `MDPR`
//! chunk whose type-specific data is a RealAudio header or a `VIDO` video
//! header. The walk ends at the `DATA` chunk.

use super::fourcc_lower;
use crate::{
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::{trace, warn};

const CHUNK_HEADER_SIZE: u64 = 8;
const REALAUDIO_SIGNATURE: &[u8; 4] = b".ra\xfd";

/// Largest `MDPR` chunk read; real ones are a few hundred bytes
pub const MAX_MDPR_SIZE: u64 = 1 << 16;

/// Chunks looked at before `DATA`
const MAX_RM_CHUNKS: usize = 256;

fn audio_codec(fourcc: &[u8]) -> String {
    match fourcc {
        b"lpcJ" => "vslp-ra1".into(),
        b"28_8" => "ld-celp-ra2".into(),
        b"dnet" => "ac3".into(),
        b"sipr" => "sipro".into(),
        b"cook" => "cook".into(),
        b"atrc" => "atrac3".into(),
        b"ralf" => "ralf".into(),
        b"raac" | b"racp" => "aac".into(),
        other => fourcc_lower(other),
    }
}

fn video_codec(fourcc: &[u8]) -> String {
    match fourcc {
        b"RV10" => "h263-rv10".into(),
        b"RV20" => "h263+-rv20".into(),
        b"RV30" => "h264-rv30".into(),
        b"RV40" => "h264-rv40".into(),
        b"RV60" => "rv6".into(),
        other => fourcc_lower(other),
    }
}

fn u16_at(data: &[u8], at: usize, what: &str) -> Result<u16> {
    data.get(at..at + 2)
        .map(BigEndian::read_u16)
        .ok_or_else(|| Error::truncated(what))
}

/// Parses a RealAudio stream header (versions 3 to 5)
pub fn parse_realaudio_header(data: &[u8]) -> Result<Track> {
    let what = "realaudio header";
    if !data.starts_with(REALAUDIO_SIGNATURE) {
        return Err(Error::bad("realaudio signature not found"));
    }
    let version = u16_at(data, 4, what)?;
    // Version 5 has 6 more bytes before the sample rate.
    let (base, fourcc) = match version {
        3 => {
            let mut track = Track::audio("vslp-ra1");
            track.channel_count = Some(1);
            track.sample_rate = Some(8000);
            track.sample_size = Some(16);
            track.subformat = Some("ra3".into());
            return Ok(track);
        }
        4 => {
            // Length-prefixed interleaver and codec names
            let interleaver_len = *data.get(56).ok_or_else(|| Error::truncated(what))? as usize;
            let at = 57 + interleaver_len;
            let codec_len = *data.get(at).ok_or_else(|| Error::truncated(what))? as usize;
            let fourcc = data
                .get(at + 1..at + 1 + codec_len)
                .ok_or_else(|| Error::truncated(what))?;
            (48, fourcc)
        }
        5 => (54, data.get(66..70).ok_or_else(|| Error::truncated(what))?),
        other => return Err(Error::bad(format!("unknown realaudio version: {other}"))),
    };
    let mut track = Track::audio(audio_codec(fourcc));
    track.sample_rate = Some(u16_at(data, base, what)? as u32);
    track.sample_size = Some(u16_at(data, base + 4, what)? as u32);
    track.channel_count = Some(u16_at(data, base + 6, what)? as u32);
    track.subformat = Some(format!("ra{version}"));
    Ok(track)
}

/// Parses a `VIDO` video stream header: signature, codec, width, height
pub fn parse_video_header(data: &[u8]) -> Result<Track> {
    let what = "realvideo header";
    if !data.starts_with(b"VIDO") {
        return Err(Error::bad("realvideo signature not found"));
    }
    let Some(fourcc) = data.get(4..8) else {
        return Err(Error::truncated(what));
    };
    let mut track = Track::video(video_codec(fourcc));
    track.set_dimensions(u16_at(data, 8, what)? as u32, u16_at(data, 10, what)? as u32)?;
    Ok(track)
}

/// Reads a string with a one-byte length prefix, returning it and the
/// offset after it
fn pascal_string<'a>(data: &'a [u8], at: usize, what: &str) -> Result<(&'a [u8], usize)> {
    let len = *data.get(at).ok_or_else(|| Error::truncated(what))? as usize;
    let end = at + 1 + len;
    let s = data.get(at + 1..end).ok_or_else(|| Error::truncated(what))?;
    Ok((s, end))
}

/// Builds a track from the body of an `MDPR` chunk
///
/// Streams that are neither RealAudio nor RealVideo give `None`.
pub fn parse_mdpr(body: &[u8]) -> Result<Option<Track>> {
    let what = "rm MDPR chunk";
    // version, stream number, seven 32-bit rates, sizes and times
    let (name, at) = pascal_string(body, 32, what)?;
    let (mime, at) = pascal_string(body, at, what)?;
    trace!(
        name = %String::from_utf8_lossy(name),
        mime = %String::from_utf8_lossy(mime),
        "rm stream"
    );
    let size = body
        .get(at..at + 4)
        .map(BigEndian::read_u32)
        .ok_or_else(|| Error::truncated(what))? as usize;
    let data = body
        .get(at + 4..at + 4 + size)
        .ok_or_else(|| Error::truncated(what))?;
    if data.starts_with(REALAUDIO_SIGNATURE) {
        parse_realaudio_header(data).map(Some)
    } else if data.get(4..8) == Some(&b"VIDO"[..]) {
        parse_video_header(&data[4..]).map(Some)
    } else {
        Ok(None)
    }
}

/// Analyzes a RealMedia file from its `MDPR` chunks
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set_format("rm");
    for _ in 0..MAX_RM_CHUNKS {
        let offset = src.position();
        let header = src.read_vec(CHUNK_HEADER_SIZE as usize)?;
        if header.is_empty() {
            return Ok(());
        }
        if header.len() < CHUNK_HEADER_SIZE as usize {
            return Err(Error::truncated("rm chunk header"));
        }
        let id = &header[0..4];
        let size = BigEndian::read_u32(&header[4..8]) as u64;
        if size < CHUNK_HEADER_SIZE {
            return Err(Error::InvalidSegment {
                offset,
                reason: format!("rm chunk too small: {size}"),
            });
        }
        let body_size = size - CHUNK_HEADER_SIZE;
        trace!(id = %String::from_utf8_lossy(id), size, offset, "rm chunk");
        match id {
            b"DATA" | b"INDX" => return Ok(()),
            b"MDPR" => {
                if body_size > MAX_MDPR_SIZE {
                    return Err(Error::DataTooLarge {
                        size: body_size,
                        max: MAX_MDPR_SIZE,
                    });
                }
                let body = src.read_exact_vec(body_size as usize, "rm MDPR chunk")?;
                if let Some(track) = parse_mdpr(&body)? {
                    info.add_track(track);
                }
            }
            _ => src.skip_exact(body_size, "rm chunk")?,
        }
    }
    warn!(max = MAX_RM_CHUNKS, "rm DATA chunk not reached");
    Ok(())
}

/// Analyzes a bare RealAudio file
pub fn analyze_realaudio(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set_format("realaudio");
    // Long enough for every header version
    let data = src.read_vec(128)?;
    let track = parse_realaudio_header(&data)?;
    info.add_track(track);
    Ok(())
}
