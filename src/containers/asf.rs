//! ASF header object walker (WMV, WMA)
//!
//! Only the objects nested in the leading header object are read; stream
//! properties objects carry a WAVEFORMATEX or a BITMAPINFOHEADER.

use super::{guid, windows_audio_codec, windows_guid_audio_codec, windows_video_codec, WAVE_FORMAT_EXTENSIBLE};
use crate::{
    error::{Error, Result},
    info::{Info, Track, TrackKind},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

pub const HEADER_OBJECT: [u8; 16] = guid("75b22630-668e-11cf-a6d9-00aa0062ce6c");
const STREAM_PROPERTIES_OBJECT: [u8; 16] = guid("b7dc0791-a9b7-11cf-8ee6-00c00c205365");
const AUDIO_MEDIA: [u8; 16] = guid("f8699e40-5b4d-11cf-a8fd-00805f5c442b");
const VIDEO_MEDIA: [u8; 16] = guid("bc19efc0-5b4d-11cf-a8fd-00805f5c442b");

const HEADER_SIZE: u64 = 30;
const OBJECT_HEADER_SIZE: u64 = 24;

/// Largest header object payload accepted (typical files use about 5 KiB)
pub const MAX_HEADER_OBJECT_SIZE: u64 = 500_000;

/// Largest nested object accepted
pub const MAX_OBJECT_SIZE: u64 = 350_000;

/// Fixed part of a stream properties object before the type-specific data
const STREAM_PROPERTIES_SIZE: usize = 54;

fn parse_audio(data: &[u8]) -> Result<Track> {
    if data.len() < 16 {
        return Err(Error::truncated("asf audio properties"));
    }
    let format_tag = LittleEndian::read_u16(&data[0..2]);
    let codec = match data.get(18..40) {
        // cbSize, samples, channel mask, SubFormat
        Some(ext) if format_tag == WAVE_FORMAT_EXTENSIBLE && LittleEndian::read_u16(&data[16..18]) >= 22 => {
            let mut sub_format = [0u8; 16];
            sub_format.copy_from_slice(&ext[6..22]);
            windows_guid_audio_codec(&sub_format)
        }
        _ => windows_audio_codec(format_tag),
    };
    let mut track = Track::audio(codec);
    track.channel_count = Some(LittleEndian::read_u16(&data[2..4]) as u32);
    track.sample_rate = Some(LittleEndian::read_u32(&data[4..8]));
    // mp3 streams usually leave this at 0
    track.sample_size = Some(match LittleEndian::read_u16(&data[14..16]) {
        0 => 16,
        n => n as u32,
    });
    Ok(track)
}

fn parse_video(data: &[u8], type_specific_size: usize) -> Result<Track> {
    if data.len() < 31 {
        return Err(Error::truncated("asf video properties"));
    }
    let width = LittleEndian::read_u32(&data[0..4]);
    let height = LittleEndian::read_u32(&data[4..8]);
    let format_data_size = LittleEndian::read_u16(&data[9..11]) as u32;
    if format_data_size != LittleEndian::read_u32(&data[11..15]) {
        return Err(Error::bad("mismatch in asf video format data size"));
    }
    if format_data_size as usize + 11 != type_specific_size {
        return Err(Error::bad("unexpected asf video format data size"));
    }
    if (width, height) != (LittleEndian::read_u32(&data[15..19]), LittleEndian::read_u32(&data[19..23])) {
        return Err(Error::bad("mismatch in asf video dimensions"));
    }
    let mut code = [0u8; 4];
    code.copy_from_slice(&data[27..31]);
    let mut track = Track::video(windows_video_codec(&code)?);
    track.set_dimensions(width, height)?;
    Ok(track)
}

fn parse_stream_properties(data: &[u8]) -> Result<Option<Track>> {
    if data.len() < STREAM_PROPERTIES_SIZE {
        return Err(Error::truncated("asf stream properties"));
    }
    let type_specific_size = LittleEndian::read_u32(&data[40..44]) as usize;
    if STREAM_PROPERTIES_SIZE + type_specific_size > data.len() {
        return Err(Error::bad("no room for asf stream type-specific data"));
    }
    let specific = &data[STREAM_PROPERTIES_SIZE..];
    match &data[0..16] {
        t if t == AUDIO_MEDIA => parse_audio(specific).map(Some),
        t if t == VIDEO_MEDIA => parse_video(specific, type_specific_size).map(Some),
        _ => Ok(None),
    }
}

/// Analyzes an ASF file and refines the format to `wmv` or `wma`
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_exact_vec(HEADER_SIZE as usize, "asf header object")?;
    if header[0..16] != HEADER_OBJECT {
        return Err(Error::bad("asf signature not found"));
    }
    let size = LittleEndian::read_u64(&header[16..24]);
    let mut count = LittleEndian::read_u32(&header[24..28]);
    let reserved = LittleEndian::read_u16(&header[28..30]);
    if reserved != 0x201 {
        return Err(Error::bad(format!("unexpected asf reserved value: 0x{reserved:x}")));
    }
    let mut room = size
        .checked_sub(HEADER_SIZE)
        .ok_or_else(|| Error::bad("asf header object too small"))?;
    if room > MAX_HEADER_OBJECT_SIZE {
        return Err(Error::DataTooLarge {
            size: room,
            max: MAX_HEADER_OBJECT_SIZE,
        });
    }
    info.set_format("asf");

    while room > 0 {
        if count == 0 {
            return Err(Error::bad("more data than objects in asf header"));
        }
        if room < OBJECT_HEADER_SIZE {
            return Err(Error::bad("no room for asf object header"));
        }
        let object = src.read_exact_vec(OBJECT_HEADER_SIZE as usize, "asf object header")?;
        let object_size = LittleEndian::read_u64(&object[16..24]);
        if object_size < OBJECT_HEADER_SIZE || object_size > room {
            return Err(Error::InvalidSegment {
                offset: src.position() - OBJECT_HEADER_SIZE,
                reason: format!("bad asf object size: {object_size}"),
            });
        }
        room -= object_size;
        count -= 1;
        let body_size = object_size - OBJECT_HEADER_SIZE;
        if body_size > MAX_OBJECT_SIZE {
            return Err(Error::DataTooLarge {
                size: body_size,
                max: MAX_OBJECT_SIZE,
            });
        }
        trace!(size = object_size, "asf object");
        if object[0..16] == STREAM_PROPERTIES_OBJECT {
            let data = src.read_exact_vec(body_size as usize, "asf stream properties")?;
            if let Some(track) = parse_stream_properties(&data)? {
                info.add_track(track);
            }
        } else {
            src.skip_exact(body_size, "asf object")?;
        }
    }

    if info.tracks.iter().any(|t| t.kind == TrackKind::Video) {
        info.set_format("wmv");
    } else if !info.tracks.is_empty() {
        info.set_format("wma");
    }
    Ok(())
}
