//! FLV tag walker
//!
//! Audio parameters come from the flags byte of the first audio tag. Video
//! dimensions come from the first keyframe of the codec: the H.263 picture
//! header, the screen video block header, the VP6 frame header or the SPS
//! in the AVC decoder configuration record.

use crate::{
    codecs::h264,
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt, SubSource},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

pub const FLV_HEADER_SIZE: usize = 13;
const TAG_HEADER_SIZE: usize = 11;

pub const MAX_AUDIO_TAG_SIZE: u64 = 8191;
pub const MAX_VIDEO_TAG_SIZE: u64 = (1 << 22) - 1;
pub const MAX_SCRIPT_TAG_SIZE: u64 = 400_000;

/// Bytes read from the start of a video tag; the rest is skipped
const VIDEO_TAG_READ: usize = 4096;

/// Non-audio tags read before giving up on missing tracks
const MAX_NONAUDIO_TAGS: u32 = 4;

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_AMF3: u8 = 15;
const TAG_SCRIPT: u8 = 18;

const AUDIO_CODECS: [&str; 16] = [
    "pcm",
    "adpcm",
    "mp3",
    "pcm",
    "nellymoser",
    "nellymoser",
    "nellymoser",
    "alaw",
    "mulaw",
    "reserved9",
    "aac",
    "speex",
    "reserved12",
    "reserved13",
    "mp3",
    "reserved15",
];

const VIDEO_CODECS: [&str; 16] = [
    "reserved0",
    "reserved1",
    "h263",
    "screen",
    "vp6",
    "vp6alpha",
    "screen2",
    "h264",
    "u8",
    "u9",
    "u10",
    "u11",
    "u12",
    "u13",
    "u14",
    "u15",
];

/// Video frame type that carries no picture (command frame)
const FRAME_TYPE_COMMAND: u8 = 5;

fn parse_audio_flags(b: u8) -> Track {
    let mut track = Track::audio(AUDIO_CODECS[(b >> 4) as usize]);
    track.sample_rate = Some([5512, 11025, 22050, 44100][((b >> 2) & 3) as usize]);
    track.sample_size = Some(if b & 2 != 0 { 16 } else { 8 });
    track.channel_count = Some(if b & 1 != 0 { 2 } else { 1 });
    track
}

/// H.263 picture header (Sorenson Spark)
fn h263_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    if data.len() < 9 {
        return Err(Error::truncated("flv h263 video tag"));
    }
    let b = BigEndian::read_u64(&data[1..9]);
    if b >> 47 != 1 {
        return Err(Error::bad(format!("bad flv h263 picture start code: 0x{:x}", b >> 47)));
    }
    let version = (b >> 42) & 31;
    if version > 1 {
        return Err(Error::bad(format!("bad flv h263 version: {version}")));
    }
    Ok(match (b >> 31) & 7 {
        0 => (((b >> 23) & 255) as u32, ((b >> 15) & 255) as u32),
        1 => {
            let b1 = *data.get(9).ok_or_else(|| Error::truncated("flv h263 video tag"))?;
            (((b >> 15) & 65535) as u32, ((b & 32767) << 1) as u32 | (b1 >> 7) as u32)
        }
        7 => return Err(Error::bad("bad flv h263 picture size")),
        n => [(352, 288), (176, 144), (128, 96), (320, 240), (160, 120)][n as usize - 2],
    })
}

fn screen_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    if data.len() < 9 {
        return Err(Error::truncated("flv screen video tag"));
    }
    let width = BigEndian::read_u16(&data[1..3]) & 4095;
    let height = BigEndian::read_u16(&data[3..5]) & 4095;
    Ok((width as u32, height as u32))
}

fn vp6_dimensions(data: &[u8], alpha: bool) -> Result<(u32, u32)> {
    if data.len() < 10 {
        return Err(Error::truncated("flv vp6 video tag"));
    }
    let (adjust_width, adjust_height) = ((data[1] >> 4) as u32, (data[1] & 15) as u32);
    let mut i = 2;
    if alpha {
        let color_size = BigEndian::read_u24(&data[2..5]) as usize;
        if color_size < 8 || color_size + 4 > data.len() {
            return Err(Error::bad(format!("bad flv vp6alpha color frame size: {color_size}")));
        }
        if data.len() < 13 {
            return Err(Error::truncated("flv vp6alpha video tag"));
        }
        i = 5;
    }
    let b = data[i];
    if b & 0x80 != 0 {
        return Err(Error::bad("first flv vp6 frame is not an intra frame"));
    }
    let marker = b & 1 != 0;
    let version2 = (data[i + 1] >> 1) & 3;
    i += 2 + if marker || version2 == 0 { 2 } else { 0 };
    let dims = data.get(i + 2..i + 4).ok_or_else(|| Error::truncated("flv vp6 frame header"))?;
    let width = (dims[1] as u32 * 16).checked_sub(adjust_width);
    let height = (dims[0] as u32 * 16).checked_sub(adjust_height);
    match (width, height) {
        (Some(w), Some(h)) => Ok((w, h)),
        _ => Err(Error::bad("flv vp6 size adjustment too large")),
    }
}

fn avc_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    if data.len() < 5 {
        return Err(Error::truncated("flv h264 video tag"));
    }
    if data[1] != 0 {
        return Err(Error::bad(format!("unexpected flv h264 packet type: {}", data[1])));
    }
    let sps = h264::parse_avcc(&data[5..])?;
    Ok((sps.width, sps.height))
}

/// Builds the video track from the head of the first picture tag
fn parse_video_tag(data: &[u8]) -> Result<Track> {
    let codec_id = data[0] & 15;
    let mut track = Track::video(VIDEO_CODECS[codec_id as usize]);
    let dims = match codec_id {
        2 => Some(h263_dimensions(data)?),
        3 | 6 => Some(screen_dimensions(data)?),
        4 | 5 => Some(vp6_dimensions(data, codec_id == 5)?),
        7 => Some(avc_dimensions(data)?),
        _ => None,
    };
    if let Some((width, height)) = dims {
        track.set_dimensions(width, height)?;
    }
    Ok(track)
}

fn check_size(size: u64, max: u64) -> Result<()> {
    if size > max {
        return Err(Error::DataTooLarge { size, max });
    }
    Ok(())
}

/// Analyzes a Flash Video file
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_exact_vec(FLV_HEADER_SIZE, "flv header")?;
    if &header[0..3] != b"FLV" {
        return Err(Error::bad("flv signature not found"));
    }
    if header[3] != 1 {
        return Err(Error::bad(format!("unsupported flv version: {}", header[3])));
    }
    if header[5..9] != [0, 0, 0, 9] {
        return Err(Error::bad("bad flv header size"));
    }
    let flags = header[4];
    // Bit 3 is reserved too, but set by some muxers.
    if flags & !(1 | 4 | 8) != 0 {
        return Err(Error::bad(format!("nonzero flv reserved flags: 0x{flags:x}")));
    }
    info.set_format("flv");

    let mut want_audio = flags & 4 != 0;
    let mut want_video = flags & 1 != 0;
    let mut audio = None;
    let mut video = None;
    let mut nonaudio_left = MAX_NONAUDIO_TAGS;
    while want_audio || want_video {
        let tag = src.read_vec(TAG_HEADER_SIZE)?;
        if tag.is_empty() {
            break;
        }
        if tag.len() < TAG_HEADER_SIZE {
            return Err(Error::truncated("flv tag header"));
        }
        let kind = tag[0];
        let size = BigEndian::read_u24(&tag[1..4]) as u64;
        trace!(kind, size, "flv tag");
        if kind & 0xc0 != 0 {
            return Err(Error::bad("nonzero flv reserved tag flags"));
        }
        if kind & 0x20 != 0 {
            return Err(Error::bad("encrypted flv tags are not supported"));
        }
        if tag[8..11] != [0, 0, 0] {
            return Err(Error::bad("unexpected flv stream id"));
        }
        if kind != TAG_AUDIO {
            if nonaudio_left == 0 {
                break;
            }
            nonaudio_left -= 1;
        }
        match kind {
            TAG_AUDIO => {
                check_size(size, MAX_AUDIO_TAG_SIZE)?;
                let data = src.read_exact_vec(size as usize, "flv audio tag")?;
                let first = *data.first().ok_or_else(|| Error::bad("empty flv audio tag"))?;
                if want_audio {
                    audio = Some(parse_audio_flags(first));
                    want_audio = false;
                }
            }
            TAG_VIDEO => {
                check_size(size, MAX_VIDEO_TAG_SIZE)?;
                if size < 4 {
                    return Err(Error::bad("flv video tag too small"));
                }
                let mut body = SubSource::new(&mut *src, size);
                let data = body.read_vec(VIDEO_TAG_READ)?;
                if !body.finish()? || data.len() < (size as usize).min(VIDEO_TAG_READ) {
                    return Err(Error::truncated("flv video tag"));
                }
                if want_video && data[0] >> 4 != FRAME_TYPE_COMMAND {
                    video = Some(parse_video_tag(&data)?);
                    want_video = false;
                }
            }
            TAG_AMF3 | TAG_SCRIPT => {
                check_size(size, MAX_SCRIPT_TAG_SIZE)?;
                src.skip_exact(size, "flv script tag")?;
            }
            _ => return Err(Error::bad(format!("unknown flv tag type: {kind}"))),
        }
        // PreviousTagSize is often garbage, so it is not checked.
        src.skip_exact(4, "flv previous tag size")?;
    }

    info.tracks.extend(audio);
    info.tracks.extend(video);
    Ok(())
}
