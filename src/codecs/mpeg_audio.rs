//! MPEG audio (layers I-III), ADTS AAC and AC-3 frame header parsers
//!
//! All three are fixed-layout headers at the start of a frame, so each parser
//! takes a byte slice and never needs more than [`MAX_FRAME_HEADER_SIZE`]
//! bytes.

use crate::{
    error::{Error, Result},
    info::{Field, Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use std::borrow::Cow;
use tracing::{debug, trace};

/// Bytes needed by any of the frame header parsers
pub const MAX_FRAME_HEADER_SIZE: usize = 7;

/// Size of an ID3v2 tag header (and footer)
pub const ID3V2_HEADER_SIZE: usize = 10;

/// Bytes searched for the first audio frame after an ID3v2 tag
pub const MAX_ID3V2_GAP: usize = 4096;

pub const AC3_SYNC_WORD: [u8; 2] = [0x0b, 0x77];

const MPEG1_SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];

const ADTS_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const AC3_SAMPLE_RATES: [u32; 3] = [48000, 44100, 32000];

/// Full-bandwidth channels by `acmod`; the LFE channel is not counted
const AC3_CHANNELS: [u32; 8] = [2, 1, 2, 3, 3, 4, 4, 5];

/// Highest AC-3 `bsid`; larger values are E-AC-3 or unknown
const AC3_MAX_BSID: u8 = 10;

/// Which kind of frame header starts `data`, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// MPEG-1/2/2.5 layer I, II or III
    Mpeg,
    Adts,
    Ac3,
}

pub fn frame_kind(data: &[u8]) -> Option<FrameKind> {
    match data {
        [0x0b, 0x77, ..] => Some(FrameKind::Ac3),
        [0xff, b, ..] if b & 0xf6 == 0xf0 => Some(FrameKind::Adts),
        [0xff, b, ..] if b & 0xe0 == 0xe0 => Some(FrameKind::Mpeg),
        _ => None,
    }
}

/// Parses an MPEG audio layer I/II/III frame header
///
/// The codec is `mp1`, `mp2` or `mp3` by layer; the track subformat is the
/// MPEG version (`mpeg-1`, `mpeg-2` or `mpeg-2.5`).
pub fn parse_mpeg_header(data: &[u8]) -> Result<Track> {
    let Some(&[b0, b1, b2, b3]) = data.get(..4).and_then(|h| <&[u8; 4]>::try_from(h).ok()) else {
        return Err(Error::truncated("mpeg audio header"));
    };
    if b0 != 0xff || b1 & 0xe0 != 0xe0 {
        return Err(Error::bad("mpeg audio sync not found"));
    }
    let (subformat, rate_divisor) = match (b1 >> 3) & 3 {
        0 => ("mpeg-2.5", 4),
        2 => ("mpeg-2", 2),
        3 => ("mpeg-1", 1),
        _ => return Err(Error::bad("bad mpeg audio version")),
    };
    let codec = match (b1 >> 1) & 3 {
        1 => "mp3",
        2 => "mp2",
        3 => "mp1",
        _ => return Err(Error::bad("bad mpeg audio layer")),
    };
    if b2 >> 4 == 15 {
        return Err(Error::bad("bad mpeg audio bitrate index"));
    }
    let rate_index = ((b2 >> 2) & 3) as usize;
    let Some(&rate) = MPEG1_SAMPLE_RATES.get(rate_index) else {
        return Err(Error::bad("bad mpeg audio sample rate index"));
    };
    let mut track = Track::audio(codec);
    track.subformat = Some(subformat.to_string());
    track.sample_rate = Some(rate / rate_divisor);
    track.sample_size = Some(16);
    track.channel_count = Some(if b3 >> 6 == 3 { 1 } else { 2 });
    Ok(track)
}

/// Parses an ADTS (AAC) frame header
pub fn parse_adts_header(data: &[u8]) -> Result<Track> {
    if data.len() < 4 {
        return Err(Error::truncated("adts header"));
    }
    if data[0] != 0xff || data[1] & 0xf6 != 0xf0 {
        return Err(Error::bad("adts sync not found"));
    }
    let rate_index = ((data[2] >> 2) & 0xf) as usize;
    let Some(&rate) = ADTS_SAMPLE_RATES.get(rate_index) else {
        return Err(Error::bad(format!("bad adts sample rate index: {rate_index}")));
    };
    let channel_config = (data[2] & 1) << 2 | data[3] >> 6;
    let mut track = Track::audio("aac");
    track.subformat = Some("mpeg-4".to_string());
    track.sample_rate = Some(rate);
    track.sample_size = Some(16);
    // 0 means the layout is given in-band by a program config element.
    track.channel_count = match channel_config {
        0 => None,
        7 => Some(8),
        n => Some(n as u32),
    };
    Ok(track)
}

/// Parses an AC-3 sync frame header
pub fn parse_ac3_header(data: &[u8]) -> Result<Track> {
    if data.len() < MAX_FRAME_HEADER_SIZE {
        return Err(Error::truncated("ac3 header"));
    }
    if data[..2] != AC3_SYNC_WORD {
        return Err(Error::bad("ac3 sync word not found"));
    }
    let Some(&rate) = AC3_SAMPLE_RATES.get((data[4] >> 6) as usize) else {
        return Err(Error::bad("bad ac3 fscod"));
    };
    let bsid = data[5] >> 3;
    if bsid > AC3_MAX_BSID {
        return Err(Error::bad(format!("bad ac3 bsid: {bsid}")));
    }
    let acmod = (data[6] >> 5) as usize;
    let mut track = Track::audio("ac3");
    track.sample_rate = Some(rate);
    track.sample_size = Some(16);
    track.channel_count = Some(AC3_CHANNELS[acmod]);
    Ok(track)
}

/// Parses the audio format bytes of a DVD LPCM packet (emphasis/mute,
/// format, dynamic range)
pub fn parse_dvd_lpcm_header(data: &[u8]) -> Result<Track> {
    if data.len() < 3 {
        return Err(Error::truncated("lpcm header"));
    }
    let b = data[1];
    let mut track = Track::audio("lpcm");
    track.sample_size = Some(match b >> 6 {
        0 => 16,
        1 => 20,
        2 => 24,
        _ => return Err(Error::bad("bad lpcm sample size")),
    });
    track.sample_rate = Some(if (b >> 4) & 3 == 0 { 48000 } else { 96000 });
    track.channel_count = Some((b & 7) as u32 + 1);
    Ok(track)
}

/// Builds an audio track from whichever frame header starts `data`
pub fn parse_track(data: &[u8]) -> Result<Track> {
    match frame_kind(data) {
        Some(FrameKind::Ac3) => parse_ac3_header(data),
        Some(FrameKind::Adts) => parse_adts_header(data),
        Some(FrameKind::Mpeg) => parse_mpeg_header(data),
        None if data.len() < 2 => Err(Error::truncated("audio frame header")),
        None => Err(Error::bad("audio frame header not found")),
    }
}

/// Format name for a stream whose first frame produced `track`
fn format_for(track: &Track) -> &'static str {
    if track.codec == "mp3" {
        "mp3"
    } else {
        "mpeg-adts"
    }
}

/// Analyzes a raw MPEG audio or ADTS stream
pub fn analyze_adts(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(4)?;
    let track = parse_track(&data)?;
    info.set_format(format_for(&track));
    info.add_track(track);
    Ok(())
}

/// Analyzes an ID3v2 tag and the first audio frame after it
pub fn analyze_id3v2(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<ID3V2_HEADER_SIZE>("id3v2 header")?;
    if &header[..3] != b"ID3" {
        return Err(Error::bad("id3v2 signature not found"));
    }
    let (major, revision, flags) = (header[3], header[4], header[5]);
    if !(2..=4).contains(&major) {
        return Err(Error::bad(format!("bad id3v2 version: {major}")));
    }
    if header[6..].iter().any(|b| b & 0x80 != 0) {
        return Err(Error::bad("bad id3v2 tag size"));
    }
    let mut size = header[6..]
        .iter()
        .fold(0u64, |acc, &b| acc << 7 | b as u64);
    if flags & 0x10 != 0 {
        size += ID3V2_HEADER_SIZE as u64;
    }
    info.set(
        Field::Other(Cow::Borrowed("id3_version")),
        format!("2.{major}.{revision}"),
    );
    trace!(size, "skipping id3v2 tag");
    src.skip_exact(size, "id3v2 tag")?;

    let data = src.read_vec(MAX_ID3V2_GAP + MAX_FRAME_HEADER_SIZE)?;
    let mut at = 0;
    let track = loop {
        let Some(pos) = data.get(at..).and_then(|d| d.iter().position(|&b| b == 0xff)) else {
            if data.len() < MAX_ID3V2_GAP {
                return Err(Error::truncated("audio frame after id3v2"));
            }
            return Err(Error::bad("audio frame not found after id3v2"));
        };
        let start = at + pos;
        match parse_track(&data[start..]) {
            Ok(track) => break track,
            Err(Error::Truncated(_)) => return Err(Error::truncated("audio frame after id3v2")),
            _ => at = start + 1,
        }
        if at > MAX_ID3V2_GAP {
            return Err(Error::bad("audio frame not found after id3v2"));
        }
    };
    debug!(codec = %track.codec, offset = at, "first audio frame after id3v2");
    info.set_format(format_for(&track));
    info.add_track(track);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    #[test]
    fn test_mpeg_layers() {
        let track = parse_track(b"\xff\xfb\x90\xc4").unwrap();
        assert_eq!(track.codec, "mp3");
        assert_eq!(track.subformat.as_deref(), Some("mpeg-1"));
        assert_eq!((track.sample_rate, track.channel_count), (Some(44100), Some(1)));

        let track = parse_track(b"\xff\xfd\xb4\x00").unwrap();
        assert_eq!(track.codec, "mp2");
        assert_eq!((track.sample_rate, track.channel_count), (Some(48000), Some(2)));
    }

    #[test]
    fn test_mpeg2_and_25_rates() {
        // MPEG-2 layer III, rate index 1
        let track = parse_mpeg_header(b"\xff\xf3\x14\x00").unwrap();
        assert_eq!(track.subformat.as_deref(), Some("mpeg-2"));
        assert_eq!(track.sample_rate, Some(24000));
        // MPEG-2.5 layer III, rate index 2
        let track = parse_mpeg_header(b"\xff\xe3\x18\x00").unwrap();
        assert_eq!(track.subformat.as_deref(), Some("mpeg-2.5"));
        assert_eq!(track.sample_rate, Some(8000));
    }

    #[test]
    fn test_adts() {
        let track = parse_track(b"\xff\xf9\x2c\x40").unwrap();
        assert_eq!(track.codec, "aac");
        assert_eq!(track.subformat.as_deref(), Some("mpeg-4"));
        assert_eq!((track.sample_rate, track.channel_count), (Some(8000), Some(1)));

        let track = parse_track(b"\xff\xf1\x50\x80").unwrap();
        assert_eq!((track.sample_rate, track.channel_count), (Some(44100), Some(2)));
    }

    #[test]
    fn test_ac3() {
        // fscod 0, bsid 6, acmod 7 (3/2)
        let track = parse_track(b"\x0b\x77\x39\x18\x1c\x30\xe1").unwrap();
        assert_eq!(track.codec, "ac3");
        assert_eq!(track.sample_rate, Some(48000));
        assert_eq!(track.channel_count, Some(5));
        assert_eq!(track.sample_size, Some(16));
        // E-AC-3 bsid 16
        assert!(parse_ac3_header(b"\x0b\x77\x39\x18\x1c\x80\xe1").is_err());
    }

    #[test]
    fn test_bad_headers() {
        assert!(parse_mpeg_header(b"\xff\xfb\xf0\xc4").is_err()); // bitrate 15
        assert!(parse_mpeg_header(b"\xff\xfb\x9c\xc4").is_err()); // rate 3
        assert!(parse_mpeg_header(b"\xff\xf9\x90\xc4").is_err()); // layer 0
        assert!(matches!(parse_track(b"\xff"), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_analyze_adts_sets_mp3() {
        let mut info = Info::new();
        analyze_adts(&mut SliceSource::new(b"\xff\xfb\x90\xc4"), &mut info).unwrap();
        assert_eq!(info.format(), Some("mp3"));

        let mut info = Info::new();
        analyze_adts(&mut SliceSource::new(b"\xff\xf1\x50\x80"), &mut info).unwrap();
        assert_eq!(info.format(), Some("mpeg-adts"));
    }

    fn id3_tag() -> Vec<u8> {
        // ID3v2.3.0, no flags, 20-byte tag body
        let mut data = b"ID3\x03\x00\x00\x00\x00\x00\x14".to_vec();
        data.extend_from_slice(b"TIT2\x00\x00\x00\x01\x00\x00\x00");
        data.extend_from_slice(&[0; 9]);
        data
    }

    #[test]
    fn test_id3v2_then_mp3() {
        for gap in [&b""[..], b"\xff\x00\x00\x00", b"\x00\x00\x00\x00\x00"] {
            let mut data = id3_tag();
            data.extend_from_slice(gap);
            data.extend_from_slice(b"\xff\xfb\x30\x4c");
            let mut info = Info::new();
            analyze_id3v2(&mut SliceSource::new(&data), &mut info).unwrap();
            assert_eq!(info.format(), Some("mp3"));
            assert_eq!(info.get_str(&Field::from_name("id3_version")), Some("2.3.0"));
            assert_eq!(info.tracks[0].channel_count, Some(2));
            assert_eq!(info.tracks[0].sample_rate, Some(44100));
        }
    }

    #[test]
    fn test_id3v2_without_audio() {
        let mut info = Info::new();
        let err = analyze_id3v2(&mut SliceSource::new(&id3_tag()), &mut info).unwrap_err();
        assert!(matches!(err, Error::Truncated(_)));
    }
}
