//! Container walkers
//!
//! Each walker reads only as far as needed to find its track headers, then
//! stops, so large payloads (`mdat`, `movi`, clusters) are never read. The
//! Windows codec tables shared by the RIFF and ASF walkers live here.

pub mod aiff;
pub mod asf;
pub mod flv;
pub mod isobmff;
pub mod ivf;
pub mod matroska;
pub mod mpegps;
pub mod mpegts;
pub mod ogg;
mod pes;
pub mod realmedia;
pub mod riff;

use crate::error::{Error, Result};

/// Four-character code as text, with trailing spaces and NULs trimmed and
/// letters lowercased
pub fn fourcc_lower(code: &[u8]) -> String {
    String::from_utf8_lossy(code)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_ascii_lowercase()
}

/// Encodes a textual GUID in its on-disk (mixed-endian) byte order
pub(crate) const fn guid(s: &str) -> [u8; 16] {
    const fn nibble(c: u8) -> u8 {
        match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'f' => c - b'a' + 10,
            b'A'..=b'F' => c - b'A' + 10,
            _ => panic!("bad hex digit in guid"),
        }
    }
    let s = s.as_bytes();
    let mut text = [0u8; 16];
    let (mut i, mut n) = (0, 0);
    while i < s.len() {
        if s[i] != b'-' {
            text[n / 2] |= nibble(s[i]) << if n % 2 == 0 { 4 } else { 0 };
            n += 1;
        }
        i += 1;
    }
    assert!(n == 32, "guid must have 32 hex digits");
    // Data1, Data2 and Data3 are little-endian on disk.
    let mut out = text;
    let order = [3, 2, 1, 0, 5, 4, 7, 6];
    let mut j = 0;
    while j < order.len() {
        out[j] = text[order[j]];
        j += 1;
    }
    out
}

// Keys are lowercased with spaces trimmed.
const WINDOWS_VIDEO_CODECS: &[(&str, &str)] = &[
    ("avc1", "h264"),
    ("dx50", "divx5"),
    ("fmp4", "divx5"),
    ("mpg4", "divx5"),
    ("mp42", "divx5"),
    ("divx", "divx"),
    ("div3", "divx"),
    ("div4", "divx"),
    ("dvx4", "divx"),
    ("3iv2", "divx"),
    ("h264", "h264"),
    ("xvid", "divx"),
    ("mjpg", "mjpeg"),
    ("msvc", "msvc"),
    ("cram", "msvc"),
    ("x265", "h264"),
    ("iv50", "indeo5"),
    ("iv41", "indeo4"),
    ("dvsd", "dv"),
    ("dvsl", "dv"),
    ("dvhd", "dv"),
    ("mpeg", "mpeg"),
    ("wmv3", "wmv3"),
    ("vp30", "vp3"),
    ("vp40", "vp4"),
    ("vp50", "vp5"),
    ("vp60", "vp6"),
    ("vp6f", "vp6"),
    ("vp70", "vp7"),
    ("vp80", "vp8"),
    ("vp90", "vp9"),
    ("iv31", "indeo3"),
    ("iv32", "indeo3"),
    ("vcr2", "vcr2"),
];

/// Maps a BITMAPINFOHEADER compression or AVI handler fourcc to a codec
pub fn windows_video_codec(code: &[u8; 4]) -> Result<String> {
    match code {
        b"\0\0\0\0" => return Ok("raw".into()),
        b"\x01\0\0\x10" | b"\x02\0\0\x10" => return Ok("mpeg".into()),
        b"\x01\0\0\0" | b"\x02\0\0\0" => return Ok("rle".into()),
        _ => {}
    }
    let name = fourcc_lower(code);
    if name.contains('\0') {
        return Err(Error::bad(format!("NUL in windows video codec {code:?}")));
    }
    Ok(WINDOWS_VIDEO_CODECS
        .iter()
        .find(|(k, _)| *k == name)
        .map_or(name, |(_, v)| v.to_string()))
}

const WINDOWS_AUDIO_FORMATS: &[(u16, &str)] = &[
    (0x0001, "pcm"),
    (0x0002, "adpcm"),
    (0x0003, "pcm"),
    (0x0006, "alaw"),
    (0x0007, "mulaw"),
    (0x0009, "drm"),
    (0x000a, "wma"),
    (0x0010, "adpcm"),
    (0x0011, "adpcm"),
    (0x0012, "adpcm"),
    (0x0013, "adpcm"),
    (0x0017, "adpcm"),
    (0x0018, "adpcm"),
    (0x0020, "adpcm"),
    (0x0028, "lrc"),
    (0x0030, "ac2"),
    (0x0036, "adpcm"),
    (0x003b, "adpcm"),
    (0x0050, "mp2"),
    (0x0055, "mp3"),
    (0x0064, "adpcm"),
    (0x0065, "adpcm"),
    (0x0075, "rt29"),
    (0x0092, "ac3"),
    (0x00ff, "aac"),
    (0x0160, "wmav1"),
    (0x0161, "wmav2"),
    (0x0162, "wma-pro"),
    (0x0163, "wma-lossless"),
    (0x0164, "wma-spdif"),
    (0x0200, "adpcm"),
    (0x0240, "raw_sport"),
    (0x0241, "esst_ac3"),
    (0x1600, "aac"),
    (0x1602, "mpeg_loas"),
    (0x1610, "mpeg_heaac"),
    (0x2000, "dvm"),
    (0x2001, "dts2"),
    (0xfffe, "extensible-?"),
];

/// `wFormatTag` of WAVEFORMATEXTENSIBLE
pub const WAVE_FORMAT_EXTENSIBLE: u16 = 0xfffe;

/// Maps a WAVEFORMATEX `wFormatTag` to a codec, `0x..` if unknown
pub fn windows_audio_codec(format_tag: u16) -> String {
    WINDOWS_AUDIO_FORMATS
        .iter()
        .find(|(k, _)| *k == format_tag)
        .map_or_else(|| format!("0x{format_tag:x}"), |(_, v)| v.to_string())
}

/// Tail shared by every `KSDATAFORMAT_SUBTYPE_*` GUID derived from a format tag
const WAVE_FORMAT_GUID_TAIL: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xaa, 0x00, 0x38, 0x9b, 0x71,
];

const WINDOWS_GUID_AUDIO_FORMATS: &[([u8; 16], &str)] = &[
    (guid("00000003-0cea-0010-8000-00aa00389b71"), "mp1"),
    (guid("00000004-0cea-0010-8000-00aa00389b71"), "mp2"),
    (guid("00000005-0cea-0010-8000-00aa00389b71"), "mp3"),
    (guid("00000006-0cea-0010-8000-00aa00389b71"), "aac"),
    (guid("00000008-0cea-0010-8000-00aa00389b71"), "atrac"),
    (guid("00000009-0cea-0010-8000-00aa00389b71"), "1bit"),
    (guid("0000000a-0cea-0010-8000-00aa00389b71"), "dolby-digitalplus"),
    (guid("0000000b-0cea-0010-8000-00aa00389b71"), "dts-hd"),
    (guid("0000000c-0cea-0010-8000-00aa00389b71"), "dolby-mlp"),
    (guid("0000000d-0cea-0010-8000-00aa00389b71"), "dst"),
    (guid("36523b22-8ee5-11d1-8ca3-0060b057664a"), "mp1"),
    (guid("36523b24-8ee5-11d1-8ca3-0060b057664a"), "mp2"),
    (guid("36523b25-8ee5-11d1-8ca3-0060b057664a"), "ac3"),
    (guid("518590a2-a184-11d0-8522-00c04fd9baf3"), "dsound"),
    (guid("58cb7144-23e9-bfaa-a119-fffa01e4ce62"), "atrac3"),
    (guid("6dba3190-67bd-11cf-a0f7-0020afd156e4"), "analog"),
    (guid("ad98d184-aac3-11d0-a41c-00a0c9223196"), "vc"),
    (guid("a0af4f82-e163-11d0-bad9-00609744111a"), "dss"),
    (guid("e06d802b-db46-11cf-b4d1-00805f6cbbea"), "mp2"),
    (guid("e06d802c-db46-11cf-b4d1-00805f6cbbea"), "ac3"),
    (guid("e06d8032-db46-11cf-b4d1-00805f6cbbea"), "pcm"),
    (guid("e06d8033-db46-11cf-b4d1-00805f6cbbea"), "dts"),
    (guid("e06d8034-db46-11cf-b4d1-00805f6cbbea"), "sdds"),
];

/// Maps the SubFormat GUID of a WAVEFORMATEXTENSIBLE to a codec
pub fn windows_guid_audio_codec(sub_format: &[u8; 16]) -> String {
    if sub_format[2..] == WAVE_FORMAT_GUID_TAIL {
        return windows_audio_codec(u16::from_le_bytes([sub_format[0], sub_format[1]]));
    }
    WINDOWS_GUID_AUDIO_FORMATS
        .iter()
        .find(|(g, _)| g == sub_format)
        .map_or_else(
            || {
                let hex: String = sub_format.iter().map(|b| format!("{b:02x}")).collect();
                format!("guid-?-{hex}")
            },
            |(_, v)| v.to_string(),
        )
}
