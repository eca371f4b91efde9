//! Matroska and WebM (EBML) walker
//!
//! Reads the EBML header for the DocType, then walks `Segment` until the
//! `Tracks` element has been parsed. Clusters are never reached in files
//! that store `Tracks` first, which is what every muxer does.
//!
//! Reference: <https://www.matroska.org/technical/elements.html>

use crate::{
    bits::{read_ebml_id, read_ebml_size, EBML_UNKNOWN_SIZE},
    error::{Error, Result},
    info::{Field, Info, Track, TrackKind},
    source::{ByteSource, ByteSourceExt, PrereadSource},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

/// Element IDs, marker bits kept
mod id {
    pub const EBML: u32 = 0x1a45_dfa3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const VOID: u32 = 0xec;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const SEEK_HEAD: u32 = 0x114d_9b74;
    pub const INFO: u32 = 0x1549_a966;
    pub const TRACKS: u32 = 0x1654_ae6b;
    pub const TRACK_ENTRY: u32 = 0xae;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_NAME: u32 = 0x25_8688;
    pub const VIDEO: u32 = 0xe0;
    pub const PIXEL_WIDTH: u32 = 0xb0;
    pub const PIXEL_HEIGHT: u32 = 0xba;
    pub const AUDIO: u32 = 0xe1;
    pub const SAMPLING_FREQUENCY: u32 = 0xb5;
    pub const CHANNELS: u32 = 0x9f;
    pub const BIT_DEPTH: u32 = 0x6264;
}

/// Largest EBML header accepted
pub const MAX_EBML_HEADER_SIZE: u64 = 256;

/// Largest leaf element read into memory inside `Tracks`
const MAX_LEAF_SIZE: u64 = 1 << 20;

const CODEC_IDS: &[(&str, &str)] = &[
    ("V_UNCOMPRESSED", "raw"),
    ("V_MPEG4/ISO/SP", "divx4"),
    ("V_MPEG4/ISO/ASP", "divx5"),
    ("V_MPEG4/ISO/AVC", "h264"),
    ("V_MPEG4/ISO/HEVC", "h265"),
    ("V_MPEG4/MS/V3", "divx3"),
    ("V_MPEGH/ISO/HEVC", "h265"),
    ("V_MPEG1", "mpeg1"),
    ("V_MPEG2", "mpeg2"),
    ("V_REAL/RV10", "rv5"),
    ("V_REAL/RV20", "rvg2"),
    ("V_REAL/RV30", "rv8"),
    ("V_REAL/RV40", "rv9"),
    ("V_QUICKTIME", "qt"),
    ("V_THEORA", "theora"),
    ("V_PRORES", "prores"),
    ("V_AV1", "av1"),
    ("V_VP3", "vp3"),
    ("V_VP4", "vp4"),
    ("V_VP5", "vp5"),
    ("V_VP6", "vp6"),
    ("V_VP7", "vp7"),
    ("V_VP8", "vp8"),
    ("V_VP9", "vp9"),
    ("V_VP10", "vp10"),
    ("V_VP11", "vp11"),
    ("A_MPEG/L3", "mp3"),
    ("A_MPEG/L2", "mp2"),
    ("A_MPEG/L1", "mp1"),
    ("A_PCM/INT/BIG", "pcm"),
    ("A_PCM/INT/LIT", "pcm"),
    ("A_PCM/FLOAT/IEEE", "pcm"),
    ("A_MPC", "mpc"),
    ("A_AC3", "ac3"),
    ("A_EAC3", "eac3"),
    ("A_ALAC", "alac"),
    ("A_DTS", "dts"),
    ("A_DTS/EXPRESS", "dts-express"),
    ("A_DTS/LOSSLESS", "dts-lossless"),
    ("A_VORBIS", "vorbis"),
    ("A_OPUS", "opus"),
    ("A_FLAC", "flac"),
    ("A_REAL/14_4", "ra1"),
    ("A_REAL/28_8", "ra2"),
    ("A_REAL/COOK", "cook"),
    ("A_REAL/SIPR", "sipro"),
    ("A_REAL/RALF", "ra-lossless"),
    ("A_REAL/ATRC", "altrac3"),
    ("A_MS/ACM", "acm"),
    ("A_QUICKTIME", "qt"),
    ("A_QUICKTIME/QDMC", "qdmc"),
    ("A_QUICKTIME/QDM2", "qdmc2"),
    ("A_TTA1", "tta1"),
    ("A_WAVPACK4", "wavpack4"),
];

/// Maps a Matroska CodecID to a codec name; unknown IDs pass through
pub fn codec_name(codec_id: &str) -> String {
    if codec_id == "A_AAC" || codec_id.starts_with("A_AAC/") {
        return "aac".into();
    }
    CODEC_IDS
        .iter()
        .find(|(k, _)| *k == codec_id)
        .map_or_else(|| codec_id.to_string(), |(_, v)| v.to_string())
}

fn read_uint(data: &[u8], what: &str) -> Result<u64> {
    if data.len() > 8 {
        return Err(Error::bad(format!("mkv {what} integer too long: {}", data.len())));
    }
    Ok(data.iter().fold(0u64, |acc, &b| acc << 8 | b as u64))
}

fn read_float(data: &[u8]) -> Result<f64> {
    match data.len() {
        8 => Ok(BigEndian::read_f64(data)),
        4 => Ok(BigEndian::read_f32(data) as f64),
        n => Err(Error::bad(format!("expected mkv float, got size {n}"))),
    }
}

/// Element reader that keeps track of its parent's end offset
struct Reader<'a> {
    src: &'a mut dyn ByteSource,
}

impl Reader<'_> {
    /// Reads the next element header, skipping Void elements
    fn header(&mut self, end: u64, parent: &str) -> Result<(u32, u64)> {
        loop {
            let offset = self.src.position();
            let id = read_ebml_id(self.src)?;
            let size = read_ebml_size(self.src)?;
            if size == EBML_UNKNOWN_SIZE {
                return Err(Error::bad(format!("mkv element with unknown size in {parent}")));
            }
            if self.src.position().saturating_add(size) > end {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: format!("mkv element 0x{id:x} larger than its {parent} parent"),
                });
            }
            trace!(id = format_args!("0x{id:x}"), size, offset, parent, "mkv element");
            if id != id::VOID {
                return Ok((id, size));
            }
            self.src.skip_exact(size, "mkv Void element")?;
        }
    }

    fn data(&mut self, size: u64, what: &str) -> Result<Vec<u8>> {
        if size > MAX_LEAF_SIZE {
            return Err(Error::DataTooLarge {
                size,
                max: MAX_LEAF_SIZE,
            });
        }
        self.src.read_exact_vec(size as usize, what)
    }
}

fn parse_video(r: &mut Reader<'_>, end: u64, track: &mut Track) -> Result<()> {
    let (mut width, mut height) = (None, None);
    while r.src.position() < end {
        let (id, size) = r.header(end, "Video")?;
        let data = r.data(size, "mkv Video element")?;
        match id {
            id::PIXEL_WIDTH => width = Some(read_uint(&data, "PixelWidth")?),
            id::PIXEL_HEIGHT => height = Some(read_uint(&data, "PixelHeight")?),
            _ => {}
        }
    }
    if let (Some(width), Some(height)) = (width, height) {
        let clamp = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
        track.set_dimensions(clamp(width), clamp(height))?;
    }
    Ok(())
}

fn parse_audio(r: &mut Reader<'_>, end: u64, track: &mut Track) -> Result<()> {
    while r.src.position() < end {
        let (id, size) = r.header(end, "Audio")?;
        let data = r.data(size, "mkv Audio element")?;
        match id {
            id::SAMPLING_FREQUENCY => {
                let rate = read_float(&data)?;
                if !(rate.is_finite() && rate > 0.0 && rate < u32::MAX as f64) {
                    return Err(Error::bad(format!("bad mkv sampling frequency: {rate}")));
                }
                track.sample_rate = Some(rate.round() as u32);
            }
            id::CHANNELS => track.channel_count = Some(read_uint(&data, "Channels")? as u32),
            id::BIT_DEPTH => track.sample_size = Some(read_uint(&data, "BitDepth")? as u32),
            _ => {}
        }
    }
    Ok(())
}

fn parse_track_entry(r: &mut Reader<'_>, end: u64) -> Result<Option<Track>> {
    // The kind is only known once Video or Audio is seen.
    let mut track = Track::video("?");
    let mut kind = None;
    while r.src.position() < end {
        let (id, size) = r.header(end, "TrackEntry")?;
        let child_end = r.src.position() + size;
        match id {
            id::VIDEO => {
                kind = Some(TrackKind::Video);
                parse_video(r, child_end, &mut track)?;
            }
            id::AUDIO => {
                kind = Some(TrackKind::Audio);
                parse_audio(r, child_end, &mut track)?;
            }
            id::CODEC_ID => {
                let data = r.data(size, "mkv CodecID")?;
                let codec_id = String::from_utf8_lossy(&data);
                track.codec = codec_name(codec_id.trim_end_matches('\0'));
            }
            id::CODEC_NAME => {
                let data = r.data(size, "mkv CodecName")?;
                track.set_extra("codec_name", String::from_utf8_lossy(&data).into_owned());
            }
            _ => {
                r.src.skip_exact(size, "mkv TrackEntry element")?;
            }
        }
    }
    Ok(kind.map(|kind| {
        track.kind = kind;
        track
    }))
}

fn parse_ebml_header(r: &mut Reader<'_>, size: u64, info: &mut Info) -> Result<()> {
    if size >= MAX_EBML_HEADER_SIZE {
        return Err(Error::DataTooLarge {
            size,
            max: MAX_EBML_HEADER_SIZE,
        });
    }
    let end = r.src.position() + size;
    let mut doc_type = None;
    while r.src.position() < end {
        let (id, size) = r.header(end, "EBML")?;
        let data = r.data(size, "mkv header element")?;
        if id == id::DOC_TYPE {
            doc_type = Some(data);
        }
    }
    match doc_type.as_deref() {
        Some(b"matroska") => {
            info.set(Field::Subformat, "mkv");
            info.set(Field::Brands, vec!["mkv".to_string()]);
        }
        Some(b"webm") => {
            info.set_format("webm");
            info.set(Field::Subformat, "webm");
            info.set(Field::Brands, vec!["mkv".to_string(), "webm".to_string()]);
        }
        Some(other) => {
            return Err(Error::bad(format!(
                "unknown mkv DocType: {}",
                String::from_utf8_lossy(other)
            )))
        }
        None => return Err(Error::bad("mkv DocType not found")),
    }
    Ok(())
}

/// Reads one byte, or `None` at end of file
fn read_first_byte(src: &mut dyn ByteSource) -> Result<Option<u8>> {
    let mut buf = [0u8; 1];
    Ok((src.read_into(&mut buf)? == 1).then_some(buf[0]))
}

/// Analyzes a Matroska or WebM file
///
/// A file that ends right after the signature or right after the EBML
/// header is accepted with no tracks.
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let signature = src.read_exact_vec(4, "mkv signature")?;
    if BigEndian::read_u32(&signature) != id::EBML {
        return Err(Error::bad("mkv signature not found"));
    }
    info.set_format("mkv");
    let Some(first) = read_first_byte(src)? else {
        return Ok(());
    };
    let size = read_ebml_size(&mut PrereadSource::new(vec![first], &mut *src))?;
    let mut r = Reader { src };
    parse_ebml_header(&mut r, size, info)?;

    let header_end = r.src.position();
    let Some(first) = read_first_byte(r.src)? else {
        return Ok(());
    };
    let segment_id = read_ebml_id(&mut PrereadSource::new(vec![first], &mut *r.src))?;
    if segment_id != id::SEGMENT {
        return Err(Error::InvalidSegment {
            offset: header_end,
            reason: format!("expected mkv Segment element, got 0x{segment_id:x}"),
        });
    }
    let size = read_ebml_size(r.src)?;
    let segment_end = if size == EBML_UNKNOWN_SIZE {
        u64::MAX
    } else {
        r.src.position().saturating_add(size)
    };
    while r.src.position() < segment_end {
        let (id, size) = r.header(segment_end, "Segment")?;
        match id {
            id::SEEK_HEAD | id::INFO => r.src.skip_exact(size, "mkv SeekHead or Info element")?,
            id::TRACKS => {
                let tracks_end = r.src.position() + size;
                while r.src.position() < tracks_end {
                    let (id, size) = r.header(tracks_end, "Tracks")?;
                    if id != id::TRACK_ENTRY {
                        return Err(Error::bad(format!("expected mkv TrackEntry, got 0x{id:x}")));
                    }
                    let entry_end = r.src.position() + size;
                    if let Some(track) = parse_track_entry(&mut r, entry_end)? {
                        info.add_track(track);
                    }
                }
                // Everything after Tracks is bulky.
                return Ok(());
            }
            other => {
                return Err(Error::bad(format!("unexpected mkv element in Segment: 0x{other:x}")))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;
    use crate::test_utils::ebml_element;

    fn header(doc_type: &str) -> Vec<u8> {
        let mut body = ebml_element(0x4286, &[1]); // EBMLVersion
        body.extend(ebml_element(0x42f7, &[1])); // EBMLReadVersion
        body.extend(ebml_element(0x4282, doc_type.as_bytes()));
        body.extend(ebml_element(0x4287, &[2])); // DocTypeVersion
        ebml_element(id::EBML, &body)
    }

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_signature_only() {
        let (result, info) = run(b"\x1a\x45\xdf\xa3");
        result.unwrap();
        assert_eq!(info.format(), Some("mkv"));
        assert!(info.tracks.is_empty());
    }

    #[test]
    fn test_webm_header_only() {
        // 8-byte size encoding of the EBML header, as written by some muxers
        let mut data = b"\x1aE\xdf\xa3\x01\0\0\0\0\0\0\x1f".to_vec();
        data.extend_from_slice(b"B\x86\x81\x01B\xf7\x81\x01B\xf2\x81\x04B\xf3\x81\x08");
        data.extend_from_slice(b"B\x82\x84webmB\x87\x81\x02B\x85\x81\x02");
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.format(), Some("webm"));
        assert_eq!(info.subformat(), Some("webm"));
        assert_eq!(
            info.get(&Field::Brands).and_then(|v| v.as_list()).unwrap(),
            ["mkv", "webm"]
        );
    }

    #[test]
    fn test_tracks() {
        let mut video = ebml_element(id::PIXEL_WIDTH, &[0x07, 0x80]);
        video.extend(ebml_element(id::PIXEL_HEIGHT, &[0x04, 0x38]));
        let mut entry1 = ebml_element(0xd7, &[1]); // TrackNumber
        entry1.extend(ebml_element(id::CODEC_ID, b"V_MPEG4/ISO/AVC"));
        entry1.extend(ebml_element(id::VOID, &[0; 3]));
        entry1.extend(ebml_element(id::VIDEO, &video));
        let mut audio = ebml_element(id::SAMPLING_FREQUENCY, &48000f32.to_be_bytes());
        audio.extend(ebml_element(id::CHANNELS, &[6]));
        let mut entry2 = ebml_element(id::CODEC_ID, b"A_AAC/MPEG4/LC");
        entry2.extend(ebml_element(id::AUDIO, &audio));
        let mut tracks = ebml_element(id::TRACK_ENTRY, &entry1);
        tracks.extend(ebml_element(id::TRACK_ENTRY, &entry2));
        let mut segment = ebml_element(id::INFO, &ebml_element(0x2ad7b1, &[0x0f, 0x42, 0x40]));
        segment.extend(ebml_element(id::TRACKS, &tracks));
        // Cluster after Tracks is never read.
        segment.extend_from_slice(b"\x1f\x43\xb6\x75\x01\xff");

        let mut data = header("matroska");
        data.extend(ebml_element(id::SEGMENT, &segment));
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.format(), Some("mkv"));
        assert_eq!(info.subformat(), Some("mkv"));
        assert_eq!(info.tracks.len(), 2);
        assert_eq!(info.tracks[0].codec, "h264");
        assert_eq!((info.tracks[0].width, info.tracks[0].height), (Some(1920), Some(1080)));
        assert_eq!(info.tracks[1].kind, TrackKind::Audio);
        assert_eq!(info.tracks[1].codec, "aac");
        assert_eq!(info.tracks[1].sample_rate, Some(48000));
        assert_eq!(info.tracks[1].channel_count, Some(6));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(run(&header("mkv3d")).0, Err(Error::InvalidFormat(_))));

        let mut data = b"\x1a\x45\xdf\xa3\x41\x00".to_vec();
        data.extend(vec![0; 256]);
        assert!(matches!(run(&data).0, Err(Error::DataTooLarge { .. })));

        // Child claims more bytes than the Segment holds
        let mut data = header("webm");
        data.extend(ebml_element(id::SEGMENT, b"\x16\x54\xae\x6b\x88\xae\x80"));
        assert!(matches!(run(&data).0, Err(Error::InvalidSegment { .. })));
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(codec_name("A_AAC/MPEG2/LC/SBR"), "aac");
        assert_eq!(codec_name("V_VP9"), "vp9");
        assert_eq!(codec_name("S_TEXT/UTF8"), "S_TEXT/UTF8");
    }
}
