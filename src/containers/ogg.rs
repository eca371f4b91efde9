//! Ogg page walker
//!
//! Every logical stream starts with a beginning-of-stream page whose first
//! packet is the codec identification header, and all of these pages come
//! before any other page. The walk reads the BOS pages and stops at the
//! first page that is not one.
//!
//! Reference: RFC 3533, <https://xiph.org/ogg/doc/framing.html>

use crate::{
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::{trace, warn};

const PAGE_HEADER_SIZE: usize = 27;
const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const FLAG_BOS: u8 = 0x02;

/// Logical streams looked at before giving up on the rest
pub const MAX_OGG_STREAMS: usize = 64;

/// Builds a track from the identification packet of a logical stream
///
/// Unknown codecs give `None`.
pub fn parse_id_packet(packet: &[u8]) -> Result<Option<Track>> {
    let too_short = |what: &str| Error::truncated(format!("ogg {what} header"));
    let track = if let Some(rest) = packet.strip_prefix(b"\x01vorbis") {
        // version, channels, rate
        if rest.len() < 9 {
            return Err(too_short("vorbis"));
        }
        let mut track = Track::audio("vorbis");
        track.channel_count = Some(rest[4] as u32);
        track.sample_rate = Some(LittleEndian::read_u32(&rest[5..9]));
        track.sample_size = Some(16);
        track
    } else if let Some(rest) = packet.strip_prefix(b"OpusHead") {
        // version, channels, pre-skip, input rate
        if rest.len() < 8 {
            return Err(too_short("opus"));
        }
        let mut track = Track::audio("opus");
        track.channel_count = Some(rest[1] as u32);
        track.sample_rate = Some(LittleEndian::read_u32(&rest[4..8]));
        track.sample_size = Some(16);
        track
    } else if let Some(rest) = packet.strip_prefix(b"\x80theora") {
        // version, frame size in macroblocks, picture size
        if rest.len() < 13 {
            return Err(too_short("theora"));
        }
        let mut track = Track::video("theora");
        track.set_dimensions(
            BigEndian::read_u24(&rest[7..10]),
            BigEndian::read_u24(&rest[10..13]),
        )?;
        track
    } else if packet.starts_with(b"Speex   ") {
        if packet.len() < 52 {
            return Err(too_short("speex"));
        }
        let mut track = Track::audio("speex");
        track.sample_rate = Some(LittleEndian::read_u32(&packet[36..40]));
        track.channel_count = Some(LittleEndian::read_u32(&packet[48..52]));
        track.sample_size = Some(16);
        track
    } else {
        trace!(head = ?&packet[..packet.len().min(8)], "unknown ogg stream");
        return Ok(None);
    };
    Ok(Some(track))
}

/// Analyzes an Ogg file from the beginning-of-stream pages
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set_format("ogg");
    for _ in 0..MAX_OGG_STREAMS {
        let offset = src.position();
        let header = src.read_vec(PAGE_HEADER_SIZE)?;
        if header.is_empty() {
            return Ok(());
        }
        if header.len() < PAGE_HEADER_SIZE {
            return Err(Error::truncated("ogg page header"));
        }
        if &header[0..4] != CAPTURE_PATTERN {
            return Err(Error::InvalidSegment {
                offset,
                reason: "ogg capture pattern not found".into(),
            });
        }
        if header[4] != 0 {
            return Err(Error::bad(format!("unknown ogg version: {}", header[4])));
        }
        if header[5] & FLAG_BOS == 0 {
            return Ok(());
        }
        let lacing = src.read_exact_vec(header[26] as usize, "ogg segment table")?;
        let page_size: u64 = lacing.iter().map(|&n| n as u64).sum();
        // The first packet ends at the first segment shorter than 255.
        let first_packet = lacing
            .iter()
            .position(|&n| n < 255)
            .map_or(page_size, |i| lacing[..=i].iter().map(|&n| n as u64).sum());
        trace!(offset, page_size, serial = LittleEndian::read_u32(&header[14..18]), "ogg bos page");
        let packet = src.read_exact_vec(first_packet as usize, "ogg identification packet")?;
        if let Some(track) = parse_id_packet(&packet)? {
            info.add_track(track);
        }
        src.skip_exact(page_size - first_packet, "ogg page")?;
    }
    warn!(max = MAX_OGG_STREAMS, "too many ogg logical streams");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{info::TrackKind, source::SliceSource};

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_unknown_stream() {
        let (result, info) = run(b"OggS\0\x02????????SSSS\0\0\0\0CCCC\x01\x01?");
        result.unwrap();
        assert_eq!(info.format(), Some("ogg"));
        assert!(info.tracks.is_empty());
    }

    #[test]
    fn test_theora_and_vorbis() {
        let data = hex(concat!(
            "4f67675300020000000000000000f6c8465100000000eb0c16bd012a807468656f72610302000014000f",
            "0001400000f000000000001e000000010000000000000100000065004f676753000200000000000000002c",
            "36d36d00000000dbc8fb60011e01766f72626973000000000122560000fffffffff0550000ffffffffaa01"
        ));
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.tracks.len(), 2);
        let video = &info.tracks[0];
        assert_eq!(video.codec, "theora");
        assert_eq!((video.width, video.height), (Some(320), Some(240)));
        let audio = &info.tracks[1];
        assert_eq!(audio.kind, TrackKind::Audio);
        assert_eq!(audio.codec, "vorbis");
        assert_eq!(audio.sample_rate, Some(22050));
        assert_eq!(audio.channel_count, Some(1));
        assert_eq!(audio.sample_size, Some(16));
    }

    #[test]
    fn test_walk_stops_after_bos_pages() {
        let data = hex(concat!(
            "4f6767530002000000000000000063bb451200000000f480dc43011e01766f72626973000000000144ac",
            "0000000000008038010000000000b8014f6767530000000000000000000063bb45120100000087abaad2",
            "02030461626364656667"
        ));
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.tracks.len(), 1);
        assert_eq!(info.tracks[0].sample_rate, Some(44100));
    }

    #[test]
    fn test_id_packets() {
        let opus = parse_id_packet(b"OpusHead\x01\x02d\x01D\xac\0\0").unwrap().unwrap();
        assert_eq!(opus.codec, "opus");
        assert_eq!(opus.channel_count, Some(2));
        assert_eq!(opus.sample_rate, Some(44100));

        let mut speex = b"Speex   1.0.4".to_vec();
        speex.resize(28, 0);
        speex.extend_from_slice(b"\x01\0\0\0\x50\0\0\0\x80\xbb\0\0\x02\0\0\0\x04\0\0\0\x01\0\0\0");
        let speex = parse_id_packet(&speex).unwrap().unwrap();
        assert_eq!(speex.codec, "speex");
        assert_eq!(speex.sample_rate, Some(48000));
        assert_eq!(speex.channel_count, Some(1));

        assert!(matches!(parse_id_packet(b"\x01vorbis\0\0"), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_truncated_and_corrupt_pages() {
        let (result, info) = run(b"OggS\0\x02????????SSSS\0\0\0\0CCCC\x01\x1e\x01vorbis");
        assert!(matches!(result, Err(Error::Truncated(_))));
        assert_eq!(info.format(), Some("ogg"));

        let mut data = b"OggS\0\x02????????SSSS\0\0\0\0CCCC\x01\x01?".to_vec();
        data.extend_from_slice(b"OggX");
        data.resize(data.len() + 23, 0);
        assert!(matches!(run(&data).0, Err(Error::InvalidSegment { offset: 29, .. })));
    }
}
