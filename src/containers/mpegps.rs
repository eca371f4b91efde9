//! MPEG program stream walker (VOB, MPG)
//!
//! Walks pack headers, system headers and PES packets. Video, MPEG audio
//! and the AC-3, DTS and LPCM substreams of private stream 1 are handed to
//! their parsers; tracks are reported in the order they complete. The walk
//! ends once a video and an audio track are known.

use super::pes::{parse_pes_header, EsKind, EsStream, Parsed};
use crate::{
    error::{Error, Result},
    info::{Field, Info, TrackKind},
    source::{ByteSource, ByteSourceExt},
};
use tracing::{trace, warn};

/// Packets read before giving up on a missing video or audio track
pub const MAX_PS_PACKETS: usize = 4096;

const PACK_HEADER: u8 = 0xba;
const SYSTEM_HEADER: u8 = 0xbb;
const END_CODE: u8 = 0xb9;
const PRIVATE_STREAM_1: u8 = 0xbd;
const PRIVATE_STREAM_2: u8 = 0xbf;

/// Private stream 1 substream header: id, frame count, first access unit
const SUBSTREAM_HEADER_SIZE: usize = 4;

/// Identifies an elementary stream: the PES stream id, or the substream id
/// for private stream 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKey {
    Pes(u8),
    Private(u8),
}

/// Picks the stream and the payload offset of a PES packet
fn classify(stream_id: u8, payload: &[u8]) -> Option<(StreamKey, EsKind, usize)> {
    match stream_id {
        0xe0..=0xef => Some((StreamKey::Pes(stream_id), EsKind::MpegVideo, 0)),
        0xc0..=0xdf => Some((StreamKey::Pes(stream_id), EsKind::MpegAudio, 0)),
        PRIVATE_STREAM_1 => {
            let sub = *payload.first()?;
            let kind = match sub {
                0x80..=0x87 => EsKind::Ac3,
                0x88..=0x8f => EsKind::Fixed(TrackKind::Audio, "dts"),
                0xa0..=0xa7 => EsKind::Lpcm,
                // subpictures and unknown substreams
                _ => return None,
            };
            Some((StreamKey::Private(sub), kind, SUBSTREAM_HEADER_SIZE))
        }
        _ => None,
    }
}

struct Stream {
    key: StreamKey,
    es: EsStream,
}

#[derive(Default)]
struct Walker {
    streams: Vec<Stream>,
    has_video: bool,
    has_audio: bool,
    subformat: Option<&'static str>,
    dvd: bool,
}

impl Walker {
    fn add_track(&mut self, info: &mut Info, parsed: Option<Parsed>) {
        if let Some(Parsed::Track(track)) = parsed {
            trace!(codec = %track.codec, "mpeg-ps track");
            match track.kind {
                TrackKind::Video => self.has_video = true,
                TrackKind::Audio => self.has_audio = true,
            }
            info.add_track(track);
        }
    }

    fn process_pes(&mut self, packet: &[u8], info: &mut Info) -> Result<()> {
        let header = parse_pes_header(packet, true)?;
        let payload = packet
            .get(header.header_len..)
            .ok_or_else(|| Error::truncated("mpeg-ps pes header"))?;
        if self.subformat.is_none() {
            self.subformat = Some(if packet[6] & 0xc0 == 0x80 { "mpeg-2" } else { "mpeg-1" });
        }
        let Some((key, kind, skip)) = classify(header.stream_id, payload) else {
            return Ok(());
        };
        let data = payload.get(skip..).unwrap_or_default();
        let index = match self.streams.iter().position(|s| s.key == key) {
            Some(i) => i,
            None => {
                self.streams.push(Stream {
                    key,
                    es: EsStream::new(kind),
                });
                self.streams.len() - 1
            }
        };
        let es = &mut self.streams[index].es;
        es.start_packet(None);
        let parsed = es.push(data)?;
        self.add_track(info, parsed);
        Ok(())
    }
}

/// Analyzes an MPEG-1 or MPEG-2 program stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let mut walker = Walker::default();
    let result = walk(src, info, &mut walker);
    if walker.dvd {
        info.set(Field::Subformat, "dvd-video");
    } else if let Some(subformat) = walker.subformat {
        info.set(Field::Subformat, subformat);
    }
    result
}

fn walk(src: &mut dyn ByteSource, info: &mut Info, walker: &mut Walker) -> Result<()> {
    let mut count = 0;
    let mut at_eof = false;
    while !(walker.has_video && walker.has_audio) {
        if count == MAX_PS_PACKETS {
            warn!(count, "mpeg-ps packet limit reached before video and audio were found");
            break;
        }
        count += 1;
        let offset = src.position();
        let code = src.read_vec(4)?;
        if code.len() < 4 {
            at_eof = true;
            break;
        }
        if code[0..3] != [0, 0, 1] {
            return Err(Error::InvalidSegment {
                offset,
                reason: "mpeg-ps start code not found".into(),
            });
        }
        let id = code[3];
        match id {
            PACK_HEADER => {
                let Some(first) = src.read_vec(1)?.first().copied() else {
                    at_eof = true;
                    break;
                };
                let (rest, subformat) = if first & 0xc0 == 0x40 {
                    (9, "mpeg-2")
                } else if first & 0xf0 == 0x20 {
                    (7, "mpeg-1")
                } else {
                    return Err(Error::InvalidSegment {
                        offset,
                        reason: format!("bad mpeg-ps pack header: 0x{first:02x}"),
                    });
                };
                let data = src.read_vec(rest)?;
                if data.len() < rest {
                    at_eof = true;
                    break;
                }
                walker.subformat.get_or_insert(subformat);
                if subformat == "mpeg-2" {
                    let stuffing = (data[8] & 7) as u64;
                    if !src.skip(stuffing)? {
                        at_eof = true;
                        break;
                    }
                }
            }
            END_CODE => {
                at_eof = true;
                break;
            }
            0xbb..=0xff => {
                let length = src.read_vec(2)?;
                if length.len() < 2 {
                    at_eof = true;
                    break;
                }
                let size = u16::from_be_bytes([length[0], length[1]]) as usize;
                trace!(stream_id = id, size, "mpeg-ps packet");
                match id {
                    SYSTEM_HEADER | 0xbc | 0xbe | 0xf0..=0xff => {
                        if !src.skip(size as u64)? {
                            at_eof = true;
                            break;
                        }
                    }
                    PRIVATE_STREAM_2 => {
                        walker.dvd = true;
                        if !src.skip(size as u64)? {
                            at_eof = true;
                            break;
                        }
                    }
                    _ => {
                        let mut packet = code.clone();
                        packet.extend_from_slice(&length);
                        let body = src.read_vec(size)?;
                        let short = body.len() < size;
                        packet.extend(body);
                        if short {
                            at_eof = true;
                            break;
                        }
                        walker.process_pes(&packet, info)?;
                    }
                }
            }
            _ => {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: format!("unexpected mpeg-ps start code: 0x{id:02x}"),
                });
            }
        }
    }

    if at_eof {
        for i in 0..walker.streams.len() {
            let parsed = walker.streams[i].es.finish()?;
            walker.add_track(info, parsed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

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

    // pack header; PES with only the tail of a picture
    const VIDEO_TAIL: &str = "000001ba44e806d16e030189c3f8\
        000001e0001c8100007428c0ade7649131f5c187e1b8005dc0d5acdb4c892a787137";
    // pack header; PES with a 720x480 MPEG-2 sequence header
    const VIDEO: &str = "000001ba44e80f07f4ad0189c3f8\
        000001e0002781c00a313a05c2eb113a057c89000001b32d01e0240a1e62f8000001b5148200010000000001b8";
    // pack header; private stream 1 with AC-3 substream 0x80
    const AUDIO: &str = "000001ba44e807716e030189c3f8\
        000001bd0014818005213a0335a7800301850b779c6714404b7f";

    /// DVD navigation pack: pack header, system header, two private stream 2
    /// packets
    fn dvd_nav_pack() -> Vec<u8> {
        let mut d = hex(
            "000001ba44e80f0364010189c3f8000001bb001280c4e104e17fb9e0e8b8c020bde03abfe002",
        );
        d.extend(hex("000001bf03d4"));
        d.resize(d.len() + 0x3d4, 0);
        d.extend(hex("000001bf03fa"));
        d.resize(d.len() + 0x3fa, 0);
        d
    }

    fn concat(parts: &[&[u8]]) -> Vec<u8> {
        parts.concat()
    }

    fn check_dvd_tracks(info: &Info, video_first: bool) {
        let (video, audio) = if video_first {
            (&info.tracks[0], &info.tracks[1])
        } else {
            (&info.tracks[1], &info.tracks[0])
        };
        assert_eq!(video.codec, "mpeg-2");
        assert_eq!((video.width, video.height), (Some(720), Some(480)));
        assert_eq!(audio.codec, "ac3");
        assert_eq!(audio.sample_rate, Some(48000));
        assert_eq!(audio.channel_count, Some(2));
        assert_eq!(audio.sample_size, Some(16));
    }

    #[test]
    fn test_pack_start_only() {
        let (result, info) = run(b"\0\0\x01\xba");
        result.unwrap();
        assert!(info.tracks.is_empty());
        assert_eq!(info.subformat(), None);
    }

    #[test]
    fn test_mpeg2() {
        let data = hex(concat!(
            "000001ba4400040004010189c3f8000001bb001280c4e104e17fb9e0e8b8c020bde03abfe002",
            "000001e0007681c10d310001b8611100019c411e60e8000001b32c0240231755e381101111121212",
            "13131313141414141415151515151516161616161616171717171717171718181819181818191a1a",
            "1a1a191b1b1b1b1b1c1c1c1c1e1e1e1f1f21000001b5148200010000000001b52305050508721200",
            "000001b8"
        ));
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("mpeg-2"));
        assert_eq!(info.tracks.len(), 1);
        assert_eq!(info.tracks[0].codec, "mpeg-2");
        assert_eq!((info.tracks[0].width, info.tracks[0].height), (Some(704), Some(576)));
    }

    #[test]
    fn test_mpeg1() {
        let data = hex(concat!(
            "000001ba2100031941801b91000001bb0009801b9101e1ffe0e02e",
            "000001be00086162636465666768000001ba2100032c01801b91",
            "000001e0001c602e31000527911100050b71000001b31601208302cee0a4000001b8"
        ));
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("mpeg-1"));
        assert_eq!(info.tracks[0].codec, "mpeg-1");
        assert_eq!((info.tracks[0].width, info.tracks[0].height), (Some(352), Some(288)));
    }

    #[test]
    fn test_dvd_video_split_across_packets() {
        let data = concat(&[&hex(VIDEO_TAIL), &hex(AUDIO), &dvd_nav_pack(), &hex(VIDEO)]);
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("dvd-video"));
        check_dvd_tracks(&info, false);
    }

    #[test]
    fn test_track_order_follows_completion() {
        let data = concat(&[&dvd_nav_pack(), &hex(VIDEO), &dvd_nav_pack(), &hex(AUDIO), &dvd_nav_pack()]);
        let (result, info) = run(&data);
        result.unwrap();
        check_dvd_tracks(&info, true);

        let data = concat(&[&hex(AUDIO), &hex(VIDEO)]);
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("mpeg-2"));
        check_dvd_tracks(&info, false);
    }

    #[test]
    fn test_pes_without_pack_header() {
        let data = hex(&AUDIO[28..]);
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("mpeg-2"));
        assert_eq!(info.tracks[0].codec, "ac3");
    }

    #[test]
    fn test_lpcm() {
        let data = concat(&[&hex(AUDIO_LPCM), &hex(VIDEO)]);
        let (result, info) = run(&data);
        result.unwrap();
        let audio = &info.tracks[0];
        assert_eq!(audio.codec, "lpcm");
        assert_eq!(audio.sample_rate, Some(48000));
        assert_eq!(audio.channel_count, Some(2));
        assert_eq!(audio.sample_size, Some(16));
        assert_eq!(info.tracks[1].codec, "mpeg-2");
    }

    #[test]
    fn test_lost_sync() {
        let mut data = hex(VIDEO_TAIL);
        data.extend_from_slice(b"\0\0\x02\xe0");
        let (result, info) = run(&data);
        assert!(matches!(result, Err(Error::InvalidSegment { offset: 48, .. })));
        assert!(info.tracks.is_empty());
        assert_eq!(info.subformat(), Some("mpeg-2"));
    }

    #[test]
    fn test_video_without_sequence_header() {
        let (result, _) = run(&hex(VIDEO_TAIL));
        assert!(matches!(result, Err(Error::Truncated(_))));
    }

    // private stream 1, LPCM substream 0xa0: frames, pointer, emphasis,
    // 16-bit 48 kHz stereo, dynamic range, one sample
    const AUDIO_LPCM: &str = "000001bd00118180052100010001a00100040001800000";
}
