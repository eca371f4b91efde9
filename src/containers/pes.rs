//! PES packet headers and elementary stream collection, shared by the
//! transport stream and program stream walkers
//!
//! Payload bytes of one stream are gathered until its codec parser yields a
//! track. Parser errors only count once the buffer is full or the input
//! ends; before that they mean the header has not arrived yet.

use crate::{
    codecs::{h264, h265, mpeg_audio, mpeg_video},
    error::{Error, Result},
    info::{Track, TrackKind},
};
use tracing::trace;

/// Most payload bytes buffered per elementary stream
pub const MAX_PES_BUFFER: usize = 16384;

/// Most `0xff` stuffing bytes in an MPEG-1 PES header
const MAX_MPEG1_STUFFING: usize = 16;

/// Stream IDs whose PES header has no optional fields
fn has_no_header_extension(stream_id: u8) -> bool {
    matches!(stream_id, 0xbc | 0xbe | 0xbf | 0xf0 | 0xf1 | 0xf2 | 0xf8 | 0xff)
}

/// Parsed fixed part of a PES packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// Bytes after the length field, `None` if unbounded (video in TS)
    pub packet_length: Option<usize>,
    /// Offset of the payload from the start code
    pub header_len: usize,
}

impl PesHeader {
    /// Payload bytes in this packet, if bounded
    pub fn payload_len(&self) -> Option<usize> {
        self.packet_length.map(|l| l + 6 - self.header_len)
    }
}

/// Parses a PES header (MPEG-2 syntax, or MPEG-1 when `allow_mpeg1`)
pub fn parse_pes_header(data: &[u8], allow_mpeg1: bool) -> Result<PesHeader> {
    if data.len() < 6 {
        return Err(Error::truncated("pes header"));
    }
    if data[0..3] != [0, 0, 1] {
        return Err(Error::bad("pes start code not found"));
    }
    let stream_id = data[3];
    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    let header_len = if has_no_header_extension(stream_id) {
        6
    } else if data.get(6).ok_or_else(|| Error::truncated("pes header"))? & 0xc0 == 0x80 {
        let extension = *data.get(8).ok_or_else(|| Error::truncated("pes header"))?;
        9 + extension as usize
    } else if allow_mpeg1 {
        mpeg1_header_len(data)?
    } else {
        return Err(Error::bad("bad pes header marker bits"));
    };
    if length != 0 && length + 6 < header_len {
        return Err(Error::bad(format!("pes header longer than its packet: {header_len}")));
    }
    Ok(PesHeader {
        stream_id,
        packet_length: (length != 0).then_some(length),
        header_len,
    })
}

fn mpeg1_header_len(data: &[u8]) -> Result<usize> {
    let at = |i: usize| data.get(i).copied().ok_or_else(|| Error::truncated("mpeg-1 pes header"));
    let mut i = 6;
    while at(i)? == 0xff {
        i += 1;
        if i - 6 > MAX_MPEG1_STUFFING {
            return Err(Error::bad("too much mpeg-1 pes stuffing"));
        }
    }
    if at(i)? & 0xc0 == 0x40 {
        i += 2; // STD buffer scale and size
    }
    let flags = at(i)?;
    i += match flags & 0xf0 {
        0x20 => 5,
        0x30 => 10,
        _ if flags == 0x0f => 1,
        _ => return Err(Error::bad(format!("bad mpeg-1 pes flags: 0x{flags:02x}"))),
    };
    Ok(i)
}

/// Codec family of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsKind {
    MpegVideo,
    H264,
    H265,
    MpegAudio,
    Adts,
    Ac3,
    /// DVD linear PCM, after the substream header
    Lpcm,
    /// Private data that may be AC-3
    Private,
    /// Known codec without a header parser
    Fixed(TrackKind, &'static str),
}

impl EsKind {
    /// Maps an MPEG-TS PMT `stream_type`
    pub fn from_stream_type(stream_type: u8) -> Option<EsKind> {
        Some(match stream_type {
            0x01 | 0x02 => EsKind::MpegVideo,
            0x03 | 0x04 => EsKind::MpegAudio,
            0x06 => EsKind::Private,
            0x0f | 0x11 => EsKind::Adts,
            0x10 => EsKind::Fixed(TrackKind::Video, "divx5"),
            0x1b => EsKind::H264,
            0x24 => EsKind::H265,
            0x42 => EsKind::Fixed(TrackKind::Video, "avs"),
            0x81 => EsKind::Ac3,
            0x82 | 0x85 | 0x86 | 0x8a => EsKind::Fixed(TrackKind::Audio, "dts"),
            0x83 => EsKind::Fixed(TrackKind::Audio, "truehd"),
            0x84 | 0x87 => EsKind::Fixed(TrackKind::Audio, "eac3"),
            0xea => EsKind::Fixed(TrackKind::Video, "vc1"),
            _ => return None,
        })
    }
}

/// Outcome of a successful parse attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Track(Track),
    /// The stream carries nothing reportable
    Ignore,
}

/// Runs the codec parser for `kind` on buffered payload
///
/// With `complete` false, results that more data could still change are
/// reported as truncation.
pub fn parse_es(kind: EsKind, data: &[u8], complete: bool) -> Result<Parsed> {
    let track = match kind {
        EsKind::MpegVideo => {
            let start = data
                .windows(4)
                .position(|w| w == [0, 0, 1, mpeg_video::SEQUENCE_HEADER_CODE])
                .ok_or_else(|| Error::truncated("mpeg-video sequence header"))?;
            let track = mpeg_video::parse_track(&data[start..])?;
            // The codec is only known once the next start code arrives.
            if track.codec == "mpeg" && !complete {
                return Err(Error::truncated("mpeg-video sequence header"));
            }
            track
        }
        EsKind::H264 => h264::parse_track(data)?,
        EsKind::H265 => h265::parse_track(data)?,
        EsKind::MpegAudio => mpeg_audio::parse_mpeg_header(data)?,
        EsKind::Adts => mpeg_audio::parse_adts_header(data)?,
        EsKind::Ac3 => mpeg_audio::parse_ac3_header(data)?,
        EsKind::Lpcm => mpeg_audio::parse_dvd_lpcm_header(data)?,
        EsKind::Private => {
            if data.len() < 2 && !complete {
                return Err(Error::truncated("private stream"));
            }
            if !data.starts_with(&mpeg_audio::AC3_SYNC_WORD) {
                return Ok(Parsed::Ignore);
            }
            mpeg_audio::parse_ac3_header(data)?
        }
        EsKind::Fixed(kind, codec) => Track::new(kind, codec),
    };
    Ok(Parsed::Track(track))
}

/// Payload collected for one elementary stream
#[derive(Debug)]
pub struct EsStream {
    pub kind: EsKind,
    buf: Vec<u8>,
    done: bool,
    /// Bytes still expected from the current bounded PES packet
    pes_remaining: Option<usize>,
    started: bool,
}

impl EsStream {
    pub fn new(kind: EsKind) -> Self {
        Self {
            kind,
            buf: Vec::new(),
            done: false,
            pes_remaining: None,
            started: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Starts a new PES packet whose payload is `payload_len` bytes long
    pub fn start_packet(&mut self, payload_len: Option<usize>) {
        self.pes_remaining = payload_len;
        self.started = true;
    }

    /// Appends payload and retries the parser
    ///
    /// Payload before the first packet start is dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Option<Parsed>> {
        if self.done || !self.started {
            return Ok(None);
        }
        let mut data = data;
        if let Some(remaining) = self.pes_remaining.as_mut() {
            let n = data.len().min(*remaining);
            data = &data[..n];
            *remaining -= n;
        }
        let room = MAX_PES_BUFFER - self.buf.len();
        self.buf.extend_from_slice(&data[..data.len().min(room)]);
        if self.buf.is_empty() {
            return Ok(None);
        }
        let full = self.buf.len() >= MAX_PES_BUFFER;
        match parse_es(self.kind, &self.buf, full) {
            Ok(parsed) => {
                trace!(kind = ?self.kind, buffered = self.buf.len(), "elementary stream parsed");
                self.finish_with(parsed).map(Some)
            }
            Err(e) if full => Err(e),
            Err(e) => {
                trace!(kind = ?self.kind, error = %e, "elementary stream needs more data");
                Ok(None)
            }
        }
    }

    /// Final attempt at end of input
    ///
    /// A stream that never received payload yields `None`.
    pub fn finish(&mut self) -> Result<Option<Parsed>> {
        if self.done || self.buf.is_empty() {
            return Ok(None);
        }
        let parsed = parse_es(self.kind, &self.buf, true)?;
        self.finish_with(parsed).map(Some)
    }

    fn finish_with(&mut self, parsed: Parsed) -> Result<Parsed> {
        self.done = true;
        self.buf = Vec::new();
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_mpeg2_pes_header() {
        let data = hex("000001bd06088080052100018ca10b7739181c30e1");
        let header = parse_pes_header(&data, false).unwrap();
        assert_eq!(header.stream_id, 0xbd);
        assert_eq!(header.header_len, 14);
        assert_eq!(header.payload_len(), Some(0x608 + 6 - 14));
        let track = match parse_es(EsKind::Ac3, &data[14..], false).unwrap() {
            Parsed::Track(track) => track,
            Parsed::Ignore => panic!("ac3 ignored"),
        };
        assert_eq!(track.codec, "ac3");
        assert_eq!(track.sample_rate, Some(48000));
        assert_eq!(track.channel_count, Some(5));
    }

    #[test]
    fn test_mpeg1_pes_header() {
        // stuffing, STD buffer, PTS only
        let data = hex("000001e0001cffff402e210005279111");
        let header = parse_pes_header(&data, true).unwrap();
        assert_eq!(header.header_len, 15);
        assert!(parse_pes_header(&data, false).is_err());
    }

    #[test]
    fn test_bounded_packet_truncates_payload() {
        // Packet length 10 leaves two payload bytes, too few for AC-3.
        let data = hex("000001bd000a8080052100018ca10b77");
        let header = parse_pes_header(&data, false).unwrap();
        let mut stream = EsStream::new(EsKind::Ac3);
        stream.start_packet(header.payload_len());
        assert_eq!(stream.push(&data[header.header_len..]).unwrap(), None);
        assert!(matches!(stream.finish(), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_video_waits_for_next_start_code() {
        let mut stream = EsStream::new(EsKind::MpegVideo);
        stream.start_packet(None);
        assert_eq!(stream.push(&hex("7428c0000001b31601208302cee0a4")).unwrap(), None);
        let Some(Parsed::Track(track)) = stream.push(&hex("000001b8")).unwrap() else {
            panic!("no track");
        };
        assert_eq!(track.codec, "mpeg-1");
        assert_eq!((track.width, track.height), (Some(352), Some(288)));
        assert!(stream.is_done());
    }

    #[test]
    fn test_private_stream_without_ac3() {
        assert_eq!(parse_es(EsKind::Private, b"\x20\x00\x01", false).unwrap(), Parsed::Ignore);
    }
}
