//! MPEG transport stream walker
//!
//! Reads 188-byte packets (or 192-byte BDAV packets with a 4-byte
//! timestamp prefix), assembles the PAT and the PMTs it names, then feeds
//! PES payloads of each listed elementary stream to its codec parser until
//! every stream has produced a track.

use super::pes::{parse_pes_header, EsKind, EsStream, Parsed};
use crate::{
    error::{Error, Result},
    info::{Field, Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use std::collections::HashMap;
use tracing::{trace, warn};

pub const SYNC_BYTE: u8 = 0x47;
pub const TS_PACKET_SIZE: usize = 188;
pub const BDAV_PACKET_SIZE: usize = 192;

/// Packets read before giving up on streams that have not produced a track
pub const MAX_TS_PACKETS: usize = 20000;

/// Largest `section_length` allowed for PAT and PMT sections
pub const MAX_SECTION_LENGTH: usize = 1021;

const PAT_PID: u16 = 0;
const TABLE_PAT: u8 = 0;
const TABLE_PMT: u8 = 2;
const CRC_SIZE: usize = 4;

/// Packet framing, chosen from where the first sync byte sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Ts,
    Bdav,
}

impl Layout {
    pub fn from_header(header: &[u8]) -> Option<Layout> {
        if header.first() == Some(&SYNC_BYTE) {
            Some(Layout::Ts)
        } else if header.get(4) == Some(&SYNC_BYTE) {
            Some(Layout::Bdav)
        } else {
            None
        }
    }

    pub fn packet_size(self) -> usize {
        match self {
            Layout::Ts => TS_PACKET_SIZE,
            Layout::Bdav => BDAV_PACKET_SIZE,
        }
    }

    fn prefix(self) -> usize {
        self.packet_size() - TS_PACKET_SIZE
    }

    fn subformat(self) -> &'static str {
        match self {
            Layout::Ts => "ts",
            Layout::Bdav => "bdav",
        }
    }
}

/// Fixed 4-byte packet header
#[derive(Debug, Clone, Copy)]
struct PacketHeader {
    error: bool,
    payload_start: bool,
    pid: u16,
    adaptation_field: bool,
    has_payload: bool,
}

impl PacketHeader {
    fn parse(b: &[u8]) -> PacketHeader {
        PacketHeader {
            error: b[1] & 0x80 != 0,
            payload_start: b[1] & 0x40 != 0,
            pid: u16::from_be_bytes([b[1] & 0x1f, b[2]]),
            adaptation_field: b[3] & 0x20 != 0,
            has_payload: b[3] & 0x10 != 0,
        }
    }
}

/// Checks the common PSI section header and returns the section body
/// without the trailing CRC
fn section_body<'a>(section: &'a [u8], table_id: u8, what: &str) -> Result<&'a [u8]> {
    if section.len() < 8 {
        return Err(Error::truncated(what));
    }
    if section[0] != table_id {
        return Err(Error::bad(format!("bad {what} table id: {}", section[0])));
    }
    if section[1] & 0x80 == 0 {
        return Err(Error::bad(format!("{what} section syntax indicator not set")));
    }
    let end = 3 + section_length(section);
    if end > section.len() || end < 8 + CRC_SIZE {
        return Err(Error::bad(format!("bad {what} section length")));
    }
    Ok(&section[8..end - CRC_SIZE])
}

fn section_length(section: &[u8]) -> usize {
    ((section[1] & 0x0f) as usize) << 8 | section[2] as usize
}

/// Parses a program association section into `(program_number, pmt_pid)`
/// pairs, leaving out the network information entry (program 0)
pub fn parse_pat(section: &[u8]) -> Result<Vec<(u16, u16)>> {
    let body = section_body(section, TABLE_PAT, "mpeg-ts pat")?;
    if body.len() % 4 != 0 {
        return Err(Error::bad("bad mpeg-ts pat entry size"));
    }
    Ok(body
        .chunks_exact(4)
        .map(|e| (u16::from_be_bytes([e[0], e[1]]), u16::from_be_bytes([e[2] & 0x1f, e[3]])))
        .filter(|&(program, _)| program != 0)
        .collect())
}

/// A parsed program map section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program: u16,
    /// `(elementary_pid, stream_type)` in table order
    pub streams: Vec<(u16, u8)>,
}

pub fn parse_pmt(section: &[u8]) -> Result<Pmt> {
    let program = section
        .get(3..5)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| Error::truncated("mpeg-ts pmt"))?;
    let body = section_body(section, TABLE_PMT, "mpeg-ts pmt")?;
    if body.len() < 4 {
        return Err(Error::truncated("mpeg-ts pmt"));
    }
    let info_len = (u16::from_be_bytes([body[2], body[3]]) & 0x0fff) as usize;
    let mut entries = body
        .get(4 + info_len..)
        .ok_or_else(|| Error::bad("mpeg-ts pmt program info too long"))?;
    let mut streams = Vec::new();
    while !entries.is_empty() {
        if entries.len() < 5 {
            return Err(Error::truncated("mpeg-ts pmt entry"));
        }
        let stream_type = entries[0];
        let pid = u16::from_be_bytes([entries[1] & 0x1f, entries[2]]);
        let es_info_len = (u16::from_be_bytes([entries[3], entries[4]]) & 0x0fff) as usize;
        entries = entries
            .get(5 + es_info_len..)
            .ok_or_else(|| Error::bad("mpeg-ts pmt es info too long"))?;
        streams.push((pid, stream_type));
    }
    Ok(Pmt { program, streams })
}

/// PSI section being collected across packets
#[derive(Debug, Default)]
struct SectionBuf {
    buf: Vec<u8>,
    active: bool,
}

impl SectionBuf {
    /// Adds a packet payload and returns the section once it is complete
    fn push(&mut self, payload: &[u8], payload_start: bool) -> Result<Option<Vec<u8>>> {
        if payload_start {
            let pointer = *payload.first().ok_or_else(|| Error::truncated("mpeg-ts pointer field"))? as usize;
            let data = payload
                .get(1 + pointer..)
                .ok_or_else(|| Error::bad("mpeg-ts pointer field past packet end"))?;
            self.buf.clear();
            self.buf.extend_from_slice(data);
            self.active = true;
        } else if self.active {
            self.buf.extend_from_slice(payload);
        } else {
            return Ok(None);
        }
        if self.buf.len() < 3 {
            return Ok(None);
        }
        let length = section_length(&self.buf);
        if length > MAX_SECTION_LENGTH {
            return Err(Error::DataTooLarge {
                size: length as u64,
                max: MAX_SECTION_LENGTH as u64,
            });
        }
        if self.buf.len() < 3 + length {
            return Ok(None);
        }
        self.active = false;
        let mut section = std::mem::take(&mut self.buf);
        section.truncate(3 + length);
        Ok(Some(section))
    }
}

struct Stream {
    pid: u16,
    es: EsStream,
    track: Option<Track>,
}

#[derive(Default)]
struct Walker {
    pat: SectionBuf,
    pat_seen: bool,
    /// PMT PIDs still to be read, with the program each should describe
    pending_pmts: HashMap<u16, (u16, SectionBuf)>,
    /// Elementary streams in PMT order
    streams: Vec<Stream>,
}

impl Walker {
    fn is_finished(&self) -> bool {
        self.pat_seen && self.pending_pmts.is_empty() && self.streams.iter().all(|s| s.es.is_done())
    }

    fn process_packet(&mut self, packet: &[u8], offset: u64) -> Result<()> {
        let header = PacketHeader::parse(packet);
        if header.error {
            warn!(offset, pid = header.pid, "mpeg-ts packet with transport error indicator");
            return Ok(());
        }
        if !header.has_payload {
            return Ok(());
        }
        let mut start = 4;
        if header.adaptation_field {
            start += 1 + packet[4] as usize;
            if start > packet.len() {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: "mpeg-ts adaptation field past packet end".into(),
                });
            }
        }
        let payload = &packet[start..];

        if header.pid == PAT_PID && !self.pat_seen {
            if let Some(section) = self.pat.push(payload, header.payload_start)? {
                self.handle_pat(&section)?;
            }
        } else if let Some((program, buf)) = self.pending_pmts.get_mut(&header.pid) {
            let program = *program;
            if let Some(section) = buf.push(payload, header.payload_start)? {
                self.handle_pmt(header.pid, program, &section)?;
            }
        } else if let Some(stream) = self.streams.iter_mut().find(|s| s.pid == header.pid) {
            if header.payload_start && !stream.es.is_done() {
                let pes = parse_pes_header(payload, false)?;
                if pes.header_len > payload.len() {
                    return Err(Error::truncated("mpeg-ts pes header"));
                }
                stream.es.start_packet(pes.payload_len());
                let parsed = stream.es.push(&payload[pes.header_len..])?;
                record(stream, parsed);
            } else {
                let parsed = stream.es.push(payload)?;
                record(stream, parsed);
            }
        }
        Ok(())
    }

    fn handle_pat(&mut self, section: &[u8]) -> Result<()> {
        let programs = parse_pat(section)?;
        trace!(?programs, "mpeg-ts pat");
        self.pat_seen = true;
        for (program, pid) in programs {
            self.pending_pmts.entry(pid).or_insert_with(|| (program, SectionBuf::default()));
        }
        Ok(())
    }

    fn handle_pmt(&mut self, pid: u16, program: u16, section: &[u8]) -> Result<()> {
        let pmt = parse_pmt(section)?;
        if pmt.program != program {
            // Another program sharing this PID
            return Ok(());
        }
        trace!(program, streams = ?pmt.streams, "mpeg-ts pmt");
        self.pending_pmts.remove(&pid);
        for (es_pid, stream_type) in pmt.streams {
            let Some(kind) = EsKind::from_stream_type(stream_type) else {
                trace!(pid = es_pid, stream_type, "mpeg-ts stream type ignored");
                continue;
            };
            if self.streams.iter().any(|s| s.pid == es_pid) {
                continue;
            }
            self.streams.push(Stream {
                pid: es_pid,
                es: EsStream::new(kind),
                track: None,
            });
        }
        Ok(())
    }
}

fn record(stream: &mut Stream, parsed: Option<Parsed>) {
    if let Some(Parsed::Track(track)) = parsed {
        stream.track = Some(track);
    }
}

/// Analyzes an MPEG transport stream (plain or BDAV `.m2ts`)
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let mut first = src.read_exact_vec(5, "mpeg-ts packet")?;
    let layout = Layout::from_header(&first).ok_or_else(|| Error::bad("mpeg-ts sync byte not found"))?;
    info.set(Field::Subformat, layout.subformat());
    let size = layout.packet_size();
    let prefix = layout.prefix();

    let mut walker = Walker::default();
    let mut offset = 0u64;
    let mut count = 0;
    let mut at_eof = false;
    while !walker.is_finished() {
        if count == MAX_TS_PACKETS {
            warn!(count, "mpeg-ts packet limit reached before all tracks were found");
            break;
        }
        let mut packet = std::mem::take(&mut first);
        packet.extend(src.read_vec(size - packet.len())?);
        if packet.len() < size {
            at_eof = true;
            break;
        }
        if packet[prefix] != SYNC_BYTE {
            return Err(Error::InvalidSegment {
                offset,
                reason: "mpeg-ts sync byte not found".into(),
            });
        }
        walker.process_packet(&packet[prefix..], offset + prefix as u64)?;
        offset += size as u64;
        count += 1;
    }

    if !walker.pat_seen {
        return Err(Error::bad("missing mpeg-ts PAT payload"));
    }
    // Tracks found so far are kept even when a stream fails at EOF.
    let mut result = Ok(());
    for stream in &mut walker.streams {
        if at_eof && result.is_ok() {
            match stream.es.finish() {
                Ok(parsed) => record(stream, parsed),
                Err(e) => result = Err(e),
            }
        }
        if let Some(track) = stream.track.take() {
            info.add_track(track);
        }
    }
    result
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

    /// Pads a packet with stuffing bytes to 188 bytes
    fn packet(head: &str) -> Vec<u8> {
        let mut p = hex(head);
        p.resize(TS_PACKET_SIZE, 0xff);
        p
    }

    fn sample() -> Vec<u8> {
        let mut data = Vec::new();
        // PAT: program 1 on PID 0x100
        data.extend(packet("474000110000b00d0001c300000001e10076578e5f"));
        // PMT: H.264 on 0x1011, AC-3 on 0x1100
        data.extend(packet(
            "474100110002b0230001c10000f011f0001bf011f00081f100f00c0a04656e6700050441432d334a1fa123",
        ));
        // Video PES with a 7-byte adaptation field
        data.extend(packet(
            "4750113107900000\
             01c97e1e000001e000008080052100018ca100000109100000000001274d40289a6280f0088fbc07d40404\
             0500000303e90000ea60e8c0004c4b0002faf2ef380a0000000128fe3c80",
        ));
        // Audio PES
        data.extend(packet("47510011000001bd06088080052100018ca10b7739181c30e1c414ec9200fc2bfb52"));
        data
    }

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    fn check_tracks(info: &Info) {
        assert_eq!(info.tracks.len(), 2);
        let video = &info.tracks[0];
        assert_eq!(video.codec, "h264");
        assert_eq!((video.width, video.height), (Some(1920), Some(1080)));
        let audio = &info.tracks[1];
        assert_eq!(audio.codec, "ac3");
        assert_eq!(audio.sample_rate, Some(48000));
        assert_eq!(audio.channel_count, Some(5));
        assert_eq!(audio.sample_size, Some(16));
    }

    #[test]
    fn test_parse_pat() {
        let pat = parse_pat(&hex("00b00d0001c300000001e10076578e5fffffff")).unwrap();
        assert_eq!(pat, vec![(1, 256)]);
    }

    #[test]
    fn test_parse_pmt() {
        let pmt = parse_pmt(&hex(
            "02b0230001c10000f011f0001bf011f00081f100f00c0a04656e6700050441432d334a1fa123ffff",
        ))
        .unwrap();
        assert_eq!(pmt.program, 1);
        assert_eq!(pmt.streams, vec![(0x1011, 0x1b), (0x1100, 0x81)]);
    }

    #[test]
    fn test_ts() {
        let data = sample();
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("ts"));
        check_tracks(&info);
    }

    #[test]
    fn test_bdav() {
        let data = sample();
        let mut bdav = Vec::new();
        for (i, p) in data.chunks(TS_PACKET_SIZE).enumerate() {
            bdav.extend_from_slice(if i == 0 { b"\0???" } else { b"????" });
            bdav.extend_from_slice(p);
        }
        let (result, info) = run(&bdav);
        result.unwrap();
        assert_eq!(info.subformat(), Some("bdav"));
        check_tracks(&info);
    }

    #[test]
    fn test_missing_pat() {
        let mut data = hex("47001010");
        data.resize(TS_PACKET_SIZE, 0);
        let (result, info) = run(&data);
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
        assert_eq!(info.subformat(), Some("ts"));
        assert!(info.tracks.is_empty());
    }

    #[test]
    fn test_lost_sync() {
        let mut data = sample();
        data[TS_PACKET_SIZE] = 0;
        let (result, _) = run(&data);
        assert!(matches!(result, Err(Error::InvalidSegment { offset: 188, .. })));
    }

    #[test]
    fn test_eof_before_audio() {
        let data = sample();
        let (result, info) = run(&data[..3 * TS_PACKET_SIZE]);
        result.unwrap();
        assert_eq!(info.tracks.len(), 1);
        assert_eq!(info.tracks[0].codec, "h264");
    }

    #[test]
    fn test_audio_packet_too_short() {
        let mut data = sample();
        data.truncate(3 * TS_PACKET_SIZE);
        // PES length 10 leaves only the AC-3 sync word.
        data.extend(packet("47510011000001bd000a8080052100018ca10b77"));
        let (result, info) = run(&data);
        assert!(matches!(result, Err(Error::Truncated(_))));
        assert_eq!(info.tracks.len(), 1);
    }
}
