//! RIFF walkers: AVI, WAV, WebP and Video CD (CDXA)
//!
//! Chunks are `<4-byte id><u32 LE size><payload>`, padded to an even size.
//! A `LIST` chunk carries a 4-byte list type followed by child chunks; the
//! walker names such lists `<type>+` (e.g. `hdrl+`) to tell them apart from
//! plain chunks.
//!
//! AVI reference: <https://learn.microsoft.com/en-us/windows/win32/directshow/avi-riff-file-reference>

use super::{
    mpegps, windows_audio_codec, windows_guid_audio_codec, windows_video_codec,
    WAVE_FORMAT_EXTENSIBLE,
};
use crate::{
    codecs::vp8,
    error::{Error, Result},
    info::{Field, Info, Track},
    source::{ByteSource, ByteSourceExt, SubSource},
};
use byteorder::{ByteOrder, LittleEndian};
use tracing::{trace, warn};

const CHUNK_HEADER_SIZE: u64 = 8;

/// Largest `strh` or `strf` chunk accepted; typically under 100 bytes
pub const MAX_STREAM_HEADER_SIZE: u64 = 99999;

/// Largest chunk skipped before `hdrl`; `JUNK` may be larger
const MAX_SKIPPED_CHUNK_SIZE: u64 = 1 << 16;
const MAX_SKIPPED_JUNK_SIZE: u64 = 1 << 20;

/// Largest `fmt ` chunk read from a WAV file
const MAX_FMT_SIZE: u64 = 1024;

/// Raw CD-ROM XA Mode 2 Form 2 sector: sync, address and mode, subheader,
/// data, EDC
const SECTOR_HEADER_SIZE: usize = 24;
const SECTOR_DATA_SIZE: usize = 2324;
const SECTOR_EDC_SIZE: u64 = 4;
const SECTOR_SYNC: [u8; 12] = [0, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0];

/// Sectors read from a Video CD file, empty ones included
pub const MAX_CDXA_SECTORS: usize = 8192;

/// Chunk header as read from the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    id: [u8; 4],
    /// Payload size rounded up to even
    size: u64,
}

/// Reads a chunk header, or `None` at a clean end of the stream
fn read_chunk(src: &mut dyn ByteSource, what: &str) -> Result<Option<Chunk>> {
    let data = src.read_vec(CHUNK_HEADER_SIZE as usize)?;
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < CHUNK_HEADER_SIZE as usize {
        return Err(Error::truncated(what));
    }
    let size = LittleEndian::read_u32(&data[4..8]) as u64;
    let chunk = Chunk {
        id: [data[0], data[1], data[2], data[3]],
        size: size + (size & 1),
    };
    trace!(
        id = %String::from_utf8_lossy(&chunk.id),
        size = chunk.size,
        offset = src.position() - CHUNK_HEADER_SIZE,
        "riff chunk"
    );
    Ok(Some(chunk))
}

/// Reads the 12-byte RIFF header, returning the form type and the size
/// declared for it (form type excluded)
fn read_riff_header(src: &mut dyn ByteSource, format: &str) -> Result<([u8; 4], u64)> {
    let data = src.read_exact_vec(12, &format!("{format} RIFF header"))?;
    if &data[0..4] != b"RIFF" {
        return Err(Error::bad(format!("{format} signature not found")));
    }
    let size = (LittleEndian::read_u32(&data[4..8]) as u64).saturating_sub(4);
    Ok(([data[8], data[9], data[10], data[11]], size))
}

/// Builds an audio track from a WAVEFORMATEX (or WAVEFORMATEXTENSIBLE)
pub fn parse_wave_format(data: &[u8]) -> Result<Track> {
    if data.len() < 16 {
        return Err(Error::bad("WAVEFORMATEX too short"));
    }
    let format_tag = LittleEndian::read_u16(&data[0..2]);
    let codec = if format_tag == WAVE_FORMAT_EXTENSIBLE {
        let Some(sub_format) = data.get(24..40) else {
            return Err(Error::bad("WAVEFORMATEXTENSIBLE too short"));
        };
        let mut guid = [0u8; 16];
        guid.copy_from_slice(sub_format);
        windows_guid_audio_codec(&guid)
    } else {
        windows_audio_codec(format_tag)
    };
    let mut track = Track::audio(codec);
    track.channel_count = Some(LittleEndian::read_u16(&data[2..4]) as u32);
    track.sample_rate = Some(LittleEndian::read_u32(&data[4..8]));
    // Compressed formats (mp3) usually leave this 0.
    let bits = LittleEndian::read_u16(&data[14..16]) as u32;
    track.sample_size = Some(if bits == 0 { 16 } else { bits });
    Ok(track)
}

/// AVI list walk state
#[derive(Default)]
struct AviWalker {
    strh: Option<Vec<u8>>,
    strf: Option<Vec<u8>>,
    stop: bool,
    found_hdrl: bool,
}

impl AviWalker {
    /// Walks the children of a list; `limit` is `None` for an unbounded RIFF
    fn process_list(
        &mut self,
        src: &mut dyn ByteSource,
        info: &mut Info,
        mut limit: Option<u64>,
        parent: &[u8],
    ) -> Result<()> {
        let what = format!("avi in-{} chunk", String::from_utf8_lossy(parent));
        let top_level = parent == b"RIFF";
        while !self.stop && limit.map_or(true, |l| l > 0) {
            if limit.is_some_and(|l| l < CHUNK_HEADER_SIZE) {
                return Err(Error::bad(format!("no room for {what} header")));
            }
            let Some(chunk) = read_chunk(src, &what)? else {
                if top_level {
                    // An unbounded or truncated file ends before hdrl.
                    return Ok(());
                }
                return Err(Error::truncated(&what));
            };
            let room = limit.map(|l| l - CHUNK_HEADER_SIZE);
            let mut size = chunk.size;
            let mut list_type = None;
            if &chunk.id == b"LIST" && size >= 4 && room.map_or(true, |r| r >= 4) {
                list_type = Some(src.read_array::<4>("avi LIST type")?);
                size -= 4;
            }
            let consumed = chunk.size;
            if list_type.as_ref() == Some(b"movi") {
                self.stop = true;
                break;
            }
            if let Some(room) = room {
                if consumed > room {
                    return Err(Error::bad(format!(
                        "{what} too long: {}",
                        String::from_utf8_lossy(&chunk.id)
                    )));
                }
                limit = Some(room - consumed);
            }
            match (list_type.as_ref(), &chunk.id) {
                (Some(b"hdrl"), _) if top_level => {
                    self.found_hdrl = true;
                    self.process_list(src, info, Some(size), b"hdrl")?;
                    return Ok(());
                }
                (Some(b"strl"), _) if parent == b"hdrl" => {
                    self.strh = None;
                    self.strf = None;
                    self.process_list(src, info, Some(size), b"strl")?;
                    let (strh, strf) = (self.strh.take(), self.strf.take());
                    let strh = strh.ok_or_else(|| Error::bad("missing strh in avi strl"))?;
                    let strf = strf.ok_or_else(|| Error::bad("missing strf in avi strl"))?;
                    if let Some(track) = parse_stream(&strh, &strf)? {
                        info.add_track(track);
                    }
                }
                (None, id @ (b"strh" | b"strf")) if parent == b"strl" => {
                    let slot = if id == b"strh" { &mut self.strh } else { &mut self.strf };
                    if slot.is_some() {
                        return Err(Error::bad(format!(
                            "duplicate {} chunk in avi strl",
                            String::from_utf8_lossy(id)
                        )));
                    }
                    if size > MAX_STREAM_HEADER_SIZE {
                        return Err(Error::DataTooLarge {
                            size,
                            max: MAX_STREAM_HEADER_SIZE,
                        });
                    }
                    *slot = Some(src.read_exact_vec(size as usize, &what)?);
                }
                (None, id)
                    if (top_level && matches!(id, b"idx1" | b"indx")) || id.starts_with(b"00") =>
                {
                    return Err(Error::bad(format!(
                        "unexpected avi chunk {} before hdrl",
                        String::from_utf8_lossy(id)
                    )));
                }
                (_, id) => {
                    let max = if id == b"JUNK" {
                        MAX_SKIPPED_JUNK_SIZE
                    } else {
                        MAX_SKIPPED_CHUNK_SIZE
                    };
                    if size >= max {
                        return Err(Error::DataTooLarge { size, max });
                    }
                    src.skip_exact(size, &what)?;
                }
            }
        }
        if top_level && !self.found_hdrl && !self.stop {
            return Err(Error::bad("missing avi hdrl chunk"));
        }
        Ok(())
    }
}

/// Builds a track from an AVI stream header and stream format pair
fn parse_stream(strh: &[u8], strf: &[u8]) -> Result<Option<Track>> {
    let kind = strh.get(0..4).ok_or_else(|| Error::bad("avi strh chunk too short"))?;
    match kind {
        b"vids" => {
            if strh.len() < 8 {
                return Err(Error::bad("avi strh chunk too short"));
            }
            if strf.len() < 20 {
                return Err(Error::bad("avi strf chunk too short for video track"));
            }
            // BITMAPINFOHEADER
            let width = LittleEndian::read_u32(&strf[4..8]);
            let height = LittleEndian::read_u32(&strf[8..12]);
            let handler = if &strh[4..8] == b"\0\0\0\0" { &strf[16..20] } else { &strh[4..8] };
            let mut fourcc = [0u8; 4];
            fourcc.copy_from_slice(handler);
            let mut track = Track::video(windows_video_codec(&fourcc)?);
            track.set_dimensions(width, height)?;
            Ok(Some(track))
        }
        b"auds" => {
            if strf.len() < 16 {
                return Err(Error::bad("avi strf chunk too short for audio track"));
            }
            parse_wave_format(strf).map(Some)
        }
        _ => Ok(None),
    }
}

/// Analyzes an AVI file up to the end of its `hdrl` list
pub fn analyze_avi(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let (form, size) = read_riff_header(src, "avi")?;
    if &form != b"AVI " {
        return Err(Error::bad("avi signature not found"));
    }
    info.set_format("avi");
    // Streaming writers leave the RIFF size 0.
    let limit = if size == 0 { None } else { Some(size) };
    AviWalker::default().process_list(src, info, limit, b"RIFF")
}

/// Analyzes a WAV file by finding its `fmt ` chunk
///
/// A file that ends before `fmt ` is accepted with no tracks.
pub fn analyze_wav(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let (form, _) = read_riff_header(src, "wav")?;
    if !matches!(&form, b"WAVE" | b"RMP3") {
        return Err(Error::bad("wav signature not found"));
    }
    info.set_format("wav");
    while let Some(chunk) = read_chunk(src, "wav chunk header")? {
        match &chunk.id {
            b"fmt " => {
                if chunk.size > MAX_FMT_SIZE {
                    return Err(Error::DataTooLarge {
                        size: chunk.size,
                        max: MAX_FMT_SIZE,
                    });
                }
                let data = src.read_vec(chunk.size as usize)?;
                info.add_track(parse_wave_format(&data)?);
                return Ok(());
            }
            b"data" => return Err(Error::bad("wav data chunk before fmt")),
            _ => {
                if !src.skip(chunk.size)? {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

fn read_u24_plus_one(data: &[u8]) -> u32 {
    LittleEndian::read_u24(data) + 1
}

/// Analyzes a WebP image from its first chunk
pub fn analyze_webp(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let (form, _) = read_riff_header(src, "webp")?;
    if &form != b"WEBP" {
        return Err(Error::bad("webp signature not found"));
    }
    info.set_format("webp");
    let chunk = read_chunk(src, "webp chunk header")?
        .ok_or_else(|| Error::truncated("webp chunk header"))?;
    // Bounded view so a short chunk cannot leak into the next one
    let mut payload = SubSource::new(&mut *src, chunk.size);
    match &chunk.id {
        b"VP8 " => {
            let data = payload.read_vec(vp8::KEY_FRAME_HEADER_SIZE)?;
            let (width, height) = vp8::parse_key_frame(&data)?;
            info.set(Field::Codec, "vp8");
            info.set_dimensions(width, height);
        }
        b"VP8L" => {
            let data = payload.read_vec(5)?;
            let (width, height) = vp8::parse_vp8l_header(&data)?;
            info.set(Field::Codec, "webp-lossless");
            info.set_dimensions(width, height);
        }
        b"VP8X" => {
            let data = payload.read_exact_vec(10, "webp VP8X chunk")?;
            info.set(Field::Subformat, "extended");
            info.set_dimensions(read_u24_plus_one(&data[4..7]), read_u24_plus_one(&data[7..10]));
        }
        other => {
            warn!(id = %String::from_utf8_lossy(other), "unknown first webp chunk");
            return Err(Error::bad("webp image chunk not found"));
        }
    }
    Ok(())
}

/// Data bytes of the sectors in a CDXA `data` chunk
///
/// Sectors whose data is all zeros are left out.
struct SectorSource<S: ByteSource> {
    inner: S,
    sector: Vec<u8>,
    pos: usize,
    consumed: u64,
    sectors: usize,
    at_end: bool,
}

impl<S: ByteSource> SectorSource<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            sector: Vec::new(),
            pos: 0,
            consumed: 0,
            sectors: 0,
            at_end: false,
        }
    }

    /// Loads the next non-empty sector, returning `false` at the end
    fn next_sector(&mut self) -> Result<bool> {
        while !self.at_end {
            if self.sectors == MAX_CDXA_SECTORS {
                warn!(max = MAX_CDXA_SECTORS, "mpeg-cdxa sector limit reached");
                self.at_end = true;
                break;
            }
            let offset = self.inner.position();
            let header = self.inner.read_vec(SECTOR_HEADER_SIZE)?;
            if header.len() < SECTOR_HEADER_SIZE {
                self.at_end = true;
                break;
            }
            if header[..SECTOR_SYNC.len()] != SECTOR_SYNC {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: "mpeg-cdxa sector sync not found".into(),
                });
            }
            let data = self.inner.read_vec(SECTOR_DATA_SIZE)?;
            if data.len() < SECTOR_DATA_SIZE || !self.inner.skip(SECTOR_EDC_SIZE)? {
                self.at_end = true;
            }
            self.sectors += 1;
            if data.iter().any(|&b| b != 0) {
                trace!(offset, size = data.len(), "mpeg-cdxa sector");
                self.sector = data;
                self.pos = 0;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<S: ByteSource> ByteSource for SectorSource<S> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos == self.sector.len() && !self.next_sector()? {
                break;
            }
            let n = (buf.len() - filled).min(self.sector.len() - self.pos);
            buf[filled..filled + n].copy_from_slice(&self.sector[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        self.consumed += filled as u64;
        Ok(filled)
    }

    fn skip(&mut self, n: u64) -> Result<bool> {
        let mut left = n;
        while left > 0 {
            if self.pos == self.sector.len() && !self.next_sector()? {
                return Ok(false);
            }
            let step = left.min((self.sector.len() - self.pos) as u64);
            self.pos += step as usize;
            self.consumed += step;
            left -= step;
        }
        Ok(true)
    }

    fn position(&self) -> u64 {
        self.consumed
    }
}

/// Analyzes a Video CD file by walking the MPEG program stream carried in
/// the raw sectors of its `data` chunk
pub fn analyze_cdxa(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let (form, _) = read_riff_header(src, "mpeg-cdxa")?;
    if &form != b"CDXA" {
        return Err(Error::bad("mpeg-cdxa signature not found"));
    }
    info.set_format("mpeg-cdxa");
    while let Some(chunk) = read_chunk(src, "mpeg-cdxa chunk header")? {
        if &chunk.id == b"data" {
            return mpegps::analyze(&mut SectorSource::new(&mut *src), info);
        }
        if !src.skip(chunk.size)? {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{info::TrackKind, source::SliceSource, test_utils::riff_chunk};

    fn run(analyze: crate::format_db::AnalyzeFn, data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    fn list(kind: &[u8; 4], children: &[u8]) -> Vec<u8> {
        let mut body = kind.to_vec();
        body.extend_from_slice(children);
        riff_chunk(b"LIST", &body)
    }

    fn riff(form: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut payload = form.to_vec();
        payload.extend_from_slice(body);
        riff_chunk(b"RIFF", &payload)
    }

    fn video_strl() -> Vec<u8> {
        let mut strh = b"vidsXVID".to_vec();
        strh.extend_from_slice(&[0; 48]);
        // BITMAPINFOHEADER: size, width, height, planes, bit count, compression
        let mut strf = 40u32.to_le_bytes().to_vec();
        strf.extend_from_slice(&640u32.to_le_bytes());
        strf.extend_from_slice(&480u32.to_le_bytes());
        strf.extend_from_slice(&[1, 0, 24, 0]);
        strf.extend_from_slice(b"XVID");
        strf.extend_from_slice(&[0; 20]);
        let mut children = riff_chunk(b"strh", &strh);
        children.extend(riff_chunk(b"strf", &strf));
        list(b"strl", &children)
    }

    fn audio_strl() -> Vec<u8> {
        let mut strh = b"auds\0\0\0\0".to_vec();
        strh.extend_from_slice(&[0; 48]);
        // WAVEFORMATEX: tag, channels, rate, bytes/s, align, bits
        let mut strf = vec![0x55, 0, 2, 0];
        strf.extend_from_slice(&44100u32.to_le_bytes());
        strf.extend_from_slice(&16000u32.to_le_bytes());
        strf.extend_from_slice(&[1, 0, 0, 0, 0, 0]);
        let mut children = riff_chunk(b"strh", &strh);
        children.extend(riff_chunk(b"strf", &strf));
        list(b"strl", &children)
    }

    #[test]
    fn test_avi_tracks() {
        let mut hdrl = riff_chunk(b"avih", &[0; 56]);
        hdrl.extend(video_strl());
        hdrl.extend(audio_strl());
        let mut body = list(b"hdrl", &hdrl);
        body.extend(list(b"movi", &[0; 16]));
        let (result, info) = run(analyze_avi, &riff(b"AVI ", &body));
        result.unwrap();
        assert_eq!(info.format(), Some("avi"));
        assert_eq!(info.tracks.len(), 2);
        assert_eq!(info.tracks[0].codec, "divx");
        assert_eq!((info.tracks[0].width, info.tracks[0].height), (Some(640), Some(480)));
        assert_eq!(info.tracks[1].kind, TrackKind::Audio);
        assert_eq!(info.tracks[1].codec, "mp3");
        assert_eq!(info.tracks[1].sample_rate, Some(44100));
        assert_eq!(info.tracks[1].sample_size, Some(16));
    }

    #[test]
    fn test_avi_signature_only() {
        let (result, info) = run(analyze_avi, b"RIFF????AVI ");
        result.unwrap();
        assert_eq!(info.format(), Some("avi"));
        assert!(info.tracks.is_empty());
    }

    #[test]
    fn test_avi_errors() {
        // Index before the header list
        let body = riff_chunk(b"idx1", &[0; 16]);
        assert!(matches!(run(analyze_avi, &riff(b"AVI ", &body)).0, Err(Error::InvalidFormat(_))));

        // Duplicate strh
        let mut strl = riff_chunk(b"strh", b"vids\0\0\0\0");
        strl.extend(riff_chunk(b"strh", b"vids\0\0\0\0"));
        let body = list(b"hdrl", &list(b"strl", &strl));
        let err = run(analyze_avi, &riff(b"AVI ", &body)).0.unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        // Video dimensions out of range
        let mut bad = video_strl();
        let at = bad.len() - 40 + 4;
        bad[at..at + 4].copy_from_slice(&70000u32.to_le_bytes());
        let body = list(b"hdrl", &bad);
        assert!(run(analyze_avi, &riff(b"AVI ", &body)).0.is_err());
    }

    #[test]
    fn test_wav() {
        let riff_hdr = b"RIFF\x44\xc2\x01\x00WAVE";
        let pcm = b"fmt \x12\0\0\0\x01\0\x01\0\x11\x2b\0\0\x22\x56\0\0\x02\0\x10\0";
        let mp3 = b"fmt \x1e\0\0\0\x55\0\x01\0\x40\x1f\0\0\xd0\x07\0\0 \x01\0\0\0";
        let bext = b"bext\x05\0\0\0??????";

        let (result, info) = run(analyze_wav, &[&riff_hdr[..], pcm].concat());
        result.unwrap();
        assert_eq!(info.tracks[0].codec, "pcm");
        assert_eq!(info.tracks[0].sample_rate, Some(11025));
        assert_eq!(info.tracks[0].channel_count, Some(1));

        let (result, info) = run(analyze_wav, &[&riff_hdr[..], bext, bext, mp3].concat());
        result.unwrap();
        assert_eq!(info.tracks[0].codec, "mp3");
        assert_eq!(info.tracks[0].sample_rate, Some(8000));
        assert_eq!(info.tracks[0].sample_size, Some(16));

        let (result, info) = run(analyze_wav, &[&riff_hdr[..], bext].concat());
        result.unwrap();
        assert!(info.tracks.is_empty());
    }

    #[test]
    fn test_rmp3() {
        let riff_hdr = b"RIFF\x44\xc2\x01\x00RMP3";
        let mp3 = b"fmt \x1e\0\0\0\x55\0\x01\0\x40\x1f\0\0\xd0\x07\0\0 \x01\0\0\0";
        let bext = b"bext\x05\0\0\0??????";
        // Odd size, padded to 256
        let mut long_bext = b"bext\xff\0\0\0".to_vec();
        long_bext.resize(long_bext.len() + 256, b'?');

        let data = [&riff_hdr[..], bext, bext, long_bext.as_slice(), mp3].concat();
        let (result, info) = run(analyze_wav, &data);
        result.unwrap();
        assert_eq!(info.format(), Some("wav"));
        let track = &info.tracks[0];
        assert_eq!(track.codec, "mp3");
        assert_eq!(track.channel_count, Some(1));
        assert_eq!(track.sample_rate, Some(8000));
        assert_eq!(track.sample_size, Some(16));

        let (result, info) = run(analyze_wav, b"RIFF\x44\xc2\x01\x00RMP4");
        assert!(result.is_err());
        assert_eq!(info.format(), None);
    }

    #[test]
    fn test_wave_format_extensible() {
        let mut fmt = vec![0xfe, 0xff, 6, 0];
        fmt.extend_from_slice(&48000u32.to_le_bytes());
        fmt.extend_from_slice(&[0, 0, 0, 0, 12, 0, 16, 0, 22, 0, 16, 0, 0x3f, 0, 0, 0]);
        // KSDATAFORMAT_SUBTYPE_PCM
        fmt.extend_from_slice(&super::super::guid("00000001-0000-0010-8000-00aa00389b71"));
        let track = parse_wave_format(&fmt).unwrap();
        assert_eq!(track.codec, "pcm");
        assert_eq!(track.channel_count, Some(6));
    }

    #[test]
    fn test_webp() {
        let (result, info) = run(
            analyze_webp,
            b"RIFF\x68\x76\0\0WEBPVP8 \x5c\x76\0\0\xd2\xbe\x01\x9d\x01\x2a\x26\x02\x70\x01",
        );
        result.unwrap();
        assert_eq!(info.codec(), Some("vp8"));
        assert_eq!((info.width(), info.height()), (Some(550), Some(368)));

        let (result, info) =
            run(analyze_webp, b"RIFF\x7c\x3e\0\0WEBPVP8X\x0a\0\0\0\x18\0\0\0\x02\x02\0\0\x02\0");
        result.unwrap();
        assert_eq!(info.subformat(), Some("extended"));
        assert_eq!((info.width(), info.height()), (Some(515), Some(513)));

        let (result, info) = run(
            analyze_webp,
            b"RIFF\x0e\x6c\0\0WEBPVP8L\x02\x6c\0\0\x2f\x81\x81\x62\x10\x78",
        );
        result.unwrap();
        assert_eq!(info.codec(), Some("webp-lossless"));
        assert_eq!((info.width(), info.height()), (Some(386), Some(395)));
    }

    const CDXA_HEADER: &[u8] = b"RIFF\xc4\x9d\x0b\x02CDXAfmt \x10\0\0\0\0\0\0\0\x11\x11\x58\x41\x02\0\0\0\0\0\0\x00data\xa0\x9d\x0b\x02";
    const SECTOR_HEADER: &[u8] = b"\0\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\0\x03\x40\x46\x02\x02\0\x60\0\x02\0\x60\x00";
    const PACK_HEADER: &[u8] = b"\0\0\x01\xba\x21\0\x01\x1c\x21\x80\x1b\x91";
    const AUDIO_PES: &[u8] = b"\0\0\x01\xc0\0\x0b\x40\x20\x21\0\x01\xce\x41\xff\xfd\xb0\x84";

    /// MPEG-1 video PES with a 352x240 sequence header after zero padding
    fn video_pes() -> Vec<u8> {
        let mut pes = b"\0\0\x01\xe0\x00\x5e\x60\x2e\x31\0\x01\xfd\x2d\x11\0\x01\xb6\xcb".to_vec();
        pes.resize(pes.len() + 66, 0);
        pes.extend_from_slice(b"\0\0\x01\xb3\x16\0\xf0\xc4\x02\xcf\x60\xa4\0\0\x01\xb8");
        pes
    }

    fn null_sector() -> Vec<u8> {
        let mut sector = SECTOR_HEADER.to_vec();
        sector.resize(SECTOR_HEADER_SIZE + SECTOR_DATA_SIZE, 0);
        sector.extend_from_slice(b"????");
        sector
    }

    #[test]
    fn test_cdxa_without_payload() {
        let cases = [
            CDXA_HEADER[..20].to_vec(),
            CDXA_HEADER[..CDXA_HEADER.len() - 8].to_vec(),
            CDXA_HEADER.to_vec(),
            [CDXA_HEADER, SECTOR_HEADER].concat(),
            [CDXA_HEADER, SECTOR_HEADER, b"\0\0\x01\xba"].concat(),
        ];
        for data in &cases {
            let (result, info) = run(analyze_cdxa, data);
            result.unwrap();
            assert_eq!(info.format(), Some("mpeg-cdxa"));
            assert!(info.tracks.is_empty());
        }
    }

    #[test]
    fn test_cdxa_video() {
        let data = [CDXA_HEADER, SECTOR_HEADER, PACK_HEADER, video_pes().as_slice()].concat();
        let (result, info) = run(analyze_cdxa, &data);
        result.unwrap();
        assert_eq!(info.subformat(), Some("mpeg-1"));
        assert_eq!(info.tracks.len(), 1);
        assert_eq!(info.tracks[0].codec, "mpeg-1");
        assert_eq!((info.tracks[0].width, info.tracks[0].height), (Some(352), Some(240)));
    }

    #[test]
    fn test_cdxa_skips_null_sectors() {
        let data = [
            CDXA_HEADER,
            null_sector().as_slice(),
            null_sector().as_slice(),
            SECTOR_HEADER,
            PACK_HEADER,
            video_pes().as_slice(),
            AUDIO_PES,
        ]
        .concat();
        let (result, info) = run(analyze_cdxa, &data);
        result.unwrap();
        assert_eq!(info.format(), Some("mpeg-cdxa"));
        assert_eq!(info.subformat(), Some("mpeg-1"));
        assert_eq!(info.tracks.len(), 2);
        assert_eq!(info.tracks[0].codec, "mpeg-1");
        let audio = &info.tracks[1];
        assert_eq!(audio.codec, "mp2");
        assert_eq!(audio.sample_rate, Some(44100));
        assert_eq!(audio.channel_count, Some(2));
    }

    #[test]
    fn test_cdxa_lost_sector_sync() {
        let mut sector = null_sector();
        sector[1] = 0;
        let data = [CDXA_HEADER, sector.as_slice()].concat();
        let (result, info) = run(analyze_cdxa, &data);
        assert!(matches!(result, Err(Error::InvalidSegment { offset: 44, .. })));
        assert_eq!(info.format(), Some("mpeg-cdxa"));
    }
}
