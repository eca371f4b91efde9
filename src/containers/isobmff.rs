//! ISO base media file format walker (MP4, MOV, F4V, JPEG 2000, HEIF, AVIF)
//!
//! Only the boxes on the path to track descriptions are entered:
//! `moov/trak/mdia/minf/stbl/stsd` for movies, `jp2h/ihdr` for JPEG 2000 and
//! the top-level `meta` box for HEIF image items. The walk ends after `moov`
//! or `jp2h`, so media data after them is never read.
//!
//! Reference: ISO/IEC 14496-12, ISO/IEC 23008-12 (HEIF)

use super::fourcc_lower;
use crate::{
    error::{Error, Result},
    info::{Field, Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};
use std::borrow::Cow;
use tracing::{trace, warn};

const HEADER_SIZE: u64 = 8; // 4 byte size + 4 byte type
const HEADER_SIZE_LARGE: u64 = 16; // 4 byte size + 4 byte type + 8 byte large size

/// Leaf boxes larger than this are skipped instead of read
pub const MAX_BOX_READ: u64 = 16383;

/// Largest top-level `meta` box read for HEIF item properties
pub const MAX_META_SIZE: u64 = 1 << 20;

/// Deepest box nesting entered
const MAX_DEPTH: usize = 8;

/// Box type enum for the boxes the walker acts on
macro_rules! boxtype {
    ($( $name:ident => $value:expr ),* $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum BoxType {
            $( $name, )*
            Other(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> BoxType {
                match t {
                    $( $value => BoxType::$name, )*
                    _ => BoxType::Other(t),
                }
            }
        }
    }
}

boxtype! {
    Ftyp => 0x6674_7970,
    Moov => 0x6d6f_6f76,
    Trak => 0x7472_616b,
    Mdia => 0x6d64_6961,
    Minf => 0x6d69_6e66,
    Stbl => 0x7374_626c,
    Hdlr => 0x6864_6c72,
    Stsd => 0x7374_7364,
    Mdat => 0x6d64_6174,
    Free => 0x6672_6565,
    Skip => 0x736b_6970,
    Wide => 0x7769_6465,
    Jp2h => 0x6a70_3268,
    Ihdr => 0x6968_6472,
    Meta => 0x6d65_7461,
}

/// Whether a box of type `kind` under `parent` is entered
fn is_composite(parent: Option<BoxType>, kind: BoxType) -> bool {
    matches!(
        (parent, kind),
        (None, BoxType::Moov)
            | (None, BoxType::Jp2h)
            | (Some(BoxType::Moov), BoxType::Trak)
            | (Some(BoxType::Trak), BoxType::Mdia)
            | (Some(BoxType::Mdia), BoxType::Minf)
            | (Some(BoxType::Minf), BoxType::Stbl)
    )
}

// Keys are lowercased with spaces trimmed.
const MP4_VIDEO_CODECS: &[(&str, &str)] = &[
    ("avc1", "h264"),
    ("h264", "h264"),
    ("mp4v", "divx5"),
    ("mp4s", "divx5"),
    ("rv60", "rv6"),
    ("s263", "h263"),
    ("mjp2", "mjpeg2000"),
    ("mjpa", "mjpeg"),
    ("mjpb", "mjpeg"),
    ("mjpg", "mjpeg"),
    ("svq1", "sorenson1"),
    ("svq3", "sorenson3"),
    ("mpgv", "mpeg2"),
    ("div1", "divx"),
    ("divx", "divx"),
    ("xvid", "divx"),
    ("dx50", "divx5"),
    ("fmp4", "divx5"),
    ("dvav", "h264"),
    ("dvhc", "h265"),
    ("hev1", "h265"),
    ("hvc1", "h265"),
    ("av01", "av1"),
    ("vc-1", "vc1"),
    ("vp03", "vp3"),
    ("vp04", "vp4"),
    ("vp05", "vp5"),
    ("vp06", "vp6"),
    ("vp07", "vp7"),
    ("vp08", "vp8"),
    ("vp09", "vp9"),
    ("vp10", "vp10"),
    ("vp11", "vp11"),
];

const MP4_AUDIO_CODECS: &[(&str, &str)] = &[
    ("raw", "pcm"),
    ("sowt", "pcm"),
    ("twos", "pcm"),
    ("in24", "pcm"),
    ("in32", "pcm"),
    ("fl32", "pcm"),
    ("fl64", "pcm"),
    ("alaw", "alaw"),
    ("ulaw", "mulaw"),
    (".mp3", "mp3"),
    ("mp4a", "mp4a"),
    ("mp4s", "mp4a"),
    ("samr", "samr"),
    ("mpga", "mp2"),
    ("sawb", "sawb"),
    ("dts+", "dts"),
    ("dts-", "dts"),
    ("dtsc", "dts"),
    ("dtse", "dts"),
    ("dtsh", "dts"),
    ("dtsl", "dts"),
    ("dtsx", "dts"),
];

const JP2_CODECS: [&str; 9] = [
    "raw", "huffman2", "read2", "read3", "jbig", "jpeg", "jpegls", "jpeg2000", "jbig2",
];

fn lookup(table: &[(&str, &str)], key: String) -> String {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(key, |(_, v)| v.to_string())
}

/// Box header as read from the stream
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub fourcc: [u8; 4],
    pub kind: BoxType,
    /// Payload size, header excluded
    pub body_size: u64,
    /// Bytes taken by the header itself, 8 or 16 with a 64-bit size
    pub header_len: u64,
}

impl BoxHeader {
    /// Reads a box header, or `None` at a clean end of the stream
    ///
    /// `room` is the number of bytes left in the parent box, if any.
    pub fn read(src: &mut dyn ByteSource, room: Option<u64>) -> Result<Option<Self>> {
        let offset = src.position();
        if room.is_some_and(|r| r < HEADER_SIZE) {
            return Err(Error::InvalidSegment {
                offset,
                reason: "no room for box header".into(),
            });
        }
        let buf = src.read_vec(HEADER_SIZE as usize)?;
        if buf.is_empty() && room.is_none() {
            return Ok(None);
        }
        if buf.len() < HEADER_SIZE as usize {
            return Err(Error::truncated("mp4 box header"));
        }
        let size = BigEndian::read_u32(&buf[0..4]) as u64;
        let fourcc = [buf[4], buf[5], buf[6], buf[7]];
        let body_size = match size {
            1 => {
                let large = BigEndian::read_u64(&src.read_array::<8>("mp4 64-bit box size")?);
                if large < HEADER_SIZE_LARGE {
                    return Err(Error::InvalidSegment {
                        offset,
                        reason: format!("64-bit box size too small: {large}"),
                    });
                }
                large - HEADER_SIZE_LARGE
            }
            // Size 0 (box extends to end of file) is not accepted; track
            // parameters must come before the end.
            s if s >= HEADER_SIZE => s - HEADER_SIZE,
            s => {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: format!(
                        "box size too small for {}: {s}",
                        String::from_utf8_lossy(&fourcc)
                    ),
                });
            }
        };
        let header_len = if size == 1 { HEADER_SIZE_LARGE } else { HEADER_SIZE };
        if let Some(room) = room {
            if body_size + header_len > room {
                return Err(Error::InvalidSegment {
                    offset,
                    reason: format!("box larger than its parent: {}", body_size + header_len),
                });
            }
        }
        Ok(Some(BoxHeader {
            fourcc,
            kind: BoxType::from(u32::from_be_bytes(fourcc)),
            body_size,
            header_len,
        }))
    }

    fn total_size(&self) -> u64 {
        self.header_len + self.body_size
    }
}

/// Iterator over the boxes packed in an in-memory buffer
struct SliceBoxes<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for SliceBoxes<'a> {
    type Item = Result<([u8; 4], &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.len() < HEADER_SIZE as usize {
            self.data = &[];
            return Some(Err(Error::truncated("mp4 box header")));
        }
        let size = BigEndian::read_u32(&self.data[0..4]) as usize;
        let fourcc = [self.data[4], self.data[5], self.data[6], self.data[7]];
        if size < HEADER_SIZE as usize || size > self.data.len() {
            self.data = &[];
            return Some(Err(Error::bad(format!(
                "bad size for {} box: {size}",
                String::from_utf8_lossy(&fourcc)
            ))));
        }
        let body = &self.data[HEADER_SIZE as usize..size];
        self.data = &self.data[size..];
        Some(Ok((fourcc, body)))
    }
}

fn slice_boxes(data: &[u8]) -> SliceBoxes<'_> {
    SliceBoxes { data }
}

/// Primary image item of a HEIF file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryItem {
    pub item_type: [u8; 4],
    pub width: Option<u32>,
    pub height: Option<u32>,
}

fn full_box_body<'a>(body: &'a [u8], what: &str) -> Result<(u8, u32, &'a [u8])> {
    if body.len() < 4 {
        return Err(Error::truncated(what));
    }
    let flags = BigEndian::read_u24(&body[1..4]);
    Ok((body[0], flags, &body[4..]))
}

/// Finds the primary item type and its `ispe` dimensions in a `meta` body
pub fn parse_meta(meta: &[u8]) -> Result<Option<PrimaryItem>> {
    let (_, _, children) = full_box_body(meta, "mp4 meta")?;
    let mut primary_id = None;
    let mut item_types: Vec<(u32, [u8; 4])> = Vec::new();
    // ispe dimensions by 1-based property index
    let mut extents: Vec<Option<(u32, u32)>> = Vec::new();
    let mut associations: Vec<(u32, Vec<u16>)> = Vec::new();

    for entry in slice_boxes(children) {
        let (fourcc, body) = entry?;
        match &fourcc {
            b"pitm" => {
                let (version, _, rest) = full_box_body(body, "mp4 pitm")?;
                primary_id = Some(read_id(rest, version == 0, "mp4 pitm")?);
            }
            b"iinf" => item_types = parse_iinf(body)?,
            b"iprp" => {
                for entry in slice_boxes(body) {
                    let (fourcc, body) = entry?;
                    match &fourcc {
                        b"ipco" => extents = parse_ipco(body)?,
                        b"ipma" => associations.extend(parse_ipma(body)?),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    let Some(primary_id) = primary_id else {
        return Ok(None);
    };
    let Some(&(_, item_type)) = item_types.iter().find(|(id, _)| *id == primary_id) else {
        return Err(Error::bad(format!("primary item {primary_id} not in iinf")));
    };
    let extent = associations
        .iter()
        .filter(|(id, _)| *id == primary_id)
        .flat_map(|(_, props)| props.iter())
        .find_map(|&index| extents.get((index as usize).checked_sub(1)?).copied().flatten());
    Ok(Some(PrimaryItem {
        item_type,
        width: extent.map(|e| e.0),
        height: extent.map(|e| e.1),
    }))
}

fn read_id(data: &[u8], short: bool, what: &str) -> Result<u32> {
    match (short, data) {
        (true, [a, b, ..]) => Ok(u16::from_be_bytes([*a, *b]) as u32),
        (false, [a, b, c, d, ..]) => Ok(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => Err(Error::truncated(what)),
    }
}

fn parse_iinf(body: &[u8]) -> Result<Vec<(u32, [u8; 4])>> {
    let (version, _, rest) = full_box_body(body, "mp4 iinf")?;
    let count_size = if version == 0 { 2 } else { 4 };
    let count = read_id(rest, version == 0, "mp4 iinf")?;
    let mut items = Vec::new();
    for entry in slice_boxes(rest.get(count_size..).unwrap_or(&[])).take(count as usize) {
        let (fourcc, body) = entry?;
        if &fourcc != b"infe" {
            continue;
        }
        let (version, _, rest) = full_box_body(body, "mp4 infe")?;
        if version < 2 {
            // Version 0 and 1 entries carry no item type.
            continue;
        }
        let id_size = if version == 2 { 2 } else { 4 };
        let id = read_id(rest, version == 2, "mp4 infe")?;
        // item_ID, item_protection_index, item_type
        let Some(item_type) = rest.get(id_size + 2..id_size + 6) else {
            return Err(Error::truncated("mp4 infe"));
        };
        items.push((id, [item_type[0], item_type[1], item_type[2], item_type[3]]));
    }
    Ok(items)
}

fn parse_ipco(body: &[u8]) -> Result<Vec<Option<(u32, u32)>>> {
    let mut extents = Vec::new();
    for entry in slice_boxes(body) {
        let (fourcc, body) = entry?;
        let extent = if &fourcc == b"ispe" {
            let (_, _, rest) = full_box_body(body, "mp4 ispe")?;
            if rest.len() < 8 {
                return Err(Error::truncated("mp4 ispe"));
            }
            Some((BigEndian::read_u32(&rest[0..4]), BigEndian::read_u32(&rest[4..8])))
        } else {
            None
        };
        extents.push(extent);
    }
    Ok(extents)
}

fn parse_ipma(body: &[u8]) -> Result<Vec<(u32, Vec<u16>)>> {
    let (version, flags, rest) = full_box_body(body, "mp4 ipma")?;
    let truncated = || Error::truncated("mp4 ipma");
    let count = read_id(rest, false, "mp4 ipma")?;
    let mut pos = 4;
    let id_size = if version < 1 { 2 } else { 4 };
    let mut out = Vec::new();
    for _ in 0..count {
        let id = read_id(rest.get(pos..).ok_or_else(truncated)?, version < 1, "mp4 ipma")?;
        pos += id_size;
        let n = *rest.get(pos).ok_or_else(truncated)? as usize;
        pos += 1;
        let mut props = Vec::with_capacity(n);
        for _ in 0..n {
            if flags & 1 != 0 {
                let v = rest.get(pos..pos + 2).ok_or_else(truncated)?;
                props.push(BigEndian::read_u16(v) & 0x7fff);
                pos += 2;
            } else {
                props.push((*rest.get(pos).ok_or_else(truncated)? & 0x7f) as u16);
                pos += 1;
            }
        }
        out.push((id, props));
    }
    Ok(out)
}

/// Walk state across boxes
#[derive(Default)]
struct Walker {
    /// Handler type of the current track
    hdlr: Option<[u8; 4]>,
    saw_stsd: bool,
    saw_moov: bool,
    primary: Option<PrimaryItem>,
}

impl Walker {
    fn process_box(
        &mut self,
        src: &mut dyn ByteSource,
        info: &mut Info,
        path: &mut Vec<BoxType>,
        header: BoxHeader,
    ) -> Result<()> {
        let parent = path.last().copied();
        trace!(
            fourcc = %String::from_utf8_lossy(&header.fourcc),
            size = header.body_size,
            depth = path.len(),
            "mp4 box"
        );
        if parent.is_none() && header.kind == BoxType::Mdat {
            info.set(Field::HasEarlyMdat, true);
        }
        if is_composite(parent, header.kind) && path.len() < MAX_DEPTH {
            if header.kind == BoxType::Trak {
                self.hdlr = None;
                self.saw_stsd = false;
            }
            path.push(header.kind);
            let mut room = header.body_size;
            while room > 0 {
                let Some(child) = BoxHeader::read(src, Some(room))? else {
                    break;
                };
                room -= child.total_size();
                self.process_box(src, info, path, child)?;
            }
            path.pop();
            if header.kind == BoxType::Trak {
                self.finish_track(info);
            }
            return Ok(());
        }
        if parent.is_none() && header.kind == BoxType::Meta {
            if header.body_size > MAX_META_SIZE {
                warn!(size = header.body_size, "mp4 meta box too large, skipping");
                return src.skip_exact(header.body_size, "mp4 meta box");
            }
            let data = src.read_exact_vec(header.body_size as usize, "mp4 meta box")?;
            self.primary = parse_meta(&data)?;
            return Ok(());
        }
        if header.body_size > MAX_BOX_READ
            || matches!(header.kind, BoxType::Free | BoxType::Skip | BoxType::Wide)
        {
            return src.skip_exact(header.body_size, "mp4 box");
        }
        let data = src.read_exact_vec(header.body_size as usize, "mp4 box")?;
        match (parent, header.kind) {
            (None, BoxType::Ftyp) => parse_ftyp(&data, info),
            (Some(BoxType::Jp2h), BoxType::Ihdr) => parse_jp2_ihdr(&data, info),
            (Some(BoxType::Mdia), BoxType::Hdlr) => {
                let Some(kind) = data.get(8..12) else {
                    return Err(Error::truncated("mp4 hdlr"));
                };
                self.hdlr = Some([kind[0], kind[1], kind[2], kind[3]]);
                Ok(())
            }
            (Some(BoxType::Stbl), BoxType::Stsd) => self.parse_stsd(&data, info),
            _ => Ok(()),
        }
    }

    /// Reports a track whose handler was found without a sample description
    fn finish_track(&mut self, info: &mut Info) {
        if !self.saw_stsd {
            match self.hdlr.as_ref() {
                Some(b"vide") => {
                    info.add_track(Track::video("?"));
                }
                Some(b"soun") => {
                    info.add_track(Track::audio("?"));
                }
                _ => {}
            }
        }
        self.hdlr = None;
        self.saw_stsd = false;
    }

    fn parse_stsd(&mut self, data: &[u8], info: &mut Info) -> Result<()> {
        let Some(hdlr) = self.hdlr else {
            return Err(Error::bad("mp4 stsd without a hdlr first"));
        };
        if data.len() < 8 {
            return Err(Error::truncated("mp4 stsd"));
        }
        if BigEndian::read_u32(&data[0..4]) != 0 {
            return Err(Error::bad("bad mp4 stsd version and flags"));
        }
        let mut count = BigEndian::read_u32(&data[4..8]);
        let mut i = 8;
        while i < data.len() {
            if data.len() - i < 8 {
                return Err(Error::truncated("mp4 stsd entry header"));
            }
            if count == 0 {
                return Err(Error::bad("too many mp4 stsd entries"));
            }
            let size = BigEndian::read_u32(&data[i..i + 4]) as usize;
            if size < 8 || size > data.len() - i {
                return Err(Error::bad(format!("bad mp4 stsd entry size: {size}")));
            }
            let codec = fourcc_lower(&data[i + 4..i + 8]);
            let item = &data[i + 8..i + size];
            self.saw_stsd = true;
            match &hdlr {
                b"vide" => {
                    if item.len() < 28 {
                        return Err(Error::bad("mp4 video stsd entry too short"));
                    }
                    let width = BigEndian::read_u16(&item[24..26]) as u32;
                    let height = BigEndian::read_u16(&item[26..28]) as u32;
                    // Some movies carry a tiny placeholder rle track.
                    if !(codec == "rle" && (width < 16 || height < 16)) {
                        let mut track = Track::video(lookup(MP4_VIDEO_CODECS, codec));
                        track.set_dimensions(width, height)?;
                        info.add_track(track);
                    }
                }
                b"soun" => {
                    if item.len() < 28 {
                        return Err(Error::bad("mp4 audio stsd entry too short"));
                    }
                    let mut track = Track::audio(lookup(MP4_AUDIO_CODECS, codec));
                    track.channel_count = Some(BigEndian::read_u16(&item[16..18]) as u32);
                    track.sample_size = Some(BigEndian::read_u16(&item[18..20]) as u32);
                    // 16.16 fixed point; the fraction is dropped
                    track.sample_rate = Some(BigEndian::read_u16(&item[24..26]) as u32);
                    info.add_track(track);
                }
                _ => {}
            }
            i += size;
            count -= 1;
        }
        if count != 0 {
            return Err(Error::bad("missing mp4 stsd entries"));
        }
        Ok(())
    }
}

fn parse_ftyp(data: &[u8], info: &mut Info) -> Result<()> {
    if data.len() < 8 {
        return Err(Error::truncated("mp4 ftyp"));
    }
    let major = &data[0..4];
    info.set(Field::MinorVersion, BigEndian::read_u32(&data[4..8]));
    let format = match major {
        b"qt  " => "mov",
        b"f4v " => "f4v",
        b"jp2 " | b"jpm " | b"jpx " => "jp2",
        _ => "mp4",
    };
    info.set_format(format);
    info.set(Field::Subformat, String::from_utf8_lossy(major).trim().to_string());
    let mut brands: Vec<String> = data[8..]
        .chunks_exact(4)
        .chain(std::iter::once(major))
        .filter(|b| *b != b"\0\0\0\0")
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .collect();
    brands.sort();
    brands.dedup();
    info.set(Field::Brands, brands);
    Ok(())
}

fn parse_jp2_ihdr(data: &[u8], info: &mut Info) -> Result<()> {
    if data.len() < 12 {
        return Err(Error::truncated("jp2 ihdr"));
    }
    let height = BigEndian::read_u32(&data[0..4]);
    let width = BigEndian::read_u32(&data[4..8]);
    info.set_dimensions(width, height);
    info.set(
        Field::Other(Cow::Borrowed("component_count")),
        BigEndian::read_u16(&data[8..10]),
    );
    info.set(Field::Other(Cow::Borrowed("bpc")), data[10]);
    let codec = data[11] as usize;
    info.set(
        Field::Codec,
        JP2_CODECS.get(codec).map_or_else(|| codec.to_string(), |c| c.to_string()),
    );
    Ok(())
}

/// Sets format, codec and dimensions from a HEIF primary item
fn report_primary_item(item: &PrimaryItem, info: &mut Info) {
    let (subformat, codec) = match &item.item_type {
        b"hvc1" => ("heif", "h265".to_string()),
        b"av01" => ("avif", "av1".to_string()),
        other => ("heif", fourcc_lower(other)),
    };
    info.set_format("isobmff-image");
    info.set(Field::Subformat, subformat);
    info.set(Field::Codec, codec);
    if let (Some(width), Some(height)) = (item.width, item.height) {
        info.set_dimensions(width, height);
    }
}

/// Analyzes an ISO-BMFF file
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set_format("mov");
    info.set(Field::Brands, Vec::<String>::new());
    info.set(Field::HasEarlyMdat, false);
    let mut walker = Walker::default();
    let mut path = Vec::new();
    let mut top_level = Vec::new();
    loop {
        let Some(header) = BoxHeader::read(src, None)? else {
            break;
        };
        top_level.push(header.kind);
        walker.process_box(src, info, &mut path, header)?;
        match header.kind {
            BoxType::Moov => {
                walker.saw_moov = true;
                break;
            }
            BoxType::Jp2h => return Ok(()),
            _ => {}
        }
    }
    if walker.saw_moov {
        return Ok(());
    }
    if let Some(item) = &walker.primary {
        report_primary_item(item, info);
        return Ok(());
    }
    top_level.retain(|k| !matches!(k, BoxType::Free | BoxType::Skip | BoxType::Wide));
    if !top_level.is_empty() && top_level.iter().all(|k| *k == BoxType::Mdat) {
        return Err(Error::bad("mov file with only an mdat box"));
    }
    Err(Error::bad("mp4 moov box not found"))
}
