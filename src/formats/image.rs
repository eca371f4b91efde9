//! Header readers for small image formats: BMP, FLIC, PNM, BRN and PSD

use crate::{
    bits::read_base128,
    error::{Error, Result},
    info::{Field, Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

/// File header, info header size and the 16-bit dimensions of a core header
const BMP_CORE_HEADER_END: usize = 22;

/// Info header bytes after the core part, up to the compression field
const BMP_INFO_HEADER_REST: usize = 12;

fn bmp_codec(compression: u32) -> String {
    match compression {
        0 => "uncompressed".into(),
        1 | 2 => "rle".into(),
        3 => "bitfields".into(),
        4 => "jpeg".into(),
        5 => "png".into(),
        other => other.to_string(),
    }
}

/// Analyzes a Windows bitmap
///
/// OS/2 core headers (12 and 26 bytes) store 16-bit dimensions, the
/// Windows info headers store signed 32-bit ones (negative height means
/// top-down rows). A file cut short inside the info header keeps only the
/// format.
pub fn analyze_bmp(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_exact_vec(BMP_CORE_HEADER_END, "bmp header")?;
    if !header.starts_with(b"BM") {
        return Err(Error::bad("bmp signature not found"));
    }
    info.set_format("bmp");
    match header[14] {
        12 | 26 => {
            info.set(Field::Codec, "uncompressed");
            info.set_dimensions(
                LittleEndian::read_u16(&header[18..20]) as u32,
                LittleEndian::read_u16(&header[20..22]) as u32,
            );
        }
        40 | 52 | 56 | 64 | 108 | 124 => {
            let rest = src.read_vec(BMP_INFO_HEADER_REST)?;
            if rest.len() < 4 {
                trace!(available = rest.len(), "bmp info header cut short");
                return Ok(());
            }
            info.set_dimensions(
                LittleEndian::read_i32(&header[18..22]).unsigned_abs(),
                LittleEndian::read_i32(&rest[0..4]).unsigned_abs(),
            );
            if rest.len() == BMP_INFO_HEADER_REST {
                info.set(Field::Codec, bmp_codec(LittleEndian::read_u32(&rest[8..12])));
            }
        }
        other => trace!(size = other, "unknown bmp info header"),
    }
    Ok(())
}

/// Analyzes an Autodesk FLI/FLC animation
pub fn analyze_flic(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<16>("flic header")?;
    info.set_format("flic");
    info.set(Field::Subformat, if header[4] == 0x12 { "flc" } else { "fli" });
    let mut track = Track::video("rle");
    track.set_dimensions(
        LittleEndian::read_u16(&header[8..10]) as u32,
        LittleEndian::read_u16(&header[10..12]) as u32,
    )?;
    info.add_track(track);
    Ok(())
}

/// Bytes of a PNM header searched for the dimensions
const MAX_PNM_HEADER_SIZE: usize = 256;

/// Splits PNM header tokens, skipping whitespace and `#` comments
struct PnmTokens<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PnmTokens<'a> {
    fn next_number(&mut self) -> Result<u32> {
        loop {
            match self.data.get(self.pos) {
                Some(b'#') => {
                    while !matches!(self.data.get(self.pos), None | Some(b'\n' | b'\r')) {
                        self.pos += 1;
                    }
                }
                Some(b) if b.is_ascii_whitespace() || *b == 0x0b => self.pos += 1,
                _ => break,
            }
        }
        let start = self.pos;
        while matches!(self.data.get(self.pos), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.data.get(self.pos) {
                None => Error::truncated("pnm header"),
                Some(_) => Error::bad("pnm dimension expected"),
            });
        }
        match self.data.get(self.pos) {
            None | Some(b'#') => {}
            Some(b) if b.is_ascii_whitespace() || *b == 0x0b => {}
            Some(_) => return Err(Error::bad("bad pnm dimension")),
        }
        std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::bad("pnm dimension too large"))
    }
}

/// Analyzes a PBM, PGM or PPM image
pub fn analyze_pnm(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_PNM_HEADER_SIZE)?;
    let kind = match data.get(..2) {
        Some([b'P', kind]) => *kind,
        _ => return Err(Error::bad("pnm signature not found")),
    };
    info.set(
        Field::Codec,
        if matches!(kind, b'1'..=b'3') { "rawascii" } else { "raw" },
    );
    let mut tokens = PnmTokens { data: &data, pos: 2 };
    let width = tokens.next_number()?;
    let height = tokens.next_number()?;
    info.set_dimensions(width, height);
    Ok(())
}

const BRN_SIGNATURE: &[u8] = b"\x0a\x04B\xd2\xd5N\x12";
const BRN_WIDTH: u8 = 0x08;
const BRN_HEIGHT: u8 = 0x10;

/// Analyzes a Dropbox BRN (recompressed JPEG) file
pub fn analyze_brn(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let signature = src.read_array::<7>("brn signature")?;
    if signature != BRN_SIGNATURE {
        return Err(Error::bad("brn signature not found"));
    }
    info.set(Field::Codec, "brn");
    let (mut remaining, _) = read_base128(src)?;
    let (mut width, mut height) = (None, None);
    while remaining > 0 {
        let marker = src.read_byte("brn marker")?;
        remaining -= 1;
        if marker & 0x80 != 0 || marker & 0x5 != 0 || marker <= 2 {
            return Err(Error::bad(format!("invalid brn marker: 0x{marker:02x}")));
        }
        let (value, used) = read_base128(src)?;
        let mut consumed = used as u64;
        match marker {
            BRN_WIDTH if width.is_some() => return Err(Error::bad("multiple brn width")),
            BRN_HEIGHT if height.is_some() => return Err(Error::bad("multiple brn height")),
            BRN_WIDTH => width = Some(value),
            BRN_HEIGHT => height = Some(value),
            _ if marker & 7 == 2 => {
                src.skip_exact(value, "brn field")?;
                consumed += value;
            }
            _ => {}
        }
        remaining = remaining
            .checked_sub(consumed)
            .ok_or_else(|| Error::bad("brn header spilled over"))?;
    }
    match (width, height) {
        (Some(width), Some(height)) => {
            let dim = |v: u64| u32::try_from(v).map_err(|_| Error::bad("brn dimension too large"));
            info.set_dimensions(dim(width)?, dim(height)?);
            Ok(())
        }
        _ => Err(Error::bad("dimensions not found in brn")),
    }
}

/// Analyzes an Adobe Photoshop image (PSD, or PSB for version 2)
pub fn analyze_psd(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<22>("psd header")?;
    if &header[..4] != b"8BPS" {
        return Err(Error::bad("psd signature not found"));
    }
    match BigEndian::read_u16(&header[4..6]) {
        1 => {}
        2 => info.set(Field::Subformat, "psb"),
        version => return Err(Error::bad(format!("unknown psd version: {version}"))),
    }
    info.set_dimensions(
        BigEndian::read_u32(&header[18..22]),
        BigEndian::read_u32(&header[14..18]),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    fn run(analyze: crate::format_db::AnalyzeFn, data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_bmp_core_header() {
        let mut data = b"BM\0\0\0\0\0\0\0\0\x1a\0\0\0\x0c\0\0\0".to_vec();
        data.extend_from_slice(b"\x03\x01\x05\x01\x01\0\x18\0");
        let (result, info) = run(analyze_bmp, &data);
        result.unwrap();
        assert_eq!((info.width(), info.height()), (Some(259), Some(261)));
        assert_eq!(info.codec(), Some("uncompressed"));

        // Nothing after the dimensions
        let (result, info) = run(analyze_bmp, b"BM????\0\0\0\0????\x0c\0\0\0\x80\x02\xe0\x01");
        result.unwrap();
        assert_eq!((info.width(), info.height()), (Some(640), Some(480)));
        assert_eq!(info.codec(), Some("uncompressed"));
    }

    #[test]
    fn test_bmp_info_header() {
        let mut data = b"BM\0\0\0\0\0\0\0\0\x36\0\0\0\x28\0\0\0".to_vec();
        data.extend_from_slice(&640i32.to_le_bytes());
        data.extend_from_slice(&(-480i32).to_le_bytes());
        data.extend_from_slice(b"\x01\0\x08\0\x01\0\0\0");
        let (result, info) = run(analyze_bmp, &data);
        result.unwrap();
        assert_eq!((info.width(), info.height()), (Some(640), Some(480)));
        assert_eq!(info.codec(), Some("rle"));

        // OS/2 2.x header with the same layout
        data[14] = 64;
        data[30] = 2;
        let (result, info) = run(analyze_bmp, &data);
        result.unwrap();
        assert_eq!(info.codec(), Some("rle"));
    }

    #[test]
    fn test_bmp_info_header_cut_short() {
        let (result, info) = run(analyze_bmp, b"BM????\0\0\0\0????\x28\0\0\0\x80\x02\0\0");
        result.unwrap();
        assert_eq!(info.format(), Some("bmp"));
        assert_eq!(info.width(), None);
        assert_eq!(info.codec(), None);
    }

    #[test]
    fn test_flic() {
        let (result, info) = run(analyze_flic, b"????\x11\xaf??\x03\x02\x01\x02\x08\0\x03\0");
        result.unwrap();
        assert_eq!(info.subformat(), Some("fli"));
        let track = &info.tracks[0];
        assert_eq!(track.codec, "rle");
        assert_eq!((track.width, track.height), (Some(515), Some(513)));
    }

    #[test]
    fn test_flic_too_small() {
        let (result, _) = run(analyze_flic, b"????\x12\xaf??\x08\0\x08\0\x08\0\x03\0");
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_pnm_with_comments() {
        let (result, info) = run(analyze_pnm, b"P1#f oo\n #bar\r\t123\x0b\x0c456#");
        result.unwrap();
        assert_eq!(info.codec(), Some("rawascii"));
        assert_eq!((info.width(), info.height()), (Some(123), Some(456)));
    }

    #[test]
    fn test_pnm_binary() {
        let (result, info) = run(analyze_pnm, b"P6\n640 480\n255\n\xff\xff");
        result.unwrap();
        assert_eq!(info.codec(), Some("raw"));
        assert_eq!((info.width(), info.height()), (Some(640), Some(480)));
    }

    #[test]
    fn test_pnm_missing_height() {
        let (result, info) = run(analyze_pnm, b"P5 12 ");
        assert!(matches!(result, Err(Error::Truncated(_))));
        assert_eq!(info.codec(), Some("raw"));
    }

    #[test]
    fn test_brn() {
        let data = b"\x0a\x04\x42\xd2\xd5\x4e\x12\x0a\x08\x81\x04\x10\x80\x04\x18\x02\x20\x11";
        let (result, info) = run(analyze_brn, data);
        result.unwrap();
        assert_eq!(info.codec(), Some("brn"));
        assert_eq!((info.width(), info.height()), (Some(513), Some(512)));
    }

    #[test]
    fn test_brn_without_height() {
        let (result, _) = run(analyze_brn, b"\x0a\x04\x42\xd2\xd5\x4e\x12\x03\x08\x81\x04");
        assert!(result.is_err());
    }

    #[test]
    fn test_psd() {
        let data = b"8BPS\0\x01\0\0\0\0\0\0\0\x01\0\0\x01\x05\0\0\x01\x03\0\x01\0\0";
        let (result, info) = run(analyze_psd, data);
        result.unwrap();
        assert_eq!((info.width(), info.height()), (Some(259), Some(261)));
    }
}
