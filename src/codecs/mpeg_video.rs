//! MPEG-1/2 video sequence header parser

use super::find_start_code;
use crate::{
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use tracing::trace;

pub const SEQUENCE_HEADER_CODE: u8 = 0xb3;
pub const EXTENSION_START_CODE: u8 = 0xb5;

/// Fixed part of a sequence header, start code included
pub const SEQUENCE_HEADER_SIZE: usize = 12;

const QUANT_MATRIX_SIZE: usize = 64;

/// Bytes read from a raw stream: a header with both quantiser matrices and
/// the following start code
pub const MAX_HEADER_READ: usize = SEQUENCE_HEADER_SIZE + 2 * QUANT_MATRIX_SIZE + 4;

/// Builds a video track from data starting at or before a sequence header
///
/// The codec is `mpeg-2` if a sequence extension follows the header,
/// `mpeg-1` if any other start code follows and `mpeg` if the data ends
/// first.
pub fn parse_track(data: &[u8]) -> Result<Track> {
    let start = find_start_code(data, 0)
        .filter(|&p| data.get(p + 3) == Some(&SEQUENCE_HEADER_CODE))
        .ok_or_else(|| Error::bad("mpeg-video signature not found"))?;
    let hdr = &data[start..];
    if hdr.len() < SEQUENCE_HEADER_SIZE {
        return Err(Error::truncated("mpeg-video sequence header"));
    }
    let width = (hdr[4] as u32) << 4 | (hdr[5] as u32) >> 4;
    let height = ((hdr[5] & 0xf) as u32) << 8 | hdr[6] as u32;

    let mut end = SEQUENCE_HEADER_SIZE;
    let mut flags_byte = hdr[11];
    if flags_byte & 2 != 0 {
        // intra_quantiser_matrix straddles bytes; load_non_intra moves with it
        end += QUANT_MATRIX_SIZE;
        flags_byte = *hdr.get(end - 1).ok_or_else(|| Error::truncated("mpeg-video quantiser matrix"))?;
    }
    if flags_byte & 1 != 0 {
        end += QUANT_MATRIX_SIZE;
    }
    let codec = match find_start_code(hdr, end).and_then(|p| hdr.get(p + 3)) {
        Some(&EXTENSION_START_CODE) => "mpeg-2",
        Some(_) => "mpeg-1",
        None => "mpeg",
    };
    trace!(width, height, codec, "mpeg-video sequence header");
    let mut track = Track::video(codec);
    track.set_dimensions(width, height)?;
    Ok(track)
}

/// Analyzes a raw MPEG-1/2 video elementary stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_HEADER_READ)?;
    info.set_format("mpeg-video");
    let track = parse_track(&data)?;
    info.add_track(track);
    Ok(())
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
    fn test_mpeg1_sequence_header() {
        let track = parse_track(&hex("000001b31600f01502d020a4000001b8")).unwrap();
        assert_eq!(track.codec, "mpeg-1");
        assert_eq!((track.width, track.height), (Some(352), Some(240)));
    }

    #[test]
    fn test_mpeg2_sequence_extension() {
        let track = parse_track(&hex("000001b32d01e0240a1e62f8000001b5")).unwrap();
        assert_eq!(track.codec, "mpeg-2");
        assert_eq!((track.width, track.height), (Some(720), Some(480)));
    }

    #[test]
    fn test_undetermined_version() {
        // Start code prefix without the code byte
        let track = parse_track(&hex("000001b31600f01502d020a4000001")).unwrap();
        assert_eq!(track.codec, "mpeg");
        // Extra zero byte before the next start code
        let track = parse_track(&hex("000001b31600f01502d020a400000001b8")).unwrap();
        assert_eq!(track.codec, "mpeg-1");
    }

    #[test]
    fn test_quantiser_matrices_skipped() {
        // load_intra_quantiser_matrix set, then a matrix whose last byte sets
        // load_non_intra_quantiser_matrix
        let mut data = hex("000001b3160120131fffe01a");
        data.extend(vec![0x10; 63]);
        data.push(0x11);
        data.extend(vec![0x10; 64]);
        data.extend(hex("000001b5"));
        let track = parse_track(&data).unwrap();
        assert_eq!(track.codec, "mpeg-2");
        assert_eq!((track.width, track.height), (Some(352), Some(288)));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_track(&hex("000001b8000000")), Err(Error::InvalidFormat(_))));
        assert!(matches!(parse_track(&hex("000001b31600f015")), Err(Error::Truncated(_))));
    }
}
