//! AIFF and AIFF-C walker
//!
//! `FORM` files hold big-endian chunks; the audio parameters live in the
//! `COMM` chunk, with the sample rate stored as an 80-bit float.

use super::fourcc_lower;
use crate::{
    bits::float80,
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

/// Largest chunk skipped while looking for `COMM`
pub const MAX_SKIPPED_CHUNK_SIZE: u64 = 1 << 20;

/// `COMM` fields up to the sample rate
const COMM_SIZE: usize = 18;

const AIFC_COMPRESSIONS: &[(&str, &str)] = &[
    ("none", "pcm"),
    ("twos", "pcm"),
    ("sowt", "pcm"),
    ("raw", "pcm"),
    ("in24", "pcm"),
    ("in32", "pcm"),
    ("fl32", "pcm"),
    ("fl64", "pcm"),
    ("ulaw", "mulaw"),
    ("alaw", "alaw"),
    ("ima4", "adpcm"),
    ("mac3", "mace3"),
    ("mac6", "mace6"),
    ("qdmc", "qdmc"),
    ("qdm2", "qdmc2"),
    ("gsm", "gsm"),
];

fn parse_comm(data: &[u8], track: &mut Track, is_aifc: bool) -> Result<()> {
    if data.len() < COMM_SIZE {
        return Err(Error::truncated("aiff COMM chunk"));
    }
    track.channel_count = Some(BigEndian::read_u16(&data[0..2]) as u32);
    track.sample_size = Some(BigEndian::read_u16(&data[6..8]) as u32);
    let mut rate = [0u8; 10];
    rate.copy_from_slice(&data[8..18]);
    let rate = float80(&rate);
    if !(rate.is_finite() && rate >= 1.0 && rate < u32::MAX as f64) {
        return Err(Error::bad(format!("bad aiff sample rate: {rate}")));
    }
    track.sample_rate = Some(rate as u32);
    if is_aifc {
        let Some(compression) = data.get(18..22) else {
            return Err(Error::truncated("aifc compression type"));
        };
        let name = fourcc_lower(compression);
        track.codec = AIFC_COMPRESSIONS
            .iter()
            .find(|(k, _)| *k == name)
            .map_or(name, |(_, v)| v.to_string());
    }
    Ok(())
}

/// Analyzes an AIFF or AIFF-C file
///
/// The audio track is reported as soon as the form type is known; a file
/// that ends before its `COMM` chunk leaves the track without parameters.
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_exact_vec(12, "aiff FORM header")?;
    if &header[0..4] != b"FORM" {
        return Err(Error::bad("aiff signature not found"));
    }
    let is_aifc = match &header[8..12] {
        b"AIFF" => false,
        b"AIFC" => true,
        _ => return Err(Error::bad("aiff form type not found")),
    };
    info.set_format(if is_aifc { "aifc" } else { "aiff" });
    let track = info.add_track(Track::audio(if is_aifc { "?" } else { "pcm" }));

    loop {
        let chunk = src.read_vec(8)?;
        if chunk.len() < 8 {
            return Ok(());
        }
        let size = BigEndian::read_u32(&chunk[4..8]) as u64;
        trace!(id = %String::from_utf8_lossy(&chunk[0..4]), size, "aiff chunk");
        if &chunk[0..4] == b"COMM" {
            let data = src.read_vec(size.min(64) as usize)?;
            if data.is_empty() {
                return Ok(());
            }
            return parse_comm(&data, track, is_aifc);
        }
        let padded = size + (size & 1);
        if padded > MAX_SKIPPED_CHUNK_SIZE {
            return Err(Error::DataTooLarge {
                size: padded,
                max: MAX_SKIPPED_CHUNK_SIZE,
            });
        }
        if !src.skip(padded)? {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    const AIFF: &[u8] = b"FORM\0\x01\x02\x03AIFFCOMM\0\0\0\x12\0\x02????\0\x0a\x40\x0e\xac\x44\0\0\0\0\0\0";
    const AIFC: &[u8] =
        b"FORM\0\x01\x02\x03AIFCCOMM\0\0\0\x20\0\x02????\0\x10\x40\x0b\xfa\0\0\0\0\0\0\0ulaw\x08\xb5law 2:1\0";

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_aiff() {
        let (result, info) = run(AIFF);
        result.unwrap();
        assert_eq!(info.format(), Some("aiff"));
        let track = &info.tracks[0];
        assert_eq!(track.codec, "pcm");
        assert_eq!(track.channel_count, Some(2));
        assert_eq!(track.sample_rate, Some(44100));
        assert_eq!(track.sample_size, Some(10));
    }

    #[test]
    fn test_fractional_rate() {
        let data = b"FORM\0\x01\x02\x03AIFFCOMM\0\0\0\x12\0\x01????\0\x08\x40\x0c\xad\xdd\x17\x44\0\0\0\0";
        let (result, info) = run(data);
        result.unwrap();
        assert_eq!(info.tracks[0].sample_rate, Some(11127));
        assert_eq!(info.tracks[0].sample_size, Some(8));
    }

    #[test]
    fn test_aifc_compression() {
        let (result, info) = run(AIFC);
        result.unwrap();
        assert_eq!(info.format(), Some("aifc"));
        assert_eq!(info.tracks[0].codec, "mulaw");
        assert_eq!(info.tracks[0].sample_rate, Some(8000));
    }

    #[test]
    fn test_truncated_before_comm_data() {
        let (result, info) = run(&AIFF[..20]);
        result.unwrap();
        assert_eq!(info.tracks[0].codec, "pcm");
        assert_eq!(info.tracks[0].sample_rate, None);

        let (result, _) = run(&AIFF[..30]);
        assert!(matches!(result, Err(Error::Truncated(_))));
    }
}
