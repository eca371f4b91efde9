//! FLAC STREAMINFO reader

use crate::{
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use byteorder::{BigEndian, ByteOrder};

const STREAMINFO: u8 = 0;
const LAST_METADATA_BLOCK: u8 = 0x80;

/// Analyzes a native FLAC stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let header = src.read_array::<5>("flac header")?;
    if &header[..4] != b"fLaC" {
        return Err(Error::bad("flac signature not found"));
    }
    info.set_format("flac");
    if header[4] & !LAST_METADATA_BLOCK != STREAMINFO {
        return Err(Error::bad("flac STREAMINFO metadata block expected"));
    }
    let size = BigEndian::read_u24(&src.read_array::<3>("flac STREAMINFO size")?);
    if !(34..=255).contains(&size) {
        return Err(Error::bad(format!(
            "unreasonable size of flac STREAMINFO metadata block: {size}"
        )));
    }
    let data = src.read_array::<18>("flac STREAMINFO")?;
    // 20 bits sample rate, 3 bits channels - 1, 5 bits sample size - 1
    let packed = BigEndian::read_u64(&data[10..18]);
    let mut track = Track::audio("flac");
    track.channel_count = Some(((packed >> 41) & 7) as u32 + 1);
    track.sample_size = Some(((packed >> 36) & 31) as u32 + 1);
    track.sample_rate = Some((packed >> 44) as u32);
    info.add_track(track);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SliceSource;

    fn run(data: &[u8]) -> (Result<()>, Info) {
        let mut info = Info::new();
        let result = analyze(&mut SliceSource::new(data), &mut info);
        (result, info)
    }

    #[test]
    fn test_streaminfo() {
        let mut data = b"fLaC\x80\0\0\x22".to_vec();
        data.extend_from_slice(&[0x10, 0, 0x10, 0, 0, 0, 0, 0, 0, 0]);
        // 44100 Hz, 2 channels, 16 bits
        data.extend_from_slice(&[0x0a, 0xc4, 0x42, 0xf0, 0, 0, 0, 0]);
        let (result, info) = run(&data);
        result.unwrap();
        assert_eq!(info.format(), Some("flac"));
        let track = &info.tracks[0];
        assert_eq!(track.codec, "flac");
        assert_eq!(track.sample_rate, Some(44100));
        assert_eq!(track.channel_count, Some(2));
        assert_eq!(track.sample_size, Some(16));
    }

    #[test]
    fn test_other_first_block() {
        let (result, _) = run(b"fLaC\x04\0\0\x22");
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_bad_streaminfo_size() {
        let (result, _) = run(b"fLaC\0\0\0\x10");
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_truncated_streaminfo() {
        let (result, info) = run(b"fLaC\0\0\0\x22\x10\0");
        assert!(matches!(result, Err(Error::Truncated(_))));
        assert!(info.tracks.is_empty());
    }
}
