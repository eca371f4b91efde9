//! Safety tests - basic validation of security mechanisms
//!
//! These tests verify that resource limits hold, that truncated input is
//! reported as truncated and that corrupt size fields are rejected.
//! Comprehensive testing should be done with fuzzing (cargo-fuzz).

use media_probe::{
    containers::{matroska::MAX_EBML_HEADER_SIZE, mpegts::MAX_TS_PACKETS},
    formats::tiff::MAX_IFD_TAGS,
    info::MAX_VIDEO_DIMENSION,
    test_utils::*,
    *,
};

fn run(data: &[u8]) -> (Result<()>, Info) {
    let mut info = Info::new();
    let result = detect_into(&mut SliceSource::new(data), &mut info);
    (result, info)
}

#[test]
fn test_limit_constants() {
    assert_eq!(MAX_VIDEO_DIMENSION, 16383);
    assert_eq!(MAX_EBML_HEADER_SIZE, 256);
    // Should allow real files while preventing runaway loops
    assert!(MAX_IFD_TAGS > 100 && MAX_IFD_TAGS < 10000);
    assert!(MAX_TS_PACKETS >= 1000);
}

#[test]
fn test_no_panic_on_any_prefix() {
    for name in list_all_samples() {
        let data = sample_bytes(name).unwrap();
        for len in 0..data.len() {
            let (_, info) = run(&data[..len]);
            assert!(info.format().is_some(), "{name} cut to {len}");
        }
    }
}

#[test]
fn test_truncated_signature_is_reported() {
    let data = sample_bytes(PNG).unwrap();
    // Shorter than 4 bytes is reported as an empty/short file.
    for len in 4..11 {
        let (result, info) = run(&data[..len]);
        assert!(matches!(result, Err(Error::Truncated(_))), "png cut to {len}");
        assert_eq!(info.format(), Some(UNKNOWN_FORMAT));
        assert_eq!(info.get_str(&Field::Error), Some("truncated"));
    }
}

#[test]
fn test_truncated_header_keeps_format() {
    let data = sample_bytes(FLAC).unwrap();
    let (result, info) = run(&data[..20]);
    assert!(matches!(result, Err(Error::Truncated(_))));
    assert_eq!(info.format(), Some("flac"));
    assert!(info.tracks.is_empty());
}

#[test]
fn test_corrupt_flac_block_size() {
    let mut data = sample_bytes(FLAC).unwrap();
    data[7] = 0x10;
    let (result, info) = run(&data);
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
    assert_eq!(info.get_str(&Field::Error), Some("bad_data"));
    assert_eq!(info.get(&Field::Acodec), None);
}

#[test]
fn test_corrupt_wav_fmt_size() {
    let mut data = sample_bytes(WAV).unwrap();
    // fmt chunk size
    data[16..20].copy_from_slice(&0xffff_fff0u32.to_le_bytes());
    let (result, info) = run(&data);
    assert!(matches!(result, Err(Error::DataTooLarge { .. })));
    assert_eq!(info.format(), Some("wav"));
}

#[test]
fn test_corrupt_ebml_header_size() {
    let mut data = sample_bytes(WEBM_HEADER).unwrap();
    // Turns the 1-byte size into a 2-byte one covering 0x142 bytes
    data[4] = 0x41;
    let (result, info) = run(&data);
    assert!(matches!(
        result,
        Err(Error::DataTooLarge { max: MAX_EBML_HEADER_SIZE, .. })
    ));
    assert_eq!(info.format(), Some("mkv"));
}

#[test]
fn test_bmff_box_larger_than_file() {
    let mut data = bmff_box(b"ftyp", b"isom\0\0\0\0isom");
    data.extend_from_slice(&0x7fff_ff00u32.to_be_bytes());
    data.extend_from_slice(b"uuid");
    data.extend_from_slice(&[0; 32]);
    let (result, info) = run(&data);
    assert!(matches!(result, Err(Error::Truncated(_))));
    assert_eq!(info.format(), Some("mp4"));
}

#[test]
fn test_tiff_ifd_tag_limit() {
    let mut data = b"II\x2a\0\x08\0\0\0".to_vec();
    data.extend_from_slice(&(MAX_IFD_TAGS + 1).to_le_bytes());
    let (result, _) = run(&data);
    assert!(matches!(result, Err(Error::DataTooLarge { .. })));
}

#[test]
fn test_dimension_out_of_range() {
    let mut data = sample_bytes(IVF).unwrap();
    // Width 16384
    data[12..14].copy_from_slice(&16384u16.to_le_bytes());
    let (result, info) = run(&data);
    assert!(matches!(result, Err(Error::InvalidFormat(_))));
    assert_eq!(info.format(), Some("ivf"));
    assert_eq!(info.width(), None);
}

#[test]
fn test_ts_packet_limit() {
    let sample = sample_bytes(MPEG_TS).unwrap();
    // PAT and PMT, then only null packets
    let mut data = sample[..2 * 188].to_vec();
    let mut null_packet = vec![0x47, 0x1f, 0xff, 0x10];
    null_packet.resize(188, 0xff);
    for _ in 0..MAX_TS_PACKETS {
        data.extend_from_slice(&null_packet);
    }
    let (result, info) = run(&data);
    result.unwrap();
    assert_eq!(info.format(), Some("mpeg-ts"));
    assert!(info.tracks.is_empty());
}

#[test]
fn test_ts_lost_sync() {
    let mut data = sample_bytes(MPEG_TS).unwrap();
    data[188] = 0x48;
    let (result, info) = run(&data);
    assert!(matches!(result, Err(Error::InvalidSegment { offset: 188, .. })));
    assert_eq!(info.format(), Some("mpeg-ts"));
}

#[test]
fn test_seek_source_skip_past_end() {
    use media_probe::source::ByteSourceExt;
    use std::io::Cursor;

    let data = vec![0u8; 100_000];
    let mut src = SeekSource::new(Cursor::new(&data), data.len() as u64);
    assert!(src.skip(60_000).unwrap());
    assert_eq!(src.position(), 60_000);
    assert!(!src.skip(60_000).unwrap());
    assert!(src.read_vec(16).unwrap().is_empty());
}
