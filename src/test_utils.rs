//! Test utilities: sample builders and fixture files.
//!
//! This module provides:
//! - Box, element and chunk builders for ISO BMFF, EBML and RIFF data
//! - Named synthetic samples with the format detection should report
//! - File-based fixtures from custom directories (via the
//!   `MEDIA_PROBE_TEST_FIXTURES` env var)
//!
//! # Usage
//!
//! ```no_run
//! use media_probe::test_utils::*;
//!
//! # fn example() -> media_probe::Result<()> {
//! // Use predefined sample constants
//! let data = sample_bytes(STILL_GIF)?;
//! assert_eq!(expected_format(STILL_GIF), Some("gif"));
//!
//! // List all available samples and fixture files
//! let all = list_fixtures()?;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, fs, path::PathBuf, sync::LazyLock};

use crate::{bits::encode_ebml_size, Error, Result};

/// Builds an ISO BMFF box with a 32-bit size
pub fn bmff_box(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    data.extend_from_slice(kind);
    data.extend_from_slice(body);
    data
}

/// Builds an EBML element with the shortest size encoding
pub fn ebml_element(id: u32, body: &[u8]) -> Vec<u8> {
    let id_bytes = id.to_be_bytes();
    let skip = id_bytes.iter().take_while(|b| **b == 0).count().min(3);
    let mut data = id_bytes[skip..].to_vec();
    data.extend(encode_ebml_size(body.len() as u64).unwrap());
    data.extend_from_slice(body);
    data
}

/// Builds a RIFF chunk, padding the body to an even size
pub fn riff_chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut data = id.to_vec();
    data.extend_from_slice(&(body.len() as u32).to_le_bytes());
    data.extend_from_slice(body);
    if body.len() % 2 == 1 {
        data.push(0);
    }
    data
}

/// Sample builder signature
pub type SampleFn = fn() -> Vec<u8>;

/// Macro to define named samples with their expected format
macro_rules! define_samples {
    ($($name:ident => ($file:expr, $format:expr, $build:ident)),* $(,)?) => {
        // Define constants for sample names
        $(
            #[allow(dead_code)]
            pub const $name: &str = $file;
        )*

        static SAMPLES: LazyLock<HashMap<&'static str, (SampleFn, &'static str)>> =
            LazyLock::new(|| {
                let mut map = HashMap::new();
                $(
                    map.insert($file, ($build as SampleFn, $format));
                )*
                map
            });

        /// Get the sample registry
        pub fn get_registry() -> &'static HashMap<&'static str, (SampleFn, &'static str)> {
            &SAMPLES
        }

        /// List all defined samples
        pub fn list_all_samples() -> Vec<&'static str> {
            vec![$($file),*]
        }
    };
}

define_samples!(
    EMPTY => ("empty.bin", "empty", empty_sample),
    STILL_GIF => ("still.gif", "gif", gif_sample),
    ANIMATED_GIF => ("animated.gif", "agif", animated_gif_sample),
    PNG => ("image.png", "png", png_sample),
    JPEG => ("photo.jpg", "jpeg", jpeg_sample),
    BMP => ("image.bmp", "bmp", bmp_sample),
    SVG => ("drawing.svg", if cfg!(feature = "xml") { "svg" } else { "xml" }, svg_sample),
    WEBM_HEADER => ("header.webm", "webm", webm_header_sample),
    WEBM => ("video.webm", "webm", webm_sample),
    MOV => ("movie.mov", "mov", mov_sample),
    MP4 => ("movie.mp4", "mp4", mp4_sample),
    MPEG_TS => ("h264.ts", "mpeg-ts", mpegts_sample),
    WAV => ("sound.wav", "wav", wav_sample),
    FLAC => ("sound.flac", "flac", flac_sample),
    MP3 => ("sound.mp3", "mp3", mp3_sample),
    IVF => ("video.ivf", "ivf", ivf_sample),
);

fn empty_sample() -> Vec<u8> {
    Vec::new()
}

const GIF_FRAME: &[u8] = b"\x2c\0\0\0\0\x05\x01\x03\x02\0\x02\x02\x44\x01\0";

fn gif_with_frames(frames: usize) -> Vec<u8> {
    // 261x515 screen, no global color table
    let mut data = b"GIF89a\x05\x01\x03\x02\0\0\0".to_vec();
    for _ in 0..frames {
        data.extend_from_slice(b"\x21\xf9\x04\0\x0a\0\0\0");
        data.extend_from_slice(GIF_FRAME);
    }
    data.push(0x3b);
    data
}

fn gif_sample() -> Vec<u8> {
    gif_with_frames(1)
}

fn animated_gif_sample() -> Vec<u8> {
    gif_with_frames(2)
}

fn png_sample() -> Vec<u8> {
    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    let mut ihdr = b"\0\0\0\x0dIHDR".to_vec();
    ihdr.extend_from_slice(&1281u32.to_be_bytes());
    ihdr.extend_from_slice(&770u32.to_be_bytes());
    ihdr.extend_from_slice(b"\x08\x02\0\0\0");
    data.extend(ihdr);
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(b"\0\0\0\0IEND\xae\x42\x60\x82");
    data
}

fn jpeg_sample() -> Vec<u8> {
    let mut data = b"\xff\xd8\xff\xe0\x00\x10JFIF\0\x01\x01\0\0\x01\0\x01\0\0".to_vec();
    // SOF0: 8 bits, 480 rows, 640 columns
    data.extend_from_slice(b"\xff\xc0\x00\x11\x08\x01\xe0\x02\x80\x03");
    data.extend_from_slice(&[0; 9]);
    data
}

fn bmp_sample() -> Vec<u8> {
    let mut data = b"BM\x46\0\0\0\0\0\0\0\x36\0\0\0\x28\0\0\0".to_vec();
    data.extend_from_slice(&4i32.to_le_bytes());
    data.extend_from_slice(&2i32.to_le_bytes());
    data.extend_from_slice(b"\x01\0\x18\0\0\0\0\0");
    data.extend_from_slice(&[0; 44]);
    data
}

fn svg_sample() -> Vec<u8> {
    b"<?xml version=\"1.0\"?>\n<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"64\" height=\"48\">\n</svg>\n"
        .to_vec()
}

fn ebml_header(doc_type: &str) -> Vec<u8> {
    let mut body = ebml_element(0x4286, &[1]); // EBMLVersion
    body.extend(ebml_element(0x42f7, &[1])); // EBMLReadVersion
    body.extend(ebml_element(0x4282, doc_type.as_bytes()));
    body.extend(ebml_element(0x4287, &[2])); // DocTypeVersion
    body.extend(ebml_element(0x4285, &[2])); // DocTypeReadVersion
    ebml_element(0x1a45_dfa3, &body)
}

fn webm_header_sample() -> Vec<u8> {
    ebml_header("webm")
}

fn webm_sample() -> Vec<u8> {
    let mut video = ebml_element(0xb0, &640u16.to_be_bytes());
    video.extend(ebml_element(0xba, &360u16.to_be_bytes()));
    let mut entry = ebml_element(0xd7, &[1]);
    entry.extend(ebml_element(0x86, b"V_VP8"));
    entry.extend(ebml_element(0xe0, &video));
    let tracks = ebml_element(0xae, &entry);
    let segment = ebml_element(0x1654_ae6b, &tracks);

    let mut data = ebml_header("webm");
    data.extend(ebml_element(0x1853_8067, &segment));
    data
}

fn trak(handler: &[u8; 4], sample_entry: Option<Vec<u8>>) -> Vec<u8> {
    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(handler);
    hdlr.extend_from_slice(&[0; 13]);
    let stsd = sample_entry.map(|entry| {
        let mut body = vec![0, 0, 0, 0, 0, 0, 0, 1];
        body.extend(entry);
        bmff_box(b"stsd", &body)
    });
    let stbl = bmff_box(b"stbl", &stsd.unwrap_or_default());
    let mut mdia = bmff_box(b"hdlr", &hdlr);
    mdia.extend(bmff_box(b"minf", &stbl));
    bmff_box(b"trak", &bmff_box(b"mdia", &mdia))
}

fn mov_sample() -> Vec<u8> {
    let mut data = bmff_box(b"ftyp", b"qt  \x20\x05\x03\x00qt  ");
    data.extend(bmff_box(b"wide", &[]));
    data.extend(bmff_box(b"mdat", &[0; 16]));
    data.extend(bmff_box(b"moov", &trak(b"soun", None)));
    data
}

fn mp4_sample() -> Vec<u8> {
    let mut entry = vec![0u8; 24];
    entry.extend_from_slice(&1280u16.to_be_bytes());
    entry.extend_from_slice(&720u16.to_be_bytes());
    entry.extend_from_slice(&[0; 50]);
    let mut data = bmff_box(b"ftyp", b"isom\0\0\x02\0isomiso2avc1mp41");
    data.extend(bmff_box(b"moov", &trak(b"vide", Some(bmff_box(b"avc1", &entry)))));
    data
}

fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn ts_packet(head: &str) -> Vec<u8> {
    let mut packet = hex(head);
    packet.resize(188, 0xff);
    packet
}

/// Program 1 with a single H.264 stream on PID 0x1011
fn mpegts_sample() -> Vec<u8> {
    let mut data = ts_packet("474000110000b00d0001c300000001e10076578e5f");
    // The PMT CRC is not checked.
    data.extend(ts_packet("474100110002b0120001c10000f011f0001bf011f00000000000"));
    data.extend(ts_packet(
        "4750113107900000\
         01c97e1e000001e000008080052100018ca100000109100000000001274d40289a6280f0088fbc07d40404\
         0500000303e90000ea60e8c0004c4b0002faf2ef380a0000000128fe3c80",
    ));
    data
}

fn wav_sample() -> Vec<u8> {
    // PCM, 2 channels, 44100 Hz, 16 bits
    let mut fmt = 1u16.to_le_bytes().to_vec();
    fmt.extend_from_slice(&2u16.to_le_bytes());
    fmt.extend_from_slice(&44100u32.to_le_bytes());
    fmt.extend_from_slice(&176400u32.to_le_bytes());
    fmt.extend_from_slice(&4u16.to_le_bytes());
    fmt.extend_from_slice(&16u16.to_le_bytes());
    let mut body = b"WAVE".to_vec();
    body.extend(riff_chunk(b"fmt ", &fmt));
    body.extend(riff_chunk(b"data", &[0; 8]));
    riff_chunk(b"RIFF", &body)
}

fn flac_sample() -> Vec<u8> {
    let mut data = b"fLaC\x80\0\0\x22".to_vec();
    data.extend_from_slice(&[0x10, 0, 0x10, 0, 0, 0, 0, 0, 0, 0]);
    data.extend_from_slice(&[0x0a, 0xc4, 0x42, 0xf0, 0, 0, 0, 0]);
    data.extend_from_slice(&[0; 16]);
    data
}

fn mp3_sample() -> Vec<u8> {
    // MPEG-1 layer III, 128 kbit/s, 44100 Hz, joint stereo
    let mut data = b"\xff\xfb\x90\xc4".to_vec();
    data.resize(417, 0);
    data
}

fn ivf_sample() -> Vec<u8> {
    let mut data = b"DKIF\0\0\x20\0VP80".to_vec();
    data.extend_from_slice(&320u16.to_le_bytes());
    data.extend_from_slice(&240u16.to_le_bytes());
    data.extend_from_slice(&30u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&1u32.to_le_bytes());
    data.extend_from_slice(&[0; 4]);
    data
}

/// The format detection should report for a sample
pub fn expected_format(name: &str) -> Option<&'static str> {
    get_registry().get(name).map(|(_, format)| *format)
}

/// Get path to a fixture file
///
/// Search order:
/// 1. MEDIA_PROBE_TEST_FIXTURES env var (for extended test sets)
/// 2. Default tests/fixtures directory
pub fn fixture_path(file_name: &str) -> PathBuf {
    if let Ok(custom_dir) = std::env::var("MEDIA_PROBE_TEST_FIXTURES") {
        let path = PathBuf::from(custom_dir).join(file_name);
        if path.exists() {
            return path;
        }
    }

    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(file_name);
    path
}

/// Sample or fixture data as bytes
///
/// Built-in samples come first, then fixture files.
pub fn sample_bytes(name: &str) -> Result<Vec<u8>> {
    if let Some((build, _)) = get_registry().get(name) {
        return Ok(build());
    }
    fs::read(fixture_path(name)).map_err(Error::Io)
}

/// List all available samples and fixture files
///
/// This will:
/// 1. List all built-in samples
/// 2. If MEDIA_PROBE_TEST_FIXTURES is set, also list the files in that directory
pub fn list_fixtures() -> Result<Vec<String>> {
    let mut fixtures: Vec<String> = list_all_samples().into_iter().map(String::from).collect();

    if let Ok(custom_dir) = std::env::var("MEDIA_PROBE_TEST_FIXTURES") {
        let extended_path = PathBuf::from(custom_dir);
        if extended_path.is_dir() {
            for entry in fs::read_dir(extended_path)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if !fixtures.iter().any(|f| f == name) {
                        fixtures.push(name.to_string());
                    }
                }
            }
        }
    }

    Ok(fixtures)
}
