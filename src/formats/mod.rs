//! Built-in format registry
//!
//! Every format the detector knows is listed once in [`FORMATS`], in
//! registration order (which is also the tie-break order of the
//! [`FormatDb`]). Container and codec formats dispatch to the walkers in
//! [`crate::containers`] and [`crate::codecs`]; the small image, document
//! and executable analyzers live in this module.

pub mod exe;
pub mod flac;
pub mod gif;
pub mod image;
pub mod jpeg;
pub mod png;
pub mod tiff;
pub mod xml;

use crate::{
    codecs::{av1, h264, h265, mpeg_audio, mpeg_video, vp8, vp9},
    containers::{aiff, asf, flv, isobmff, ivf, matroska, mpegps, mpegts, ogg, realmedia, riff},
    error::{Error, Result},
    format_db::{AnalyzeFn, FormatDb, FormatDef},
    info::{Field, Info},
    signature::{
        Pattern::{Bytes, OneOf, Score as Predicate},
        Score,
    },
    source::ByteSource,
};
use std::sync::LazyLock;

/// Confidence of the header-length predicates, above any signature
pub const MAX_CONFIDENCE: u32 = 100_000;

/// ASCII whitespace as accepted after text signatures
const WHITESPACE: &[&[u8]] = &[b"\t", b"\n", b"\x0b", b"\x0c", b"\r", b" "];

/// Register all built-in formats in one place
///
/// Each entry is `name => [spec, ...]`, optionally followed by
/// `analyze = <fn>` and `extra = [<formats the analyzer may assign>]`.
/// The macro generates the [`FORMATS`] table.
macro_rules! register_formats {
    ($(
        $name:literal => [$($spec:expr),+ $(,)?]
            $(, analyze = $analyze:expr)?
            $(, extra = [$($extra:literal),* $(,)?])?
    );* $(;)?) => {
        /// Built-in format table in registration order
        pub static FORMATS: &[FormatDef] = &[
            $(
                FormatDef {
                    name: $name,
                    specs: &[$(&$spec),+],
                    analyze: register_formats!(@analyze $($analyze)?),
                    extra_formats: &[$($($extra),*)?],
                },
            )*
        ];
    };
    (@analyze) => { None };
    (@analyze $analyze:expr) => { Some($analyze as AnalyzeFn) };
}

register_formats! {
    "empty" => [[(1, Predicate(is_empty))]];
    "short1" => [[(2, Predicate(is_short1))]];
    "short2" => [[(3, Predicate(is_short2))]];
    "short3" => [[(4, Predicate(is_short3))]];

    // Video and multimedia containers.
    "flv" => [[(0, Bytes(b"FLV\x01")), (5, Bytes(b"\0\0\0\x09"))]],
        analyze = flv::analyze;
    "mkv" => [[(0, Bytes(b"\x1a\x45\xdf\xa3"))]],
        analyze = matroska::analyze, extra = ["webm"];
    "mp4" => [[(0, Bytes(b"\0\0\0")), (4, Predicate(is_ftyp_size)), (4, Bytes(b"ftyp"))]],
        analyze = isobmff::analyze, extra = ["mov", "f4v", "isobmff-image"];
    "ogg" => [[(0, Bytes(b"OggS"))]],
        analyze = ogg::analyze;
    "asf" => [[(0, Bytes(&asf::HEADER_OBJECT))]],
        analyze = asf::analyze, extra = ["wmv", "wma"];
    "avi" => [[(0, Bytes(b"RIFF")), (8, Bytes(b"AVI "))]],
        analyze = riff::analyze_avi;
    "mpeg-cdxa" => [[(0, Bytes(b"RIFF")), (8, Bytes(b"CDXA"))]],
        analyze = riff::analyze_cdxa;
    "webp" => [[(0, Bytes(b"RIFF")), (8, Bytes(b"WEBPVP8"))]],
        analyze = riff::analyze_webp;
    "mpeg-ps" => [[(0, Bytes(b"\0\0\x01")), (3, OneOf(&[b"\xba", b"\xbb"]))]],
        analyze = mpegps::analyze;
    "mpeg-video" => [[(0, Bytes(b"\0\0\x01\xb3"))]],
        analyze = mpeg_video::analyze;
    "h264" => [
        [(0, Bytes(b"\0\0\0\x01")), (4, OneOf(H264_NAL_HEADERS))],
        [(0, Bytes(b"\0\0\x01")), (3, OneOf(H264_NAL_HEADERS))],
    ],
        analyze = h264::analyze;
    "h265" => [
        [(0, Bytes(b"\0\0\0\x01")), (4, OneOf(H265_NAL_HEADERS))],
        [(0, Bytes(b"\0\0\x01")), (3, OneOf(H265_NAL_HEADERS))],
    ],
        analyze = h265::analyze;
    "av1" => [[(0, Bytes(b"\x12\0\x0a"))]],
        analyze = av1::analyze;
    "vp8" => [[(1, Predicate(is_vp8_key_frame_tag)), (3, Bytes(&vp8::KEY_FRAME_START_CODE))]],
        analyze = vp8::analyze;
    "vp9" => [[(0, OneOf(VP9_FRAME_MARKERS)), (1, Bytes(b"\x49\x83\x42"))]],
        analyze = vp9::analyze;
    "ivf" => [[(0, Bytes(b"DKIF\0\0 \0"))]],
        analyze = ivf::analyze;
    "mng" => [[(0, Bytes(b"\x8aMNG\r\n\x1a\n"))]];
    "swf" => [[(0, OneOf(&[b"FWS", b"CWS"]))]];
    "rm" => [[(0, Bytes(b".RMF\0\0\0"))]],
        analyze = realmedia::analyze;
    "realaudio" => [[(0, Bytes(b".ra\xfd"))]],
        analyze = realmedia::analyze_realaudio;
    // .bup and .ifo files of a video DVD
    "dvd-bup" => [[(0, Bytes(b"DVDVIDEO-V")), (10, OneOf(&[b"TS", b"MG"]))]];
    "dv" => [[(0, Bytes(b"\x1f\x07\x00"))]];
    "mov-mdat" => [[(4, Bytes(b"mdat"))]],
        analyze = isobmff::analyze;
    // A padding box that is followed by mdat, too far away to check here.
    "mov-skip" => [[(0, Bytes(b"\0\0")), (4, OneOf(&[b"wide", b"free", b"skip"]))]],
        analyze = isobmff::analyze;
    "mov-moov" => [[(0, Bytes(b"\0")), (1, OneOf(MOOV_SIZE_BYTES)), (4, Bytes(b"moov"))]],
        analyze = isobmff::analyze;
    // Autodesk Animator FLI and Animator Pro FLC
    "flic" => [[
        (4, OneOf(&[b"\x12\xaf", b"\x11\xaf"])),
        (12, Bytes(b"\x08\0")),
        (14, OneOf(&[b"\x03\0", b"\0\0"])),
    ]],
        analyze = image::analyze_flic;
    "mpeg-ts" => [[(0, OneOf(&[b"\0", b"\x47"])), (8, Predicate(is_mpegts))]],
        analyze = mpegts::analyze;

    // Images.
    "gif" => [[(0, Bytes(b"GIF8")), (4, OneOf(&[b"7a", b"9a"]))]],
        analyze = gif::analyze, extra = ["agif"];
    "jpeg" => [[(0, Bytes(b"\xff\xd8\xff"))]],
        analyze = jpeg::analyze;
    "png" => [[(0, Bytes(b"\x89PNG\r\n\x1a\n\0\0\0"))]],
        analyze = png::analyze, extra = ["apng"];
    // JPEG recompressed by Dropbox lepton
    "lepton" => [[(0, Bytes(b"\xcf\x84")), (2, OneOf(&[b"\x01", b"\x02"])), (3, OneOf(&[b"X", b"Y", b"Z"]))]],
        analyze = analyze_lepton;
    // Also matches raw camera images built on TIFF, such as NEF.
    "tiff" => [[(0, OneOf(&[b"MM\0\x2a", b"II\x2a\0"]))]],
        analyze = tiff::analyze;
    "pbm" => [[(0, Bytes(b"P")), (1, OneOf(&[b"1", b"4"])), (2, OneOf(PNM_SEPARATORS))]],
        analyze = image::analyze_pnm;
    "pgm" => [[(0, Bytes(b"P")), (1, OneOf(&[b"2", b"5"])), (2, OneOf(PNM_SEPARATORS))]],
        analyze = image::analyze_pnm;
    "ppm" => [[(0, Bytes(b"P")), (1, OneOf(&[b"3", b"6"])), (2, OneOf(PNM_SEPARATORS))]],
        analyze = image::analyze_pnm;
    "xpm" => [[(0, Bytes(b"/* XPM */"))]];
    "lbm" => [[(0, Bytes(b"FORM")), (8, Bytes(b"ILBMBMHD"))]];
    "djvu" => [[(0, Bytes(b"AT&TFORM")), (12, Bytes(b"DJV")), (15, OneOf(&[b"U", b"I", b"M"]))]];
    "jbig2" => [[(0, Bytes(b"\x97\x4a\x42\x32\x0d\x0a\x1a\x0a"))]];
    "miff" => [[(0, Bytes(b"id=ImageMagick"))]];
    "xcf" => [[(0, Bytes(b"gimp xcf "))]];
    "psd" => [[(0, Bytes(b"8BPS"))]],
        analyze = image::analyze_psd;
    "ico" => [[(0, Bytes(b"\0\0\x01\0")), (5, Bytes(b"\0")), (6, Predicate(is_ico_count))]];
    // AOL browser image
    "art" => [[(0, Bytes(b"JG\x04\x0e\0\0\0\0"))]];
    "fuji-raf" => [[(0, Bytes(b"FUJIFILMCCD-RAW 020")), (19, OneOf(&[b"0", b"1"])), (20, Bytes(b"FF383501"))]],
        analyze = analyze_raw;
    "brn" => [[(0, Bytes(b"\x0a\x04B\xd2\xd5N\x12"))]],
        analyze = image::analyze_brn;
    "jp2" => [[(0, Bytes(b"\0\0\0\x0cjP  \r\n\x87\n"))]],
        analyze = isobmff::analyze;
    "pnot" => [[(0, Bytes(b"\0\0\0")), (4, Bytes(b"pnot"))]];
    "bmp" => [[
        (0, Bytes(b"BM")),
        (6, Bytes(b"\0\0\0\0")),
        (15, Bytes(b"\0\0\0")),
        (22, Predicate(is_bmp_info_header)),
    ]],
        analyze = image::analyze_bmp;
    "pcx" => [[
        (0, Bytes(b"\n")),
        (1, OneOf(&[b"\0", b"\x01", b"\x02", b"\x03", b"\x04", b"\x05"])),
        (2, Bytes(b"\x01")),
        (3, OneOf(&[b"\x01", b"\x02", b"\x04", b"\x08"])),
    ]];
    // Not every targa file ends with the TRUEVISION-XFILE footer.
    "tga" => [[(0, OneOf(TGA_ID_LENGTHS)), (1, OneOf(TGA_COLOR_MAP_TYPES)), (16, OneOf(TGA_BITS))]];

    // Audio.
    // RMP3 is MP3 audio in a RIFF wrapper.
    "wav" => [[(0, Bytes(b"RIFF")), (8, OneOf(&[b"WAVE", b"RMP3"]))]],
        analyze = riff::analyze_wav;
    "aiff" => [[(0, Bytes(b"FORM")), (8, OneOf(&[b"AIFF", b"AIFC"]))]],
        analyze = aiff::analyze, extra = ["aifc"];
    "mp3-id3" => [[(0, Bytes(b"ID3"))]],
        analyze = mpeg_audio::analyze_id3v2, extra = ["mp3", "mpeg-adts"];
    "mp3-adts" => [[(0, Bytes(b"\xff")), (1, OneOf(AUDIO_SYNC_SECOND_BYTES)), (4, Predicate(is_audio_frame_header))]],
        analyze = mpeg_audio::analyze_adts;
    "aac" => [[(0, Bytes(b"ADIF"))]];
    "flac" => [[(0, Bytes(b"fLaC"))]],
        analyze = flac::analyze;

    // Documents.
    "pdf" => [[(0, Bytes(b"%PDF"))]];
    "ps" => [[(0, Bytes(b"%!PS-Adobe-")), (11, OneOf(&[b"1", b"2", b"3"])), (12, Bytes(b"."))]];
    "dvi" => [[(0, Bytes(b"\xf7\x02"))]];

    // Compressed files and archives.
    // PK\6\6 is ZIP64.
    "zip" => [[(0, Bytes(b"PK")), (2, OneOf(&[b"\x01\x02", b"\x03\x04", b"\x05\x06", b"\x07\x08", b"\x06\x06"]))]],
        analyze = analyze_flate;
    "rar" => [[(0, Bytes(b"Rar!"))]];
    "zpaq" => [[(0, OneOf(&[b"7kS", b"zPQ"])), (4, Predicate(is_zpaq))]];
    "gz" => [[(0, Bytes(b"\x1f\x8b\x08"))]],
        analyze = analyze_flate;
    "bz2" => [[(0, Bytes(b"BZh"))]];
    "lzip" => [[(0, Bytes(b"LZIP"))]];
    "lzop" => [[(0, Bytes(b"\x89LZO\0\r\n"))]];
    "7z" => [[(0, Bytes(b"7z\xbc\xaf\x27\x1c"))]];
    "xz" => [[(0, Bytes(b"\xfd7zXZ\0"))]],
        analyze = analyze_lzma;
    "lzma" => [[(0, Bytes(b"\x5d\0\0")), (12, OneOf(&[b"\0", b"\xff"]))]],
        analyze = analyze_lzma;
    "flate" => [[(0, Bytes(b"\x78")), (1, OneOf(&[b"\x01", b"\x5e", b"\x9c", b"\xda"]))]],
        analyze = analyze_flate;

    // Text and executables.
    "windows-cmd" => [[(0, Bytes(b"@")), (1, OneOf(&[b"e", b"E"])), (9, Predicate(is_echo_off))]];
    "xml" => [
        [(0, Bytes(b"<?xml")), (5, OneOf(XML_DECL_SEPARATORS))],
        [(0, Bytes(b"<svg")), (4, OneOf(SVG_NAME_SEPARATORS))],
    ],
        analyze = xml::analyze, extra = ["svg", "xhtml"];
    "php" => [[(0, Bytes(b"<?")), (2, OneOf(&[b"p", b"P"])), (5, Predicate(is_php)), (5, OneOf(WHITESPACE))]];
    "html" => [[(0, Bytes(b"<")), (15, Predicate(is_html))]];
    "jbf" => [[(0, Bytes(b"JASC BROWS FILE\0"))]];
    "java-class" => [[(0, Bytes(b"\xca\xfe\xba\xbe"))]];
    // OLE compound file, including Thumbs.db
    "olecf" => [[(0, OneOf(&[b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", b"\x0e\x11\xfc\x0d\xd0\xcf\x11\x0e"]))]];
    "avidemux-mpeg-index" => [[(0, Bytes(b"ADMY"))]];
    "avidemux-project" => [[(0, Bytes(b"//AD"))]];
    // Files saved by the JOE editor when it was killed
    "deadjoe" => [[(0, Bytes(b"\n*** ")), (5, OneOf(&[b"Thes", b"JOE "]))]];
    "elf" => [[
        (0, Bytes(b"\x7fELF")),
        (4, OneOf(&[b"\x01", b"\x02"])),
        (5, OneOf(&[b"\x01", b"\x02"])),
        (6, Bytes(b"\x01")),
    ]],
        analyze = exe::analyze_elf;
    // Output of media scanners, one `key=value` record per line
    "fileinfo" => [[(0, Bytes(b"format="))]];
    "unixscript" => [[(4, Predicate(is_unix_script))]];
    "exe" => [[(0, Bytes(b"MZ")), (64, Predicate(has_dos_header))]],
        analyze = exe::analyze_exe, extra = ["winexe", "dotnetexe"];
    "cue" => [
        [(0, Bytes(b"REM GENRE "))],
        [(0, Bytes(b"REM DATE "))],
        [(0, Bytes(b"REM DISCID "))],
        [(0, Bytes(b"REM COMMENT "))],
        [(0, Bytes(b"PERFORMER "))],
        [(0, Bytes(b"TITLE "))],
        [(0, Bytes(b"FILE "))],
        [(0, Bytes(b"\xef\xbb\xbfREM GENRE "))],
        [(0, Bytes(b"\xef\xbb\xbfREM DATE "))],
        [(0, Bytes(b"\xef\xbb\xbfREM DISCID "))],
        [(0, Bytes(b"\xef\xbb\xbfREM COMMENT "))],
        [(0, Bytes(b"\xef\xbb\xbfPERFORMER "))],
        [(0, Bytes(b"\xef\xbb\xbfTITLE "))],
        [(0, Bytes(b"\xef\xbb\xbfFILE "))],
    ];
    "?-zeros8" => [[(0, Bytes(&[0; 8]))]];
    "?-zeros16" => [[(0, Bytes(&[0; 16]))]];
    "?-zeros32" => [[(0, Bytes(&[0; 32]))]];
    // ISO 9660 images without a boot record start with 32 KiB of zeros.
    "?-zeros64" => [[(0, Bytes(&[0; 64]))]];
}

const H264_NAL_HEADERS: &[&[u8]] = &[b"\x67", b"\x27", b"\x47", b"\x09"];

/// VPS, SPS and access unit delimiter NAL headers
const H265_NAL_HEADERS: &[&[u8]] = &[b"\x40\x01", b"\x42\x01", b"\x46\x01"];

/// Frame marker, profile 0 to 2, key frame
const VP9_FRAME_MARKERS: &[&[u8]] = &[
    b"\x80", b"\x81", b"\x82", b"\x83", b"\x90", b"\x91", b"\x92", b"\x93", b"\xa0", b"\xa1",
    b"\xa2", b"\xa3",
];

const MOOV_SIZE_BYTES: &[&[u8]] = &[
    b"\0", b"\x01", b"\x02", b"\x03", b"\x04", b"\x05", b"\x06", b"\x07", b"\x08",
];

const PNM_SEPARATORS: &[&[u8]] = &[b"\t", b"\n", b"\x0b", b"\x0c", b"\r", b" ", b"#"];

const XML_DECL_SEPARATORS: &[&[u8]] = &[b"\t", b"\n", b"\x0b", b"\x0c", b"\r", b" ", b"?"];

const SVG_NAME_SEPARATORS: &[&[u8]] = &[b"\t", b"\n", b"\x0b", b"\x0c", b"\r", b" ", b">", b":"];

/// MPEG audio and ADTS second sync bytes
const AUDIO_SYNC_SECOND_BYTES: &[&[u8]] = &[
    b"\xf0", b"\xf1", b"\xf2", b"\xf3", b"\xf4", b"\xf5", b"\xf6", b"\xf7", b"\xf8", b"\xf9",
    b"\xfa", b"\xfb", b"\xfc", b"\xfd", b"\xfe", b"\xff",
];

/// Image ID lengths 30 to 63
const TGA_ID_LENGTHS: &[&[u8]] = &[
    b"\x1e", b"\x1f", b"\x20", b"\x21", b"\x22", b"\x23", b"\x24", b"\x25", b"\x26", b"\x27",
    b"\x28", b"\x29", b"\x2a", b"\x2b", b"\x2c", b"\x2d", b"\x2e", b"\x2f", b"\x30", b"\x31",
    b"\x32", b"\x33", b"\x34", b"\x35", b"\x36", b"\x37", b"\x38", b"\x39", b"\x3a", b"\x3b",
    b"\x3c", b"\x3d", b"\x3e", b"\x3f",
];

const TGA_COLOR_MAP_TYPES: &[&[u8]] = &[
    b"\0", b"\x01", b"\x02", b"\x03", b"\x04", b"\x05", b"\x06", b"\x07", b"\x08", b"\x09",
    b"\x0a", b"\x0b",
];

const TGA_BITS: &[&[u8]] = &[
    b"\0", b"\x01", b"\x02", b"\x03", b"\x04", b"\x05", b"\x06", b"\x07", b"\x08", b"\x30",
];

fn is_empty(header: &[u8]) -> Score {
    Score::when(header.is_empty(), MAX_CONFIDENCE)
}

fn is_short1(header: &[u8]) -> Score {
    Score::when(header.len() == 1, MAX_CONFIDENCE)
}

fn is_short2(header: &[u8]) -> Score {
    Score::when(header.len() == 2, MAX_CONFIDENCE)
}

fn is_short3(header: &[u8]) -> Score {
    Score::when(header.len() == 3, MAX_CONFIDENCE)
}

/// An `ftyp` box is at least 16 bytes and a multiple of 4
fn is_ftyp_size(header: &[u8]) -> Score {
    Score::when(matches!(header.get(3), Some(&b) if b >= 16 && b & 3 == 0), 26)
}

fn is_vp8_key_frame_tag(header: &[u8]) -> Score {
    Score::when(matches!(header.first(), Some(&tag) if tag & 1 == 0 && (tag >> 1) & 7 <= 3), 10)
}

/// First packet of a transport stream: a PAT packet starting a section
fn is_mpegts(header: &[u8]) -> Score {
    let at = match mpegts::Layout::from_header(header) {
        Some(mpegts::Layout::Ts) => 0,
        Some(mpegts::Layout::Bdav) if header.starts_with(b"\0\0\0\0") => 4,
        _ => return Score::NO,
    };
    let Some(packet) = header.get(at..at + 4) else {
        return Score::NO;
    };
    Score::when(
        packet[2] == 0 && packet[1] & 0x5f == 0x40 && packet[3] & 0x10 != 0,
        301,
    )
}

fn is_ico_count(header: &[u8]) -> Score {
    Score::when(matches!(header.get(4), Some(1..=40)), 240)
}

/// BITMAPINFOHEADER sizes start at 12 bytes; an OS/2 core header ends at 22
fn is_bmp_info_header(header: &[u8]) -> Score {
    Score::when(header.len() >= 22 && (12..=127).contains(&header[14]), 52)
}

fn is_audio_frame_header(header: &[u8]) -> Score {
    let header = &header[..header.len().min(4)];
    Score::when(header.len() == 4 && mpeg_audio::parse_track(header).is_ok(), 30)
}

fn is_zpaq(header: &[u8]) -> Score {
    let matched = header.starts_with(b"7kSt")
        || (header.starts_with(b"zPQ") && matches!(header.get(3), Some(1..=127)));
    Score::when(matched, 52)
}

fn is_echo_off(header: &[u8]) -> Score {
    Score::when(header.len() >= 9 && header[..9].eq_ignore_ascii_case(b"@echo off"), 700)
}

fn is_php(header: &[u8]) -> Score {
    Score::when(header.len() >= 5 && header[..5].eq_ignore_ascii_case(b"<?php"), 200)
}

fn is_html(header: &[u8]) -> Score {
    let starts = |prefix: &[u8]| {
        header.len() >= prefix.len() && header[..prefix.len()].eq_ignore_ascii_case(prefix)
    };
    let matched = header.starts_with(b"<!--")
        || starts(b"<!doctype html>")
        || starts(b"<!doctype html ")
        || starts(b"<html>")
        || starts(b"<head>")
        || starts(b"<body>");
    Score::when(matched, 500)
}

fn is_unix_script(header: &[u8]) -> Score {
    Score::when(header.starts_with(b"#!/") || header.starts_with(b"#! /"), 350)
}

fn has_dos_header(header: &[u8]) -> Score {
    Score::when(header.len() >= 64, 1)
}

fn analyze_lepton(_: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set(Field::Codec, "lepton");
    Ok(())
}

fn analyze_raw(_: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set(Field::Codec, "raw");
    Ok(())
}

fn analyze_flate(_: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set(Field::Codec, "flate");
    Ok(())
}

fn analyze_lzma(_: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    info.set(Field::Codec, "lzma");
    Ok(())
}

static REGISTRY: LazyLock<Result<FormatDb>> = LazyLock::new(|| FormatDb::new(FORMATS));

/// The process-wide format database, built on first use
pub fn registry() -> Result<&'static FormatDb> {
    match &*REGISTRY {
        Ok(db) => Ok(db),
        Err(e) => Err(Error::Internal(format!("built-in format table rejected: {e}"))),
    }
}
