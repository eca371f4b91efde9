//! AV1 low-overhead OBU stream and sequence header parser
//!
//! A raw AV1 stream (as produced by `aomenc --obu`) starts with a temporal
//! delimiter OBU followed by the sequence header OBU. The maximum frame size
//! is read from the sequence header using its own per-field bit widths.

use crate::{
    bits::{read_leb128, BitReader},
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use tracing::trace;

pub const OBU_SEQUENCE_HEADER: u8 = 1;
pub const OBU_TEMPORAL_DELIMITER: u8 = 2;
pub const OBU_METADATA: u8 = 5;
pub const OBU_PADDING: u8 = 15;

/// Bytes read from a raw stream; the sequence header is always near the start
pub const MAX_AV1_SCAN: usize = 4096;

/// Largest number of OBUs inspected before the sequence header
const MAX_LEADING_OBUS: usize = 8;

/// Fields of a sequence header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceHeader {
    pub profile: u8,
    pub still_picture: bool,
    pub max_frame_width: u32,
    pub max_frame_height: u32,
}

/// Variable-length code `uvlc()`
fn read_uvlc(br: &mut BitReader<'_>) -> Result<u32> {
    let mut leading_zeros = 0;
    while !br.read_flag()? {
        leading_zeros += 1;
        if leading_zeros >= 32 {
            return Ok(u32::MAX);
        }
    }
    let value = br.read_bits(leading_zeros)? as u64;
    Ok((value + (1u64 << leading_zeros) - 1).min(u32::MAX as u64) as u32)
}

/// Parses a sequence header OBU payload (AV1 5.5.1)
pub fn parse_sequence_header(payload: &[u8]) -> Result<SequenceHeader> {
    let mut br = BitReader::new(payload).named("av1 sequence header");
    let profile = br.read_bits(3)? as u8;
    if profile > 2 {
        return Err(Error::bad(format!("bad av1 seq_profile: {profile}")));
    }
    let still_picture = br.read_flag()?;
    let reduced_still_picture_header = br.read_flag()?;
    if reduced_still_picture_header {
        br.skip_bits(5)?; // seq_level_idx[0]
    } else {
        let mut decoder_model_info_present = false;
        let mut buffer_delay_length = 0;
        if br.read_flag()? {
            // timing_info()
            br.skip_bits(64)?;
            if br.read_flag()? {
                read_uvlc(&mut br)?; // num_ticks_per_picture_minus_1
            }
            decoder_model_info_present = br.read_flag()?;
            if decoder_model_info_present {
                buffer_delay_length = br.read_bits(5)? as usize + 1;
                br.skip_bits(32 + 5 + 5)?;
            }
        }
        let initial_display_delay_present = br.read_flag()?;
        let operating_points = br.read_bits(5)? + 1;
        for _ in 0..operating_points {
            br.skip_bits(12)?; // operating_point_idc
            if br.read_bits(5)? > 7 {
                br.skip_bits(1)?; // seq_tier
            }
            if decoder_model_info_present && br.read_flag()? {
                br.skip_bits(2 * buffer_delay_length + 1)?;
            }
            if initial_display_delay_present && br.read_flag()? {
                br.skip_bits(4)?;
            }
        }
    }
    let width_bits = br.read_bits(4)? + 1;
    let height_bits = br.read_bits(4)? + 1;
    let max_frame_width = br.read_bits(width_bits)? as u64 + 1;
    let max_frame_height = br.read_bits(height_bits)? as u64 + 1;
    Ok(SequenceHeader {
        profile,
        still_picture,
        max_frame_width: max_frame_width as u32,
        max_frame_height: max_frame_height as u32,
    })
}

/// Builds a video track from the start of a low-overhead OBU stream
///
/// `at_eof` tells whether `data` ends where the stream ends. A sequence
/// header cut short by the end of the stream yields a track without
/// dimensions; one cut short otherwise is an error.
pub fn parse_track(data: &[u8], at_eof: bool) -> Result<Track> {
    let mut pos = 0usize;
    for _ in 0..MAX_LEADING_OBUS {
        let Some(&header) = data.get(pos) else {
            return Err(Error::truncated("av1 obu header"));
        };
        if header & 0x80 != 0 {
            return Err(Error::bad("av1 obu forbidden bit set"));
        }
        let obu_type = (header >> 3) & 0xf;
        let has_extension = header & 4 != 0;
        if header & 2 == 0 {
            return Err(Error::bad("av1 obu without size field"));
        }
        pos += 1 + has_extension as usize;
        let (size, used) = read_leb128(data.get(pos..).unwrap_or(&[]))?;
        pos += used;
        let end = pos.saturating_add(size as usize);
        trace!(obu_type, size, "av1 obu");
        match obu_type {
            OBU_SEQUENCE_HEADER => {
                let payload = &data[pos.min(data.len())..end.min(data.len())];
                let mut track = Track::video("av1");
                match parse_sequence_header(payload) {
                    Ok(seq) => {
                        // Still images may be smaller than any video frame.
                        track.width = Some(seq.max_frame_width);
                        track.height = Some(seq.max_frame_height);
                    }
                    Err(Error::Truncated(_)) if at_eof && end > data.len() => {}
                    Err(e) => return Err(e),
                }
                return Ok(track);
            }
            OBU_TEMPORAL_DELIMITER | OBU_METADATA | OBU_PADDING => pos = end,
            other => {
                return Err(Error::bad(format!("av1 obu type {other} before sequence header")));
            }
        }
    }
    Err(Error::bad("av1 sequence header not found"))
}

/// Analyzes a raw AV1 OBU stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_AV1_SCAN)?;
    info.set_format("av1");
    let track = parse_track(&data, data.len() < MAX_AV1_SCAN)?;
    info.add_track(track);
    Ok(())
}
