//! H.264 / AVC sequence parameter set parser
//!
//! Dimensions are derived from the macroblock counts minus the cropping
//! rectangle, scaled by the chroma subsampling factors (ITU-T H.264 7.4.2.1.1).

use super::{NalUnits, MAX_ES_SCAN};
use crate::{
    bits::{strip_emulation_prevention, BitReader},
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};
use tracing::trace;

/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;

/// Profiles whose SPS carries chroma format and bit depth fields
const HIGH_PROFILES: &[u8] = &[100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Upper bound on `num_ref_frames_in_pic_order_cnt_cycle`
const MAX_POC_CYCLE: u32 = 255;

/// Decoded fields of a sequence parameter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    pub chroma_format_idc: u32,
    pub width: u32,
    pub height: u32,
}

/// Parses an SPS NAL unit, including its one-byte NAL header
pub fn parse_sps(nal: &[u8]) -> Result<Sps> {
    let Some(&header) = nal.first() else {
        return Err(Error::truncated("h264 sps"));
    };
    if header & 0x80 != 0 || header & 0x1f != NAL_SPS {
        return Err(Error::bad(format!("not an h264 sps NAL unit: 0x{header:02x}")));
    }
    let rbsp = strip_emulation_prevention(&nal[1..]);
    if rbsp.len() < 4 {
        return Err(Error::truncated("h264 sps"));
    }
    let (profile_idc, constraint_flags, level_idc) = (rbsp[0], rbsp[1], rbsp[2]);
    let mut br = BitReader::new(&rbsp[3..]).named("h264 sps");

    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(Error::bad(format!("bad h264 sps id: {sps_id}")));
    }
    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(Error::bad(format!("bad h264 chroma_format_idc: {chroma_format_idc}")));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag()?;
        }
        br.read_ue()?; // bit_depth_luma_minus8
        br.read_ue()?; // bit_depth_chroma_minus8
        br.read_flag()?; // qpprime_y_zero_transform_bypass_flag
        if br.read_flag()? {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if br.read_flag()? {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }
    br.read_ue()?; // log2_max_frame_num_minus4
    match br.read_ue()? {
        0 => {
            br.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        }
        1 => {
            br.read_flag()?; // delta_pic_order_always_zero_flag
            br.read_se()?; // offset_for_non_ref_pic
            br.read_se()?; // offset_for_top_to_bottom_field
            let cycle = br.read_ue()?;
            if cycle > MAX_POC_CYCLE {
                return Err(Error::bad(format!("h264 poc cycle too long: {cycle}")));
            }
            for _ in 0..cycle {
                br.read_se()?;
            }
        }
        2 => {}
        other => return Err(Error::bad(format!("bad h264 pic_order_cnt_type: {other}"))),
    }
    br.read_ue()?; // max_num_ref_frames
    br.read_flag()?; // gaps_in_frame_num_value_allowed_flag
    let width_in_mbs = br.read_ue()? as u64 + 1;
    let height_in_map_units = br.read_ue()? as u64 + 1;
    let frame_mbs_only = br.read_flag()?;
    if !frame_mbs_only {
        br.read_flag()?; // mb_adaptive_frame_field_flag
    }
    br.read_flag()?; // direct_8x8_inference_flag
    let mut crop = [0u64; 4];
    if br.read_flag()? {
        for c in &mut crop {
            *c = br.read_ue()? as u64;
        }
    }

    let chroma_array_type = if separate_colour_plane { 0 } else { chroma_format_idc };
    let (sub_width, sub_height) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let field_factor = if frame_mbs_only { 1 } else { 2 };
    let crop_x = sub_width * (crop[0] + crop[1]);
    let crop_y = sub_height * field_factor * (crop[2] + crop[3]);
    let width = (width_in_mbs * 16).checked_sub(crop_x);
    let height = (field_factor * height_in_map_units * 16).checked_sub(crop_y);
    let (Some(width), Some(height)) = (width, height) else {
        return Err(Error::bad("h264 cropping exceeds frame size"));
    };
    if width > u32::MAX as u64 || height > u32::MAX as u64 {
        return Err(Error::bad("h264 frame size too large"));
    }
    Ok(Sps {
        profile_idc,
        constraint_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        width: width as u32,
        height: height as u32,
    })
}

fn skip_scaling_list(br: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            next_scale = (last_scale + br.read_se()?).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Parses the first SPS of an `AVCDecoderConfigurationRecord` (the `avcC`
/// payload of MP4 and FLV)
pub fn parse_avcc(record: &[u8]) -> Result<Sps> {
    if record.len() < 8 {
        return Err(Error::truncated("h264 avcc"));
    }
    if record[0] != 1 {
        return Err(Error::bad(format!("bad h264 avcc version: {}", record[0])));
    }
    // Some muxers leave the reserved bits clear.
    let sps_count = record[5] & 0x1f;
    if sps_count == 0 {
        return Err(Error::bad("h264 avcc without sps"));
    }
    let size = u16::from_be_bytes([record[6], record[7]]) as usize;
    let nal = record.get(8..8 + size).ok_or_else(|| Error::truncated("h264 avcc sps"))?;
    let sps = parse_sps(nal)?;
    if (sps.profile_idc, sps.level_idc) != (record[1], record[3]) {
        trace!(
            avcc_profile = record[1],
            sps_profile = sps.profile_idc,
            "h264 avcc and sps disagree"
        );
    }
    Ok(sps)
}

/// Finds the first SPS in an Annex-B byte stream
pub fn find_sps(data: &[u8]) -> Option<&[u8]> {
    NalUnits::new(data).find(|nal| nal.first().map(|b| b & 0x1f) == Some(NAL_SPS))
}

/// Builds a video track from the start of an Annex-B elementary stream
pub fn parse_track(data: &[u8]) -> Result<Track> {
    let Some(nal) = find_sps(data) else {
        return Err(Error::bad("h264 sps not found"));
    };
    let sps = parse_sps(nal)?;
    let mut track = Track::video("h264");
    track.set_dimensions(sps.width, sps.height)?;
    track.set_extra("profile", sps.profile_idc as u64);
    track.set_extra("level", sps.level_idc as u64);
    Ok(track)
}

/// Analyzes a raw H.264 Annex-B stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_ES_SCAN)?;
    info.set_format("h264");
    trace!(len = data.len(), "scanning h264 stream");
    let track = parse_track(&data)?;
    info.add_track(track);
    Ok(())
}
