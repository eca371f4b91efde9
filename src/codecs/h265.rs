//! H.265 / HEVC sequence parameter set parser

use super::{NalUnits, MAX_ES_SCAN};
use crate::{
    bits::{strip_emulation_prevention, BitReader},
    error::{Error, Result},
    info::{Info, Track},
    source::{ByteSource, ByteSourceExt},
};

/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 33;

/// Decoded fields of a sequence parameter set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    pub width: u32,
    pub height: u32,
}

fn nal_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|b| (b >> 1) & 0x3f)
}

/// Parses an SPS NAL unit, including its two-byte NAL header
pub fn parse_sps(nal: &[u8]) -> Result<Sps> {
    if nal.len() < 2 {
        return Err(Error::truncated("h265 sps"));
    }
    if nal[0] & 0x80 != 0 || nal_type(nal) != Some(NAL_SPS) {
        return Err(Error::bad(format!("not an h265 sps NAL unit: 0x{:02x}", nal[0])));
    }
    let rbsp = strip_emulation_prevention(&nal[2..]);
    let mut br = BitReader::new(&rbsp).named("h265 sps");

    br.skip_bits(4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = br.read_bits(3)?;
    if max_sub_layers_minus1 > 6 {
        return Err(Error::bad(format!("bad h265 sps_max_sub_layers: {}", max_sub_layers_minus1 + 1)));
    }
    br.skip_bits(1)?; // sps_temporal_id_nesting_flag

    // profile_tier_level(1, max_sub_layers_minus1)
    br.skip_bits(3)?; // general_profile_space, general_tier_flag
    let profile_idc = br.read_bits(5)? as u8;
    br.skip_bits(32 + 4 + 43 + 1)?;
    let level_idc = br.read_bits(8)? as u8;
    let mut sub_layers = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        sub_layers.push((br.read_flag()?, br.read_flag()?));
    }
    if max_sub_layers_minus1 > 0 {
        br.skip_bits(2 * (8 - max_sub_layers_minus1 as usize))?;
    }
    for (profile_present, level_present) in sub_layers {
        if profile_present {
            br.skip_bits(88)?;
        }
        if level_present {
            br.skip_bits(8)?;
        }
    }

    let sps_id = br.read_ue()?;
    if sps_id > 15 {
        return Err(Error::bad(format!("bad h265 sps id: {sps_id}")));
    }
    let chroma_format_idc = br.read_ue()?;
    if chroma_format_idc > 3 {
        return Err(Error::bad(format!("bad h265 chroma_format_idc: {chroma_format_idc}")));
    }
    if chroma_format_idc == 3 {
        br.skip_bits(1)?; // separate_colour_plane_flag
    }
    let pic_width = br.read_ue()? as u64;
    let pic_height = br.read_ue()? as u64;
    let mut window = [0u64; 4];
    if br.read_flag()? {
        for w in &mut window {
            *w = br.read_ue()? as u64;
        }
    }
    let (sub_width, sub_height) = match chroma_format_idc {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let width = pic_width.checked_sub(sub_width * (window[0] + window[1]));
    let height = pic_height.checked_sub(sub_height * (window[2] + window[3]));
    let (Some(width), Some(height)) = (width, height) else {
        return Err(Error::bad("h265 conformance window exceeds picture size"));
    };
    Ok(Sps {
        profile_idc,
        level_idc,
        chroma_format_idc,
        width: width.min(u32::MAX as u64) as u32,
        height: height.min(u32::MAX as u64) as u32,
    })
}

/// Builds a video track from the start of an Annex-B elementary stream
pub fn parse_track(data: &[u8]) -> Result<Track> {
    let Some(nal) = NalUnits::new(data).find(|nal| nal_type(nal) == Some(NAL_SPS)) else {
        return Err(Error::bad("h265 sps not found"));
    };
    let sps = parse_sps(nal)?;
    let mut track = Track::video("h265");
    track.set_dimensions(sps.width, sps.height)?;
    track.set_extra("profile", sps.profile_idc as u64);
    Ok(track)
}

/// Analyzes a raw H.265 Annex-B stream
pub fn analyze(src: &mut dyn ByteSource, info: &mut Info) -> Result<()> {
    let data = src.read_vec(MAX_ES_SCAN)?;
    info.set_format("h265");
    let track = parse_track(&data)?;
    info.add_track(track);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        "0000000146015000000001", // access unit delimiter
        "40010c01ffff01600000030090000003000003003c95980900000001", // VPS
        "42010101600000030090000003000003003ca00b08048596566924caf0101000000300100000030190",
        "80"
    );

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_cif_stream() {
        let track = parse_track(&hex(STREAM)).unwrap();
        assert_eq!(track.codec, "h265");
        assert_eq!((track.width, track.height), (Some(352), Some(288)));
    }

    #[test]
    fn test_sps_fields() {
        let data = hex(STREAM);
        let nal = NalUnits::new(&data).nth(2).unwrap();
        let sps = parse_sps(nal).unwrap();
        assert_eq!(sps.profile_idc, 1);
        assert_eq!(sps.chroma_format_idc, 1);
    }

    #[test]
    fn test_truncated_sps() {
        let data = hex("00000001420101016000000300");
        assert!(matches!(parse_track(&data), Err(Error::Truncated(_))));
    }

    #[test]
    fn test_missing_sps() {
        assert!(matches!(parse_track(&hex("0000000146015000")), Err(Error::InvalidFormat(_))));
    }
}
