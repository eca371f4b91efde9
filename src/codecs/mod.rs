//! Elementary stream header parsers
//!
//! Each codec module exposes a `parse_track` function that turns the first
//! bytes of an elementary stream into a [`Track`](crate::info::Track), used by
//! the transport and program stream walkers, and an `analyze` function for
//! raw elementary stream files.
//!
//! Bitstream exhaustion always surfaces as [`Error::Truncated`](crate::Error).

pub mod av1;
pub mod h264;
pub mod h265;
pub mod mpeg_audio;
pub mod mpeg_video;
pub mod vp8;
pub mod vp9;

/// Most bytes read from a raw elementary stream while looking for a
/// parameter set
pub const MAX_ES_SCAN: usize = 65536;

/// Iterator over Annex-B NAL units (the bytes between `00 00 01` start
/// codes, trailing zero bytes removed)
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: Option<usize>,
}

impl<'a> NalUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).map(|sc| sc + 3);
        Self { data, pos }
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let start = self.pos?;
        let (end, next) = match find_start_code(self.data, start) {
            Some(sc) => (sc, Some(sc + 3)),
            None => (self.data.len(), None),
        };
        self.pos = next;
        let mut nal = &self.data[start..end];
        while let [rest @ .., 0] = nal {
            nal = rest;
        }
        Some(nal)
    }
}

/// Offset of the next `00 00 01` at or after `from`
pub(crate) fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0, 0, 1])
        .map(|p| from + p)
}
