//! Bitstream and variable-length integer primitives
//!
//! Shared by every codec parser and container walker:
//! - [`BitReader`]: MSB-first bit cursor with Exp-Golomb decoding (H.264,
//!   H.265, AV1, VP9, MPEG video)
//! - [`LsbBitReader`]: LSB-first bit cursor (VP8L, VP8 frame tags)
//! - LEB128 (AV1 OBU sizes) and base-128 (BRN) decoders
//! - EBML variable-length element IDs and sizes (Matroska)
//! - IEEE half precision and 80-bit extended floats (AIFF sample rates)
//! - removal of H.264/H.265 emulation prevention bytes
//!
//! Running out of bits is always [`Error::Truncated`], never a panic.

use crate::{
    error::{Error, Result},
    source::{ByteSource, ByteSourceExt},
};

/// Longest Exp-Golomb prefix accepted; values must fit in 32 bits
const MAX_EXP_GOLOMB_ZEROS: u32 = 31;

/// Largest LEB128 encoding, in bytes
pub const MAX_LEB128_BYTES: usize = 8;

/// Largest base-128 encoding, in bytes
pub const MAX_BASE128_BYTES: usize = 9;

/// EBML size encodings with all value bits set mean "unknown size"
pub const EBML_UNKNOWN_SIZE: u64 = u64::MAX;

/// MSB-first bit reader over a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
    what: &'static str,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_pos: 0,
            what: "bitstream",
        }
    }

    /// Names the structure being parsed, for error messages
    pub fn named(mut self, what: &'static str) -> Self {
        self.what = what;
        self
    }

    /// Bits not yet consumed
    pub fn bits_left(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn read_bit(&mut self) -> Result<u32> {
        if self.bit_pos >= self.data.len() * 8 {
            return Err(Error::truncated(self.what));
        }
        let byte = self.data[self.bit_pos >> 3];
        let bit = (byte >> (7 - (self.bit_pos & 7))) & 1;
        self.bit_pos += 1;
        Ok(bit as u32)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_bit()? != 0)
    }

    /// Reads `n` bits (at most 32) as an unsigned big-endian value
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        if n as usize > self.bits_left() {
            return Err(Error::truncated(self.what));
        }
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u64;
        }
        Ok(value as u32)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if n > self.bits_left() {
            self.bit_pos = self.data.len() * 8;
            return Err(Error::truncated(self.what));
        }
        self.bit_pos += n;
        Ok(())
    }

    /// Skips to the next byte boundary
    pub fn byte_align(&mut self) {
        self.bit_pos = (self.bit_pos + 7) & !7;
        self.bit_pos = self.bit_pos.min(self.data.len() * 8);
    }

    /// Unsigned Exp-Golomb code, `ue(v)`
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > MAX_EXP_GOLOMB_ZEROS {
                return Err(Error::bad(format!("Exp-Golomb code too long in {}", self.what)));
            }
        }
        if zeros == 0 {
            return Ok(0);
        }
        let rest = self.read_bits(zeros)? as u64;
        Ok(((1u64 << zeros) - 1 + rest) as u32)
    }

    /// Signed Exp-Golomb code, `se(v)`
    pub fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()? as i64;
        let v = if k & 1 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(v as i32)
    }
}

/// LSB-first bit reader over a byte slice
#[derive(Debug, Clone)]
pub struct LsbBitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> LsbBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Reads `n` bits (at most 32), least significant first
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        debug_assert!(n <= 32);
        if self.bit_pos + n as usize > self.data.len() * 8 {
            return Err(Error::truncated("LSB bitstream"));
        }
        let mut value = 0u64;
        for i in 0..n {
            let byte = self.data[self.bit_pos >> 3];
            let bit = (byte >> (self.bit_pos & 7)) & 1;
            value |= (bit as u64) << i;
            self.bit_pos += 1;
        }
        Ok(value as u32)
    }
}

/// Decodes an unsigned LEB128 value (AV1 `leb128()`), returning the value
/// and the number of bytes used
///
/// At most [`MAX_LEB128_BYTES`] bytes are read and the value must fit in
/// 32 bits.
pub fn read_leb128(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for i in 0..MAX_LEB128_BYTES {
        let Some(&b) = data.get(i) else {
            return Err(Error::truncated("leb128"));
        };
        value |= ((b & 0x7f) as u64) << (i * 7);
        if b & 0x80 == 0 {
            if value > u32::MAX as u64 {
                return Err(Error::bad("leb128 value too large"));
            }
            return Ok((value, i + 1));
        }
    }
    Err(Error::bad("leb128 too long"))
}

/// Encodes `value` as unsigned LEB128
pub fn encode_leb128(mut value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let b = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(b);
            return out;
        }
        out.push(b | 0x80);
    }
}

/// Reads a little-endian base-128 varint from a source (BRN headers),
/// returning the value and the number of bytes used
pub fn read_base128<S: ByteSource + ?Sized>(src: &mut S) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for i in 0..MAX_BASE128_BYTES {
        let b = src.read_byte("base128")?;
        let shift = i * 7;
        if shift > 57 {
            return Err(Error::bad("base128 value too large"));
        }
        value |= ((b & 0x7f) as u64) << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::bad("base128 value too large"))
}

/// Reads an EBML element ID (1 to 4 bytes, marker bit kept)
pub fn read_ebml_id<S: ByteSource + ?Sized>(src: &mut S) -> Result<u32> {
    let first = src.read_byte("EBML element ID")?;
    let len = first.leading_zeros() as usize + 1;
    if len > 4 {
        return Err(Error::bad(format!("invalid EBML ID first byte 0x{first:02x}")));
    }
    let mut id = first as u32;
    for _ in 1..len {
        id = (id << 8) | src.read_byte("EBML element ID")? as u32;
    }
    Ok(id)
}

/// Reads an EBML element size (1 to 8 bytes, marker bit stripped)
///
/// Returns [`EBML_UNKNOWN_SIZE`] for the reserved all-ones encoding.
pub fn read_ebml_size<S: ByteSource + ?Sized>(src: &mut S) -> Result<u64> {
    let first = src.read_byte("EBML element size")?;
    if first == 0 {
        return Err(Error::bad("invalid EBML size first byte 0x00"));
    }
    let len = first.leading_zeros() as usize + 1;
    let mut value = (first as u64) & ((1u64 << (8 - len)) - 1);
    let mut all_ones = value == (1u64 << (8 - len)) - 1;
    for _ in 1..len {
        let b = src.read_byte("EBML element size")?;
        all_ones &= b == 0xff;
        value = (value << 8) | b as u64;
    }
    if all_ones {
        return Ok(EBML_UNKNOWN_SIZE);
    }
    Ok(value)
}

/// Encodes an EBML element size using the shortest form
///
/// Values at or above 2^56 - 1 cannot be represented.
pub fn encode_ebml_size(value: u64) -> Result<Vec<u8>> {
    for len in 1..=8usize {
        let max = (1u64 << (7 * len)) - 1;
        if value < max {
            let marker = 1u64 << (7 * len);
            let v = value | marker;
            return Ok(v.to_be_bytes()[8 - len..].to_vec());
        }
    }
    Err(Error::bad(format!("EBML size {value} too large")))
}

/// Decodes an IEEE 754 half-precision float
pub fn float16(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = ((bits >> 10) & 0x1f) as i32;
    let frac = (bits & 0x3ff) as f64;
    match exp {
        0 => sign * frac * 2f64.powi(-24),
        31 if frac == 0.0 => sign * f64::INFINITY,
        31 => f64::NAN,
        _ => sign * (1.0 + frac / 1024.0) * 2f64.powi(exp - 15),
    }
}

/// Decodes an 80-bit IEEE 754 extended precision float (big-endian, as in
/// AIFF `COMM` chunks)
pub fn float80(bytes: &[u8; 10]) -> f64 {
    let sign_exp = u16::from_be_bytes([bytes[0], bytes[1]]);
    let mut mant_bytes = [0u8; 8];
    mant_bytes.copy_from_slice(&bytes[2..]);
    let mantissa = u64::from_be_bytes(mant_bytes);
    let sign = if sign_exp & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = (sign_exp & 0x7fff) as i32;
    if exp == 0 && mantissa == 0 {
        return 0.0;
    }
    if exp == 0x7fff {
        return if mantissa << 1 == 0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        };
    }
    sign * (mantissa as f64) * 2f64.powi(exp - 16383 - 63)
}

/// Removes emulation prevention bytes (`00 00 03` becomes `00 00`)
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}
