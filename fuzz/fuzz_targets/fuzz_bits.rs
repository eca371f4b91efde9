#![no_main]

use libfuzzer_sys::fuzz_target;
use media_probe::{
    bits::{encode_ebml_size, encode_leb128, read_base128, read_ebml_size, read_leb128, BitReader},
    SliceSource,
};

fuzz_target!(|data: &[u8]| {
    // Decoders must reject or decode, never panic or overrun
    if let Ok((value, used)) = read_leb128(data) {
        assert!(used <= data.len());
        assert_eq!(read_leb128(&encode_leb128(value)).map(|r| r.0).ok(), Some(value));
    }
    let _ = read_base128(&mut SliceSource::new(data));
    if let Ok(size) = read_ebml_size(&mut SliceSource::new(data)) {
        if let Ok(encoded) = encode_ebml_size(size) {
            assert_eq!(read_ebml_size(&mut SliceSource::new(&encoded)).ok(), Some(size));
        }
    }

    let mut reader = BitReader::new(data);
    while reader.bits_left() > 0 {
        let before = reader.bit_position();
        if reader.read_ue().is_err() {
            break;
        }
        assert!(reader.bit_position() > before);
    }
});
