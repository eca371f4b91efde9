#![no_main]

use libfuzzer_sys::fuzz_target;
use media_probe::{detect_into, Info, ReadSource, SliceSource};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Detection should NEVER panic, only return errors
    let mut info = Info::new();
    let result = detect_into(&mut SliceSource::new(data), &mut info);
    assert!(info.format().is_some());

    // A sequential reader must see the same result as the slice
    let mut streamed = Info::new();
    let streamed_result = detect_into(&mut ReadSource::new(Cursor::new(data)), &mut streamed);
    assert_eq!(result.is_ok(), streamed_result.is_ok());
    assert_eq!(info, streamed);
});
