#![no_main]

use libfuzzer_sys::fuzz_target;
use launchwire::core::{unpack, Buffer, BufferMode, DataType};

fuzz_target!(|data: &[u8]| {
    // First byte picks the mode and the requested kind
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let mode = if selector & 0x80 == 0 {
        BufferMode::SelfDescribing
    } else {
        BufferMode::Condensed
    };
    let tag = DataType::ALL[usize::from(selector & 0x7F) % DataType::ALL.len()];

    let mut buf = Buffer::from_bytes(mode, rest.to_vec());
    while buf.remaining() > 0 {
        let before = buf.unpack_cursor();
        if unpack(&mut buf, tag, 64).is_err() {
            assert_eq!(buf.unpack_cursor(), before);
            break;
        }
        if buf.unpack_cursor() == before {
            break;
        }
    }
});
