#![no_main]

use libfuzzer_sys::fuzz_target;
use launchwire::protocol::header::{read_message, IDENTITY_TAG, UNASSIGNED_INDEX};
use launchwire::protocol::{ConnectRequest, WireMessage};

fuzz_target!(|data: &[u8]| {
    // As a bare tail
    if let Ok(msg) = WireMessage::new(UNASSIGNED_INDEX, IDENTITY_TAG, data.to_vec()) {
        if let Ok(request) = ConnectRequest::unframe(&msg) {
            // parsed requests go back through the framer
            let _ = request.frame();
        }
    }

    // As a full header plus tail read off a stream
    let mut reader = data;
    if let Ok(msg) = read_message(&mut reader, 64 * 1024) {
        let _ = ConnectRequest::unframe(&msg);
    }
});
