#![no_main]

use libfuzzer_sys::fuzz_target;
use werewolf_arena_client::protocol::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = Envelope::decode(text) else {
        return;
    };

    let _ = envelope.is_ping();
    let _ = envelope.error_message();

    // Anything that decodes must encode and decode again.
    let encoded = envelope.encode().unwrap_or_default();
    assert!(Envelope::decode(&encoded).is_ok());
});
