#![no_main]

use libfuzzer_sys::fuzz_target;
use werewolf_arena_client::protocol::{session_endpoint, SessionId};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(id) = SessionId::new(raw) {
        // Accepted ids never escape the `/ws/{id}` path segment.
        let endpoint = session_endpoint("ws://localhost:8000", &id);
        assert_eq!(endpoint.matches("/ws/").count(), 1);
        assert!(endpoint.ends_with(id.as_str()));
        assert!(!endpoint.contains('?') && !endpoint.contains('#'));
    }
});
