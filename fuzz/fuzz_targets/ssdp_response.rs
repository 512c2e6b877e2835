//! Fuzz target for SSDP datagram parsing
//!
//! Replies arrive from any host on the LAN, so the decoder must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use nat_upnp::ssdp::{IGD_DEVICE, SearchRequest, SearchResponse};

fuzz_target!(|data: &[u8]| {
    if let Ok(response) = SearchResponse::decode(data) {
        let _ = response.matches(IGD_DEVICE);
        let _ = response.location();
        let _ = response.usn();
    }

    // Responders parse the other direction
    let _ = SearchRequest::decode(data);
});
