//! Fuzz target for SOAP action responses and faults

#![no_main]

use libfuzzer_sys::fuzz_target;
use nat_upnp::ActionFault;
use nat_upnp::device::ActionResponse;

fuzz_target!(|data: &[u8]| {
    let body = String::from_utf8_lossy(data);

    if let Ok(response) = ActionResponse::parse("GetGenericPortMappingEntry", &body) {
        let _ = response.parse_field::<u16>("NewExternalPort");
        let _ = response.parse_field::<u32>("NewLeaseDuration");
    }

    let fault = ActionFault::parse(500, body.into_owned());
    let _ = fault.is_array_index_invalid();
});
