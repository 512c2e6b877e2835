//! Fuzz target for device description parsing

#![no_main]

use libfuzzer_sys::fuzz_target;
use nat_upnp::device::DeviceDescription;
use url::Url;

fuzz_target!(|data: &[u8]| {
    let Ok(xml) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(location) = Url::parse("http://192.168.1.1:5000/rootDesc.xml") else {
        return;
    };

    // Should return Ok or Err, never panic (URLBase and controlURL are attacker-controlled)
    let _ = DeviceDescription::parse(xml, &location);
});
