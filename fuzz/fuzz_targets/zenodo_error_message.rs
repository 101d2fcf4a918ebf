//! Fuzz target for summarizing Zenodo error bodies.

#![no_main]

use datalad_release::zenodo::client::fuzz_error_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 || data.len() > 1024 * 1024 {
        return;
    }
    let status = u16::from_be_bytes([data[0], data[1]]);
    let body = String::from_utf8_lossy(&data[2..]);
    let summary = fuzz_error_message(status, &body);
    assert!(!summary.is_empty());
});
