//! Fuzz target for deposition metadata parsing.
//!
//! Arbitrary bytes go through the metadata parser and, when they parse,
//! through validation and submission preparation.

#![no_main]

use chrono::NaiveDate;
use datalad_release::metadata::{from_json_slice, validate};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(mut metadata) = from_json_slice(data) {
        let _ = validate(&metadata);
        if let Some(today) = NaiveDate::from_ymd_opt(2024, 1, 1) {
            metadata.prepare_for_submission("v1", "https://github.com/org/repo", today);
        }
        let _ = serde_json::to_vec(&metadata);
    }
});
