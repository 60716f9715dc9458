// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use chrono::{Local, TimeZone};
use libfuzzer_sys::fuzz_target;
use vault_triage::store::format_log_entry;
use vault_triage::Classification;

#[derive(Arbitrary, Debug)]
struct Input {
    filename: String,
    summary: String,
    needs_action: bool,
}

fuzz_target!(|input: Input| {
    let classification = if input.needs_action {
        Classification::NeedsAction
    } else {
        Classification::Done
    };
    let Some(at) = Local.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).single() else {
        return;
    };

    let entry = format_log_entry(&input.filename, &input.summary, classification, at);

    // An entry can never open a new heading level of its own
    let headings = entry.lines().filter(|l| l.starts_with('#')).count();
    assert_eq!(headings, 1);
    assert!(entry.ends_with('\n'));
});
