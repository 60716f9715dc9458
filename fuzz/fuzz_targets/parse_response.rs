// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use vault_triage::classifier::{build_prompt, parse_response, MAX_SUMMARY_LINES};

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let parsed = parse_response(raw);
    if let Some(summary) = parsed.summary {
        assert!(summary.lines().count() <= MAX_SUMMARY_LINES);
    }

    // Prompt truncation must never split a character
    let _ = build_prompt(raw, data.len() / 2);
});
