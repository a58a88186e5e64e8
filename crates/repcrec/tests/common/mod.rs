//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use repcrec_core::txn::{Event, RunSummary, SimConfig};

/// Directory of `.in`/`.ans` transcript pairs.
pub fn data_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("data")
}

/// Text transcript of `script` on the default 10-site catalog.
pub fn transcript(script: &str) -> String {
    repcrec::run_to_string(script, &SimConfig::default()).expect("run script")
}

/// Raw events and summary of `script` on the default catalog.
pub fn events(script: &str) -> (Vec<Event>, RunSummary) {
    let mut events = Vec::new();
    let summary =
        repcrec::run_script(script, &SimConfig::default(), &mut events).expect("run script");
    (events, summary)
}

/// `site N - ...` line for `site` from the last dump in `transcript`.
pub fn dump_line(transcript: &str, site: u32) -> String {
    let prefix = format!("site {site} - ");
    transcript
        .lines()
        .rev()
        .find(|line| line.starts_with(&prefix))
        .unwrap_or_else(|| panic!("no dump line for site {site} in:\n{transcript}"))
        .to_string()
}

/// Path of the compiled `repcrec` binary.
pub fn repcrec_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_repcrec"))
}
