//! Script front end for the RepCRec simulator: instruction parsing, output
//! rendering and golden-file verification around `repcrec_core`.

pub mod parse;
pub mod render;
pub mod verify;

use anyhow::Context;
use repcrec_core::txn::{EventSink, RunSummary, Scheduler, SimConfig};

pub use render::{JsonLinesRenderer, TextRenderer};

/// Parse `script` and run it on a fresh simulator.
pub fn run_script<S>(script: &str, config: &SimConfig, sink: &mut S) -> anyhow::Result<RunSummary>
where
    S: EventSink + ?Sized,
{
    let mut scheduler = Scheduler::new(config)?;
    scheduler.run(parse::parse_script(script), sink)
}

/// Run `script` and return its text transcript.
pub fn run_to_string(script: &str, config: &SimConfig) -> anyhow::Result<String> {
    let mut renderer = TextRenderer::new(Vec::new());
    run_script(script, config, &mut renderer)?;
    String::from_utf8(renderer.into_inner()).context("transcript is not UTF-8")
}
