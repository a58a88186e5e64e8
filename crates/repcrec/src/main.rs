// RepCRec simulator binary entry point.
//
// `run` executes one instruction script (from a file or stdin) and writes the
// transcript to stdout; `verify` replays a directory of `.in` scripts against
// their `.ans` transcripts.

use std::fs;
use std::io::{self, BufWriter, IsTerminal, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use repcrec::render::{JsonLinesRenderer, TextRenderer};
use repcrec::verify;
use repcrec_core::txn::{RunSummary, SimConfig, DEFAULT_SITES, DEFAULT_VARIABLES};

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "repcrec")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run one script.
    Run(RunArgs),
    /// Check every `*.in` script in a directory against its `*.ans` transcript.
    Verify(VerifyArgs),
}

/// Catalog dimensions shared by every subcommand.
#[derive(Parser, Debug, Clone)]
struct SimArgs {
    /// Number of sites.
    #[arg(long, env = "REPCREC_SITES", default_value_t = DEFAULT_SITES)]
    sites: u32,

    /// Number of variables (`x1` .. `xN`).
    #[arg(long, env = "REPCREC_VARIABLES", default_value_t = DEFAULT_VARIABLES)]
    variables: u32,
}

impl SimArgs {
    fn config(&self) -> anyhow::Result<SimConfig> {
        let config = SimConfig {
            sites: self.sites,
            variables: self.variables,
        };
        config.validate().context("invalid simulator configuration")?;
        Ok(config)
    }
}

/// Output format for `run`.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Script to run. Reads stdin when omitted.
    file: Option<PathBuf>,

    #[command(flatten)]
    sim: SimArgs,

    /// Transcript format: text (default) or json (one event per line).
    #[arg(long, env = "REPCREC_FORMAT", default_value = "text")]
    format: Format,

    /// Print a line the first time an instruction blocks (text format only).
    #[arg(long)]
    show_blocked: bool,
}

#[derive(Parser, Debug)]
struct VerifyArgs {
    /// Directory holding `NAME.in` / `NAME.ans` pairs.
    dir: PathBuf,

    #[command(flatten)]
    sim: SimArgs,
}

/// Parse CLI args, initialize logging, and run the requested subcommand.
fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the transcript.
    let ansi = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Run(args) => run(args),
        Command::Verify(args) => run_verify(args),
    }
}

fn read_script(file: Option<&PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))
        }
        None => {
            let mut script = String::new();
            io::stdin()
                .read_to_string(&mut script)
                .context("read script from stdin")?;
            Ok(script)
        }
    }
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.sim.config()?;
    let script = read_script(args.file.as_ref())?;
    let stdout = io::stdout();
    let out = BufWriter::new(stdout.lock());

    let summary = match args.format {
        Format::Text => {
            let mut renderer = TextRenderer::new(out).with_blocked(args.show_blocked);
            let summary = repcrec::run_script(&script, &config, &mut renderer)?;
            finish(renderer.into_inner())?;
            summary
        }
        Format::Json => {
            let mut renderer = JsonLinesRenderer::new(out);
            let summary = repcrec::run_script(&script, &config, &mut renderer)?;
            finish(renderer.into_inner())?;
            summary
        }
    };
    log_summary(&summary);
    Ok(())
}

fn finish(mut out: impl Write) -> anyhow::Result<()> {
    out.flush().context("flush stdout")
}

fn log_summary(summary: &RunSummary) {
    tracing::info!(
        ticks = summary.ticks,
        committed = summary.committed.len(),
        deadlock_aborts = summary.deadlock_aborts.len(),
        site_failure_aborts = summary.site_failure_aborts.len(),
        unknown = summary.unknown,
        starved = summary.starved.len(),
        "run finished"
    );
}

fn run_verify(args: VerifyArgs) -> anyhow::Result<()> {
    let config = args.sim.config()?;
    let cases = verify::discover(&args.dir)?;
    if cases.is_empty() {
        bail!("no .in/.ans pairs found in {}", args.dir.display());
    }

    let mut failed = 0usize;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for case in &cases {
        let result = verify::check(case, &config)?;
        match &result.mismatch {
            None => writeln!(out, "ok   {}", case.name)?,
            Some(mismatch) => {
                failed += 1;
                writeln!(out, "FAIL {}", case.name)?;
                writeln!(out, "--- expected\n{}", mismatch.expected.trim_end())?;
                writeln!(out, "--- actual\n{}", mismatch.actual.trim_end())?;
            }
        }
    }
    writeln!(out, "{} passed, {failed} failed", cases.len() - failed)?;
    out.flush().context("flush stdout")?;
    if failed > 0 {
        bail!("{failed} of {} scripts did not match", cases.len());
    }
    Ok(())
}
