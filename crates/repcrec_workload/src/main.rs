//! Workload generator for soak-testing the RepCRec scheduler.
//!
//! `generate` writes a random but seeded instruction script; `run` generates
//! one or more scripts and executes them in-process, reporting commits,
//! aborts per reason and starvation.

use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use repcrec_core::txn::{
    Instruction, RunSummary, SimConfig, SiteId, TxnName, DEFAULT_SITES, DEFAULT_VARIABLES,
};
use serde::Serialize;

/// CLI entry point wrapper.
#[derive(Parser, Debug)]
#[command(name = "repcrec-workload")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Write one generated script.
    Generate(GenerateArgs),
    /// Generate and execute scripts, printing a JSON summary per script.
    Run(RunArgs),
}

/// Shape of a generated script.
#[derive(Parser, Debug, Clone)]
struct WorkloadArgs {
    #[arg(long, env = "REPCREC_SITES", default_value_t = DEFAULT_SITES)]
    sites: u32,

    #[arg(long, env = "REPCREC_VARIABLES", default_value_t = DEFAULT_VARIABLES)]
    variables: u32,

    /// Total transactions to begin.
    #[arg(long, default_value_t = 20)]
    txns: usize,

    /// Maximum transactions live at once.
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Reads/writes issued by each transaction before it ends.
    #[arg(long, default_value_t = 4)]
    ops_per_txn: usize,

    /// Percent of data operations that are writes.
    #[arg(long, default_value_t = 40)]
    write_pct: u8,

    /// Percent of transactions that are read-only.
    #[arg(long, default_value_t = 10)]
    read_only_pct: u8,

    /// Percent chance per step of failing or recovering a site.
    #[arg(long, default_value_t = 5)]
    fault_pct: u8,

    /// Random seed (0 picks a random seed).
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

#[derive(Parser, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    workload: WorkloadArgs,

    /// Output path. Writes to stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    workload: WorkloadArgs,

    /// Number of scripts to run; script `i` uses seed `seed + i`.
    #[arg(long, default_value_t = 1)]
    iterations: u64,
}

/// Per-script report printed by `run`.
#[derive(Serialize, Debug)]
struct Report {
    seed: u64,
    instructions: usize,
    #[serde(flatten)]
    summary: RunSummary,
}

fn main() -> anyhow::Result<()> {
    let ansi = io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,repcrec_core=warn".into()),
        )
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Generate(args) => generate(args),
        Command::Run(args) => run(args),
    }
}

impl WorkloadArgs {
    fn validate(&self) -> anyhow::Result<SimConfig> {
        anyhow::ensure!(self.txns > 0, "--txns must be > 0");
        anyhow::ensure!(self.concurrency > 0, "--concurrency must be > 0");
        anyhow::ensure!(self.write_pct <= 100, "--write-pct must be <= 100");
        anyhow::ensure!(self.read_only_pct <= 100, "--read-only-pct must be <= 100");
        anyhow::ensure!(self.fault_pct < 100, "--fault-pct must be < 100");
        let config = SimConfig {
            sites: self.sites,
            variables: self.variables,
        };
        config.validate()?;
        Ok(config)
    }

    fn seed(&self) -> u64 {
        // Use a random seed when the user provides zero.
        if self.seed == 0 {
            rand::thread_rng().gen()
        } else {
            self.seed
        }
    }
}

fn generate(args: GenerateArgs) -> anyhow::Result<()> {
    let config = args.workload.validate()?;
    let seed = args.workload.seed();
    let script = render(&build_script(&args.workload, &config, seed));
    match &args.out {
        Some(path) => {
            fs::write(path, &script).with_context(|| format!("write {}", path.display()))?;
            tracing::info!(seed, path = %path.display(), "wrote script");
        }
        None => {
            let mut out = io::stdout().lock();
            out.write_all(script.as_bytes()).context("write script")?;
            out.flush().context("flush stdout")?;
        }
    }
    Ok(())
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.workload.validate()?;
    anyhow::ensure!(args.iterations > 0, "--iterations must be > 0");
    let base_seed = args.workload.seed();

    let mut out = io::stdout().lock();
    let mut starved_runs = 0u64;
    for i in 0..args.iterations {
        let seed = base_seed.wrapping_add(i);
        let instructions = build_script(&args.workload, &config, seed);
        let script = render(&instructions);
        let mut events = Vec::new();
        let summary = repcrec::run_script(&script, &config, &mut events)
            .with_context(|| format!("run script for seed {seed}"))?;
        if !summary.starved.is_empty() {
            starved_runs += 1;
            tracing::warn!(seed, stuck = summary.starved.len(), "script starved");
        }
        let report = Report {
            seed,
            instructions: instructions.len(),
            summary,
        };
        serde_json::to_writer(&mut out, &report).context("encode report")?;
        out.write_all(b"\n").context("write report")?;
    }
    out.flush().context("flush stdout")?;
    tracing::info!(iterations = args.iterations, starved_runs, "workload finished");
    Ok(())
}

fn render(instructions: &[Instruction]) -> String {
    let mut script = String::new();
    for instruction in instructions {
        script.push_str(&instruction.to_string());
        script.push('\n');
    }
    script
}

/// Live transaction in the generator.
struct Live {
    name: TxnName,
    read_only: bool,
    remaining: usize,
}

/// Build a script. Every begun transaction is ended and every failed site is
/// recovered before the final ends, so only lock waits and unreadable copies
/// can leave instructions stuck.
fn build_script(args: &WorkloadArgs, config: &SimConfig, seed: u64) -> Vec<Instruction> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut script = Vec::new();
    let mut live: Vec<Live> = Vec::new();
    let mut down: Vec<SiteId> = Vec::new();
    let mut begun = 0usize;

    while begun < args.txns || !live.is_empty() {
        if rng.gen_range(0..100) < u32::from(args.fault_pct) {
            // Keep at least one site up.
            let can_fail = down.len() + 1 < config.sites as usize;
            if !down.is_empty() && (!can_fail || rng.gen_bool(0.5)) {
                let idx = rng.gen_range(0..down.len());
                script.push(Instruction::Recover {
                    site: down.swap_remove(idx),
                });
            } else if can_fail {
                let site = rng.gen_range(1..=config.sites);
                if !down.contains(&site) {
                    down.push(site);
                    script.push(Instruction::Fail { site });
                }
            }
            continue;
        }

        let can_begin = begun < args.txns && live.len() < args.concurrency;
        if can_begin && (live.is_empty() || rng.gen_bool(0.3)) {
            begun += 1;
            let name = TxnName::new(format!("T{begun}"));
            let read_only = rng.gen_range(0..100) < u32::from(args.read_only_pct);
            script.push(if read_only {
                Instruction::BeginReadOnly { txn: name.clone() }
            } else {
                Instruction::Begin { txn: name.clone() }
            });
            live.push(Live {
                name,
                read_only,
                remaining: args.ops_per_txn,
            });
            continue;
        }

        let idx = rng.gen_range(0..live.len());
        if live[idx].remaining == 0 {
            let done = live.swap_remove(idx);
            script.push(Instruction::End { txn: done.name });
            continue;
        }
        let txn = &mut live[idx];
        txn.remaining -= 1;
        let var = rng.gen_range(1..=config.variables);
        let write = !txn.read_only && rng.gen_range(0..100) < u32::from(args.write_pct);
        script.push(if write {
            Instruction::Write {
                txn: txn.name.clone(),
                var,
                value: rng.gen_range(0..1000),
            }
        } else {
            Instruction::Read {
                txn: txn.name.clone(),
                var,
            }
        });
    }

    for site in down {
        script.push(Instruction::Recover { site });
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> WorkloadArgs {
        WorkloadArgs {
            sites: DEFAULT_SITES,
            variables: DEFAULT_VARIABLES,
            txns: 12,
            concurrency: 3,
            ops_per_txn: 3,
            write_pct: 50,
            read_only_pct: 20,
            fault_pct: 10,
            seed: 7,
        }
    }

    #[test]
    fn scripts_are_deterministic_per_seed() {
        let args = args();
        let config = args.validate().expect("valid");
        assert_eq!(
            build_script(&args, &config, 7),
            build_script(&args, &config, 7)
        );
    }

    #[test]
    fn every_transaction_begins_and_ends() {
        let args = args();
        let config = args.validate().expect("valid");
        let script = build_script(&args, &config, 42);
        let begins = script
            .iter()
            .filter(|i| matches!(i, Instruction::Begin { .. } | Instruction::BeginReadOnly { .. }))
            .count();
        let ends = script
            .iter()
            .filter(|i| matches!(i, Instruction::End { .. }))
            .count();
        assert_eq!(begins, 12);
        assert_eq!(ends, 12);
    }

    #[test]
    fn failed_sites_are_recovered_by_the_end() {
        let mut args = args();
        args.fault_pct = 40;
        let config = args.validate().expect("valid");
        let script = build_script(&args, &config, 11);
        let mut down = std::collections::BTreeSet::new();
        for instruction in &script {
            match instruction {
                Instruction::Fail { site } => assert!(down.insert(*site)),
                Instruction::Recover { site } => assert!(down.remove(site)),
                _ => {}
            }
            assert!(down.len() < config.sites as usize);
        }
        assert!(down.is_empty());
    }

    #[test]
    fn generated_script_runs_to_completion() {
        let args = args();
        let config = args.validate().expect("valid");
        let script = render(&build_script(&args, &config, 3));
        let mut events = Vec::new();
        let summary = repcrec::run_script(&script, &config, &mut events).expect("run");
        assert_eq!(summary.unknown, 0);
        let finished =
            summary.committed.len() + summary.deadlock_aborts.len() + summary.site_failure_aborts.len();
        assert!(finished <= 12);
        assert!(finished > 0 || !summary.starved.is_empty());
    }
}
