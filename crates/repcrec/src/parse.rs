//! Line-oriented instruction grammar.
//!
//! One instruction per line, e.g. `begin(T1)`, `beginRO(T2)`, `R(T1, x4)`,
//! `W(T1, x2, 200)`, `end(T1)`, `fail(3)`, `recover(3)`, `dump()`,
//! `queryState()`. Whitespace is insignificant. `//` starts a comment that
//! runs to the end of the line.

use anyhow::{bail, Context};
use repcrec_core::txn::{Input, Instruction, SiteId, TxnName, Value, VarId};

/// Parse one line. Blank and comment-only lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Instruction>> {
    let code = match line.find("//") {
        Some(idx) => &line[..idx],
        None => line,
    };
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }

    let Some(open) = code.find('(') else {
        bail!("missing '('");
    };
    let Some(body) = code[open + 1..].strip_suffix(')') else {
        bail!("missing closing ')'");
    };
    let command = code[..open].trim();
    let args: Vec<&str> = if body.trim().is_empty() {
        Vec::new()
    } else {
        body.split(',').map(str::trim).collect()
    };

    let instruction = match (command, args.as_slice()) {
        ("begin", [txn]) => Instruction::Begin { txn: txn_name(txn)? },
        ("beginRO", [txn]) => Instruction::BeginReadOnly { txn: txn_name(txn)? },
        ("R", [txn, var]) => Instruction::Read {
            txn: txn_name(txn)?,
            var: variable(var)?,
        },
        ("W", [txn, var, value]) => Instruction::Write {
            txn: txn_name(txn)?,
            var: variable(var)?,
            value: value
                .parse::<Value>()
                .with_context(|| format!("invalid value {value:?}"))?,
        },
        ("end", [txn]) => Instruction::End { txn: txn_name(txn)? },
        ("fail", [site]) => Instruction::Fail {
            site: site_id(site)?,
        },
        ("recover", [site]) => Instruction::Recover {
            site: site_id(site)?,
        },
        ("dump", []) => Instruction::Dump,
        ("queryState", []) => Instruction::QueryState,
        ("begin" | "beginRO" | "R" | "W" | "end" | "fail" | "recover" | "dump" | "queryState", _) => {
            bail!("wrong number of arguments for {command}")
        }
        _ => bail!("unknown instruction {command:?}"),
    };
    Ok(Some(instruction))
}

/// Parse a whole script. Lines that fail to parse become `Input::Malformed`
/// so the scheduler can report them in order.
pub fn parse_script(text: &str) -> Vec<Input> {
    text.lines()
        .filter_map(|line| match parse_line(line) {
            Ok(Some(instruction)) => Some(Input::Instruction(instruction)),
            Ok(None) => None,
            Err(err) => Some(Input::Malformed {
                text: line.trim().to_string(),
                reason: format!("{err:#}"),
            }),
        })
        .collect()
}

fn txn_name(raw: &str) -> anyhow::Result<TxnName> {
    if raw.is_empty() || raw.contains(char::is_whitespace) {
        bail!("invalid transaction name {raw:?}");
    }
    Ok(TxnName::from(raw))
}

fn variable(raw: &str) -> anyhow::Result<VarId> {
    let Some(digits) = raw.strip_prefix('x') else {
        bail!("invalid variable {raw:?}");
    };
    digits
        .parse::<VarId>()
        .with_context(|| format!("invalid variable {raw:?}"))
}

fn site_id(raw: &str) -> anyhow::Result<SiteId> {
    raw.parse::<SiteId>()
        .with_context(|| format!("invalid site {raw:?}"))
}
