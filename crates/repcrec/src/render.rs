//! Event renderers: the classic human-readable transcript and JSON lines.

use std::io::Write;

use anyhow::Context;
use repcrec_core::txn::{Event, EventSink, Instruction, Outcome, SiteStatus, SiteView, SystemView};

const RULE_WIDTH: usize = 70;

/// Writes the transcript format: `x2: 20`, `T1 commits`,
/// `T2 aborts(Deadlock detected, younger killed)`, `site 1 - x2: 20, ...`.
pub struct TextRenderer<W: Write> {
    out: W,
    show_blocked: bool,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            show_blocked: false,
        }
    }

    /// Also print a line the first time an instruction blocks.
    pub fn with_blocked(mut self, show_blocked: bool) -> Self {
        self.show_blocked = show_blocked;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        match &event.outcome {
            Outcome::Success { value: Some(value) } => match &event.instruction {
                Some(Instruction::Read { var, .. }) => writeln!(self.out, "x{var}: {value}"),
                _ => writeln!(self.out, "{value}"),
            },
            Outcome::Success { value: None } => Ok(()),
            Outcome::Blocked { waiting_on } => {
                if !self.show_blocked {
                    return Ok(());
                }
                let Some(instruction) = &event.instruction else {
                    return Ok(());
                };
                if waiting_on.is_empty() {
                    writeln!(self.out, "{instruction} blocked")
                } else {
                    let names: Vec<&str> = waiting_on.iter().map(|name| name.as_str()).collect();
                    writeln!(self.out, "{instruction} blocked (waits for {})", names.join(", "))
                }
            }
            Outcome::Committed { txn } => writeln!(self.out, "{txn} commits"),
            Outcome::Aborted { txn, reason } => writeln!(self.out, "{txn} aborts({reason})"),
            Outcome::Unknown { reason } => writeln!(self.out, "Unknown instruction: {reason}"),
            Outcome::Dump { sites } => {
                for site in sites {
                    writeln!(self.out, "{}", site_line(site))?;
                }
                Ok(())
            }
            Outcome::State { state } => self.write_state(state),
            Outcome::Starved { pending } => {
                let list: Vec<String> = pending.iter().map(ToString::to_string).collect();
                writeln!(self.out, "All following instructions are blocked")?;
                writeln!(self.out, "[{}]", list.join(", "))
            }
        }
    }

    fn write_state(&mut self, state: &SystemView) -> std::io::Result<()> {
        let rule = "-".repeat(RULE_WIDTH);
        writeln!(self.out, "{rule}\nTransaction Manager\n{rule}")?;
        writeln!(self.out, "Tick: {}", state.tick)?;
        writeln!(self.out, "Transactions")?;
        for txn in &state.transactions {
            let ro = if txn.read_only { "(RO)" } else { "" };
            writeln!(
                self.out,
                "- Name: {}{ro}\tBegin Time: {}\tBlocked: {}",
                txn.name, txn.begin, txn.blocked_instructions
            )?;
        }
        writeln!(self.out, "\nInstruction Buffer")?;
        for instruction in &state.buffer {
            writeln!(self.out, "- {instruction}")?;
        }
        writeln!(self.out, "\nWait-For Graph")?;
        for (from, to) in &state.wait_for {
            let to: Vec<&str> = to.iter().map(|name| name.as_str()).collect();
            writeln!(self.out, "- {from} -> {}", to.join(", "))?;
        }
        writeln!(self.out, "{rule}\nData Managers\n{rule}")?;
        for site in &state.sites {
            writeln!(self.out, "{}", site_line(site))?;
            if site.status == SiteStatus::Down {
                writeln!(self.out, "  down since tick {}", site.last_status_change)?;
            }
            for lock in &site.locks {
                let kind = match lock.kind {
                    Some(kind) => format!("{kind:?}"),
                    None => "None".to_string(),
                };
                let holders: Vec<&str> = lock.holders.iter().map(|name| name.as_str()).collect();
                match &lock.pending_write {
                    Some(owner) => writeln!(
                        self.out,
                        "  x{} {kind}[{}] pending {owner}",
                        lock.var,
                        holders.join(", ")
                    )?,
                    None => writeln!(self.out, "  x{} {kind}[{}]", lock.var, holders.join(", "))?,
                }
            }
        }
        Ok(())
    }
}

/// `site 1 - x2: 20, x4: 40, ...`
pub fn site_line(site: &SiteView) -> String {
    let values: Vec<String> = site
        .values
        .iter()
        .map(|(var, value)| format!("x{var}: {value}"))
        .collect();
    if values.is_empty() {
        return format!("site {} -", site.id);
    }
    format!("site {} - {}", site.id, values.join(", "))
}

impl<W: Write> EventSink for TextRenderer<W> {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        self.write_event(&event).context("write transcript")
    }
}

/// One serialized `Event` per line.
pub struct JsonLinesRenderer<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EventSink for JsonLinesRenderer<W> {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, &event).context("encode event")?;
        self.out.write_all(b"\n").context("write event")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use repcrec_core::txn::{AbortReason, TxnName};

    use super::*;

    fn render(events: Vec<Event>, show_blocked: bool) -> String {
        let mut renderer = TextRenderer::new(Vec::new()).with_blocked(show_blocked);
        for event in events {
            renderer.emit(event).expect("emit");
        }
        String::from_utf8(renderer.into_inner()).expect("utf8")
    }

    fn event(instruction: Option<Instruction>, outcome: Outcome) -> Event {
        Event {
            tick: 1,
            instruction,
            outcome,
        }
    }

    #[test]
    fn transcript_lines() {
        let read = Instruction::Read {
            txn: "T1".into(),
            var: 2,
        };
        let out = render(
            vec![
                event(Some(Instruction::Begin { txn: "T1".into() }), Outcome::done()),
                event(Some(read.clone()), Outcome::value(20)),
                event(
                    Some(read),
                    Outcome::blocked(BTreeSet::from([TxnName::from("T2")])),
                ),
                event(None, Outcome::Aborted {
                    txn: "T2".into(),
                    reason: AbortReason::Deadlock,
                }),
                event(
                    Some(Instruction::End { txn: "T1".into() }),
                    Outcome::Committed { txn: "T1".into() },
                ),
            ],
            false,
        );
        assert_eq!(
            out,
            "x2: 20\nT2 aborts(Deadlock detected, younger killed)\nT1 commits\n"
        );
    }

    #[test]
    fn blocked_lines_are_opt_in() {
        let write = Instruction::Write {
            txn: "T2".into(),
            var: 2,
            value: 5,
        };
        let out = render(
            vec![event(
                Some(write),
                Outcome::blocked(BTreeSet::from([TxnName::from("T1")])),
            )],
            true,
        );
        assert_eq!(out, "W(T2, x2, 5) blocked (waits for T1)\n");
    }

    #[test]
    fn json_lines_are_tagged() {
        let mut renderer = JsonLinesRenderer::new(Vec::new());
        renderer
            .emit(event(
                Some(Instruction::End { txn: "T1".into() }),
                Outcome::Committed { txn: "T1".into() },
            ))
            .expect("emit");
        let text = String::from_utf8(renderer.into_inner()).expect("utf8");
        let value: serde_json::Value = serde_json::from_str(text.trim()).expect("json");
        assert_eq!(value["outcome"]["outcome"], "committed");
        assert_eq!(value["instruction"]["op"], "end");
        assert_eq!(value["tick"], 1);
    }
}
