//! Tick-driven admission and retry loop.
//!
//! Every tick the scheduler (1) advances the clock, (2) aborts the youngest
//! member of a wait-for cycle if there is one, (3) admits the next input
//! instruction into a FIFO buffer and (4) executes the first buffered
//! instruction that is not blocked. When no instruction can run and the
//! input is exhausted the remaining buffer is reported as starved.

use std::collections::VecDeque;

use serde::Serialize;

use super::coordinator::Coordinator;
use super::{
    AbortReason, Event, EventSink, Input, Instruction, Outcome, SimConfig, Tick, TxnName,
};

/// Buffered instruction plus its retry bookkeeping.
#[derive(Clone, Debug)]
struct Pending {
    instruction: Instruction,
    /// Counted in its transaction's blocked-instruction total.
    counted: bool,
    /// A `Blocked` event was already emitted for it.
    reported: bool,
}

impl Pending {
    fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            counted: false,
            reported: false,
        }
    }
}

/// Totals for one `Scheduler::run`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub ticks: Tick,
    pub committed: Vec<TxnName>,
    pub deadlock_aborts: Vec<TxnName>,
    pub site_failure_aborts: Vec<TxnName>,
    pub unknown: usize,
    /// Instructions left in the buffer when the run starved.
    pub starved: Vec<Instruction>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Committed { txn } => self.committed.push(txn.clone()),
            Outcome::Aborted {
                txn,
                reason: AbortReason::Deadlock,
            } => self.deadlock_aborts.push(txn.clone()),
            Outcome::Aborted {
                txn,
                reason: AbortReason::SiteFailure,
            } => self.site_failure_aborts.push(txn.clone()),
            Outcome::Unknown { .. } => self.unknown += 1,
            _ => {}
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    coordinator: Coordinator,
    buffer: VecDeque<Pending>,
}

impl Scheduler {
    pub fn new(config: &SimConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            coordinator: Coordinator::new(config),
            buffer: VecDeque::new(),
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Instructions waiting for retry, oldest first.
    pub fn buffered(&self) -> impl Iterator<Item = &Instruction> {
        self.buffer.iter().map(|pending| &pending.instruction)
    }

    /// Drive `inputs` to completion, reporting every outcome to `sink`.
    ///
    /// Malformed inputs are reported as `Unknown` and consume no tick.
    pub fn run<I, S>(&mut self, inputs: I, sink: &mut S) -> anyhow::Result<RunSummary>
    where
        I: IntoIterator,
        I::Item: Into<Input>,
        S: EventSink + ?Sized,
    {
        let mut inputs = inputs.into_iter().map(Into::<Input>::into).peekable();
        let mut summary = RunSummary::default();
        loop {
            while let Some(Input::Malformed { .. }) = inputs.peek() {
                if let Some(Input::Malformed { text, reason }) = inputs.next() {
                    tracing::debug!(%text, %reason, "malformed instruction dropped");
                    let outcome = Outcome::unknown(format!("{text}: {reason}"));
                    summary.record(&outcome);
                    sink.emit(Event {
                        tick: self.coordinator.now(),
                        instruction: None,
                        outcome,
                    })?;
                }
            }
            if self.buffer.is_empty() && inputs.peek().is_none() {
                break;
            }

            let tick = self.coordinator.advance_clock();
            self.resolve_deadlock(tick, sink, &mut summary)?;

            if let Some(Input::Instruction(instruction)) = inputs.next() {
                self.buffer.push_back(Pending::new(instruction));
            }

            let progressed = self.step(tick, sink, &mut summary)?;
            if !progressed && inputs.peek().is_none() && !self.buffer.is_empty() {
                if self.coordinator.wait_for().find_cycle().is_some() {
                    continue;
                }
                let pending: Vec<Instruction> = self.buffered().cloned().collect();
                tracing::warn!(tick, stuck = pending.len(), "all remaining instructions are blocked");
                summary.starved = pending.clone();
                sink.emit(Event {
                    tick,
                    instruction: None,
                    outcome: Outcome::Starved { pending },
                })?;
                break;
            }
        }
        summary.ticks = self.coordinator.now();
        Ok(summary)
    }

    fn resolve_deadlock<S>(
        &mut self,
        tick: Tick,
        sink: &mut S,
        summary: &mut RunSummary,
    ) -> anyhow::Result<()>
    where
        S: EventSink + ?Sized,
    {
        let Some(victim) = self.coordinator.find_deadlock_victim() else {
            return Ok(());
        };
        let Some(outcome) = self.coordinator.abort(&victim, AbortReason::Deadlock) else {
            return Ok(());
        };
        self.buffer
            .retain(|pending| pending.instruction.txn() != Some(&victim));
        summary.record(&outcome);
        sink.emit(Event {
            tick,
            instruction: None,
            outcome,
        })
    }

    /// Execute the first runnable buffered instruction. Returns whether one ran.
    fn step<S>(&mut self, tick: Tick, sink: &mut S, summary: &mut RunSummary) -> anyhow::Result<bool>
    where
        S: EventSink + ?Sized,
    {
        for idx in 0..self.buffer.len() {
            let instruction = self.buffer[idx].instruction.clone();
            let outcome = match &instruction {
                Instruction::QueryState => Outcome::State {
                    state: Box::new(self.coordinator.query_state(self.buffered().cloned().collect())),
                },
                other => self.coordinator.execute(other),
            };
            let blocked = outcome.is_blocked();

            let counted = self.buffer[idx].counted;
            if let (true, Some(txn)) = (instruction.is_data_access(), instruction.txn()) {
                self.coordinator.update_blocked_count(txn, !blocked, counted);
            }

            if blocked {
                let pending = &mut self.buffer[idx];
                pending.counted = true;
                if !pending.reported {
                    pending.reported = true;
                    tracing::debug!(tick, %instruction, "instruction blocked");
                    sink.emit(Event {
                        tick,
                        instruction: Some(instruction),
                        outcome,
                    })?;
                }
                continue;
            }

            self.buffer.remove(idx);
            summary.record(&outcome);
            sink.emit(Event {
                tick,
                instruction: Some(instruction),
                outcome,
            })?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::Value;

    fn t(name: &str) -> TxnName {
        TxnName::from(name)
    }

    fn begin(txn: &str) -> Instruction {
        Instruction::Begin { txn: t(txn) }
    }

    fn begin_ro(txn: &str) -> Instruction {
        Instruction::BeginReadOnly { txn: t(txn) }
    }

    fn read(txn: &str, var: u32) -> Instruction {
        Instruction::Read { txn: t(txn), var }
    }

    fn write(txn: &str, var: u32, value: Value) -> Instruction {
        Instruction::Write {
            txn: t(txn),
            var,
            value,
        }
    }

    fn end(txn: &str) -> Instruction {
        Instruction::End { txn: t(txn) }
    }

    fn run(script: Vec<Instruction>) -> (Scheduler, Vec<Event>, RunSummary) {
        let mut scheduler = Scheduler::new(&SimConfig::default()).expect("default config");
        let mut events = Vec::new();
        let summary = scheduler.run(script, &mut events).expect("run");
        (scheduler, events, summary)
    }

    fn reads(events: &[Event]) -> Vec<Value> {
        events
            .iter()
            .filter(|e| matches!(e.instruction, Some(Instruction::Read { .. })))
            .filter_map(|e| match e.outcome {
                Outcome::Success { value } => value,
                _ => None,
            })
            .collect()
    }

    #[test]
    fn committed_replicated_write_reaches_every_site() {
        let (scheduler, events, summary) =
            run(vec![begin("T1"), write("T1", 2, 200), end("T1"), Instruction::Dump]);
        assert_eq!(summary.committed, vec![t("T1")]);
        let Some(Event {
            outcome: Outcome::Dump { sites },
            ..
        }) = events.last()
        else {
            panic!("unexpected last event: {:?}", events.last());
        };
        assert_eq!(sites.len(), 10);
        assert!(sites.iter().all(|site| site.values.get(&2) == Some(&200)));
        assert_eq!(scheduler.coordinator().now(), 4);
    }

    #[test]
    fn second_writer_commits_after_first() {
        let (scheduler, events, summary) = run(vec![
            begin("T1"),
            begin("T2"),
            write("T1", 2, 100),
            write("T2", 2, 200),
            end("T1"),
            end("T2"),
        ]);
        assert_eq!(summary.committed, vec![t("T1"), t("T2")]);
        // end(T2) is admitted on the tick W(T2) finally runs, so only the
        // write is ever reported as blocked.
        let blocked: Vec<&Instruction> = events
            .iter()
            .filter(|e| e.outcome.is_blocked())
            .filter_map(|e| e.instruction.as_ref())
            .collect();
        assert_eq!(blocked, vec![&write("T2", 2, 200)]);
        let site = scheduler.coordinator().site(1).expect("site 1");
        assert_eq!(site.value(2), Some(200));
    }

    #[test]
    fn read_only_reads_snapshot_value() {
        let (_, events, _) = run(vec![begin_ro("T1"), read("T1", 4)]);
        assert_eq!(reads(&events), vec![40]);
    }

    #[test]
    fn read_after_recovery_avoids_unreadable_site() {
        let (scheduler, events, _) = run(vec![
            Instruction::Fail { site: 1 },
            Instruction::Recover { site: 1 },
            begin("T1"),
            read("T1", 2),
        ]);
        assert_eq!(reads(&events), vec![20]);
        let txn = scheduler.coordinator().transaction(&t("T1")).expect("live");
        assert!(!txn.accessed_sites.contains_key(&1));
    }

    #[test]
    fn deadlock_aborts_younger_transaction() {
        let (_, events, summary) = run(vec![
            begin("T1"),
            begin("T2"),
            write("T1", 1, 1),
            write("T2", 3, 1),
            write("T1", 3, 2),
            write("T2", 1, 2),
            end("T1"),
        ]);
        assert_eq!(summary.deadlock_aborts, vec![t("T2")]);
        assert_eq!(summary.committed, vec![t("T1")]);
        assert!(summary.starved.is_empty());
        let abort = events
            .iter()
            .find(|e| matches!(e.outcome, Outcome::Aborted { .. }))
            .expect("abort event");
        assert_eq!(abort.instruction, None);
        assert_eq!(abort.tick, 7);
    }

    #[test]
    fn end_waits_for_blocked_read_of_same_transaction() {
        let (_, events, summary) = run(vec![
            begin("T1"),
            begin("T2"),
            write("T1", 2, 22),
            read("T2", 2),
            end("T2"),
            end("T1"),
        ]);
        assert_eq!(summary.committed, vec![t("T1"), t("T2")]);
        assert_eq!(reads(&events), vec![22]);
        let order: Vec<String> = events
            .iter()
            .filter(|e| !e.outcome.is_blocked())
            .filter_map(|e| e.instruction.as_ref().map(ToString::to_string))
            .collect();
        assert_eq!(
            order,
            vec!["begin(T1)", "begin(T2)", "W(T1, x2, 22)", "end(T1)", "R(T2, x2)", "end(T2)"]
        );
    }

    #[test]
    fn starvation_reports_stuck_instructions() {
        let (_, events, summary) = run(vec![
            begin("T1"),
            begin("T2"),
            write("T1", 2, 1),
            read("T2", 2),
        ]);
        assert_eq!(summary.starved, vec![read("T2", 2)]);
        match &events.last().expect("events").outcome {
            Outcome::Starved { pending } => assert_eq!(pending, &vec![read("T2", 2)]),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn malformed_input_consumes_no_tick() {
        let mut scheduler = Scheduler::new(&SimConfig::default()).expect("default config");
        let mut events = Vec::new();
        let inputs = vec![
            Input::from(begin("T1")),
            Input::Malformed {
                text: "jump(T1)".to_string(),
                reason: "unknown instruction".to_string(),
            },
            Input::from(end("T1")),
        ];
        let summary = scheduler.run(inputs, &mut events).expect("run");
        assert_eq!(summary.ticks, 2);
        assert_eq!(summary.unknown, 1);
        assert_eq!(events[1].instruction, None);
        assert!(matches!(events[1].outcome, Outcome::Unknown { .. }));
    }

    #[test]
    fn aborted_transaction_drops_buffered_instructions() {
        let (scheduler, _, summary) = run(vec![
            begin("T1"),
            begin("T2"),
            read("T1", 1),
            read("T2", 3),
            write("T1", 3, 5),
            write("T2", 1, 5),
            read("T2", 5),
            end("T1"),
            end("T2"),
        ]);
        assert_eq!(summary.deadlock_aborts, vec![t("T2")]);
        assert_eq!(summary.committed, vec![t("T1")]);
        assert_eq!(scheduler.buffered().count(), 0);
        assert_eq!(scheduler.coordinator().site(4).and_then(|s| s.value(3)), Some(5));
    }

    #[test]
    fn query_state_lists_its_own_buffer() {
        let (_, events, _) = run(vec![
            begin("T1"),
            begin("T2"),
            write("T1", 1, 1),
            write("T2", 1, 2),
            Instruction::QueryState,
            end("T1"),
        ]);
        let state = events
            .iter()
            .find_map(|e| match &e.outcome {
                Outcome::State { state } => Some(state),
                _ => None,
            })
            .expect("state event");
        assert_eq!(state.buffer, vec![write("T2", 1, 2), Instruction::QueryState]);
        assert_eq!(state.wait_for.get(&t("T2")), Some(&vec![t("T1")]));
        assert_eq!(state.transactions.len(), 2);
    }
}
