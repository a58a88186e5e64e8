//! Shared types for the transaction processing core.
//!
//! These types are the contract between the scheduler and its callers:
//! instructions flow in, events flow out through an `EventSink`.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::view::{SiteView, SystemView};

/// Site identifier, 1-based.
pub type SiteId = u32;
/// Variable identifier, 1-based (`x1`, `x2`, ...).
pub type VarId = u32;
/// Logical clock value.
pub type Tick = u64;
/// Variable value.
pub type Value = i64;

/// Number of sites in the default catalog.
pub const DEFAULT_SITES: u32 = 10;
/// Number of variables in the default catalog.
pub const DEFAULT_VARIABLES: u32 = 20;

/// Transaction name as written in the instruction stream (`T1`, `T2`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnName(String);

impl TxnName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxnName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TxnName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for TxnName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Catalog dimensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    pub sites: u32,
    pub variables: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            sites: DEFAULT_SITES,
            variables: DEFAULT_VARIABLES,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sites == 0 {
            anyhow::bail!("simulation needs at least one site");
        }
        if self.variables == 0 {
            anyhow::bail!("simulation needs at least one variable");
        }
        Ok(())
    }
}

/// Lock mode requested at a site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Read,
    Write,
}

/// One parsed instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Instruction {
    Begin { txn: TxnName },
    BeginReadOnly { txn: TxnName },
    Read { txn: TxnName, var: VarId },
    Write { txn: TxnName, var: VarId, value: Value },
    End { txn: TxnName },
    Fail { site: SiteId },
    Recover { site: SiteId },
    Dump,
    QueryState,
}

impl Instruction {
    /// Transaction named by this instruction, if any.
    pub fn txn(&self) -> Option<&TxnName> {
        match self {
            Instruction::Begin { txn }
            | Instruction::BeginReadOnly { txn }
            | Instruction::Read { txn, .. }
            | Instruction::Write { txn, .. }
            | Instruction::End { txn } => Some(txn),
            Instruction::Fail { .. }
            | Instruction::Recover { .. }
            | Instruction::Dump
            | Instruction::QueryState => None,
        }
    }

    /// Reads and writes are the only instructions counted against a
    /// transaction's blocked-instruction total.
    pub fn is_data_access(&self) -> bool {
        matches!(self, Instruction::Read { .. } | Instruction::Write { .. })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Begin { txn } => write!(f, "begin({txn})"),
            Instruction::BeginReadOnly { txn } => write!(f, "beginRO({txn})"),
            Instruction::Read { txn, var } => write!(f, "R({txn}, x{var})"),
            Instruction::Write { txn, var, value } => write!(f, "W({txn}, x{var}, {value})"),
            Instruction::End { txn } => write!(f, "end({txn})"),
            Instruction::Fail { site } => write!(f, "fail({site})"),
            Instruction::Recover { site } => write!(f, "recover({site})"),
            Instruction::Dump => f.write_str("dump()"),
            Instruction::QueryState => f.write_str("queryState()"),
        }
    }
}

/// Scheduler input: either a parsed instruction or a line the parser rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Instruction(Instruction),
    Malformed { text: String, reason: String },
}

impl From<Instruction> for Input {
    fn from(value: Instruction) -> Self {
        Input::Instruction(value)
    }
}

/// Why a transaction was aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    Deadlock,
    SiteFailure,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Deadlock => f.write_str("Deadlock detected, younger killed"),
            AbortReason::SiteFailure => f.write_str("Accessed site(s) failed"),
        }
    }
}

/// Result of processing one instruction (or one scheduler decision).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Success {
        value: Option<Value>,
    },
    /// Not executable yet; stays buffered. `waiting_on` may be empty when the
    /// instruction waits on site availability rather than on a transaction.
    Blocked {
        waiting_on: BTreeSet<TxnName>,
    },
    Committed {
        txn: TxnName,
    },
    Aborted {
        txn: TxnName,
        reason: AbortReason,
    },
    Unknown {
        reason: String,
    },
    Dump {
        sites: Vec<SiteView>,
    },
    State {
        state: Box<SystemView>,
    },
    /// Nothing can make progress and the input is exhausted.
    Starved {
        pending: Vec<Instruction>,
    },
}

impl Outcome {
    pub fn done() -> Self {
        Outcome::Success { value: None }
    }

    pub fn value(value: Value) -> Self {
        Outcome::Success { value: Some(value) }
    }

    pub fn blocked(waiting_on: BTreeSet<TxnName>) -> Self {
        Outcome::Blocked { waiting_on }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Outcome::Unknown {
            reason: reason.into(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Outcome::Blocked { .. })
    }
}

/// Reported outcome, stamped with the tick it happened at.
///
/// `instruction` is `None` for scheduler-initiated events (deadlock aborts,
/// starvation).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub tick: Tick,
    pub instruction: Option<Instruction>,
    pub outcome: Outcome,
}

/// Destination for scheduler events (renderers, collectors).
pub trait EventSink {
    fn emit(&mut self, event: Event) -> anyhow::Result<()>;
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        self.push(event);
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: Event) -> anyhow::Result<()> {
        (**self).emit(event)
    }
}
