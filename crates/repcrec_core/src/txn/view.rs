//! Serializable read-only views for `dump()` and `queryState()`.

use std::collections::BTreeMap;

use serde::Serialize;

use super::lock::LockState;
use super::site::{Site, SiteStatus};
use super::state::{PendingWrite, Transaction};
use super::{Instruction, LockKind, SiteId, Tick, TxnName, Value, VarId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LockView {
    pub var: VarId,
    /// `None` when only a pending-write marker is present.
    pub kind: Option<LockKind>,
    pub holders: Vec<TxnName>,
    pub pending_write: Option<TxnName>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SiteView {
    pub id: SiteId,
    pub status: SiteStatus,
    pub last_status_change: Tick,
    pub values: BTreeMap<VarId, Value>,
    /// Replicated variables not readable since the last recovery.
    pub unreadable: Vec<VarId>,
    pub locks: Vec<LockView>,
    pub snapshots: Vec<Tick>,
}

impl From<&Site> for SiteView {
    fn from(site: &Site) -> Self {
        let locks = site
            .locks()
            .map(|(var, slot)| {
                let (kind, holders) = match &slot.state {
                    LockState::Unlocked => (None, Vec::new()),
                    LockState::ReadLocked(readers) => {
                        (Some(LockKind::Read), readers.iter().cloned().collect())
                    }
                    LockState::WriteLocked(writer) => (Some(LockKind::Write), vec![writer.clone()]),
                };
                LockView {
                    var: *var,
                    kind,
                    holders,
                    pending_write: slot.pending_write.clone(),
                }
            })
            .collect();
        Self {
            id: site.id(),
            status: site.status(),
            last_status_change: site.last_status_change(),
            values: site.values().clone(),
            unreadable: site
                .values()
                .keys()
                .copied()
                .filter(|var| !site.is_readable(*var))
                .collect(),
            locks,
            snapshots: site.snapshot_times().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TxnView {
    pub name: TxnName,
    pub read_only: bool,
    pub begin: Tick,
    pub accessed_sites: BTreeMap<SiteId, Tick>,
    pub blocked_instructions: usize,
    pub writes: Vec<PendingWrite>,
}

impl From<&Transaction> for TxnView {
    fn from(txn: &Transaction) -> Self {
        Self {
            name: txn.name.clone(),
            read_only: txn.read_only,
            begin: txn.begin,
            accessed_sites: txn.accessed_sites.clone(),
            blocked_instructions: txn.blocked_instructions,
            writes: txn.writes.clone(),
        }
    }
}

/// Full system state as reported by `queryState()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SystemView {
    pub tick: Tick,
    pub transactions: Vec<TxnView>,
    /// Instructions still waiting in the scheduler, oldest first.
    pub buffer: Vec<Instruction>,
    pub wait_for: BTreeMap<TxnName, Vec<TxnName>>,
    pub sites: Vec<SiteView>,
}
