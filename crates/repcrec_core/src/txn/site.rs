//! Per-site data and lock manager.
//!
//! A site owns the committed values of the variables it hosts, one lock slot
//! per variable, the readability flags of its replicated copies and the
//! snapshot history used by read-only transactions. All mutation goes through
//! the methods below; the coordinator never touches the tables directly.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::catalog::Catalog;
use super::lock::{LockDecision, LockSlot};
use super::{LockKind, SiteId, Tick, TxnName, Value, VarId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Up,
    Down,
}

/// Result of a lock acquisition at one site.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// The variable is not stored here; nothing was granted.
    NotHosted,
    Granted,
    Blocked(BTreeSet<TxnName>),
}

#[derive(Clone, Debug)]
pub struct Site {
    id: SiteId,
    catalog: Catalog,
    status: SiteStatus,
    /// Tick of the most recent failure (0 until the first one). Recovery
    /// leaves it alone; commit validation depends on that.
    last_status_change: Tick,
    values: BTreeMap<VarId, Value>,
    /// Only non-idle slots are kept.
    locks: BTreeMap<VarId, LockSlot>,
    readable: BTreeMap<VarId, bool>,
    snapshots: BTreeMap<Tick, BTreeMap<VarId, Value>>,
}

impl Site {
    pub fn new(id: SiteId, catalog: &Catalog) -> Self {
        let values: BTreeMap<VarId, Value> = catalog
            .variables_at(id)
            .map(|var| (var, catalog.initial_value(var)))
            .collect();
        let readable = values
            .keys()
            .filter(|var| catalog.is_replicated(**var))
            .map(|var| (*var, true))
            .collect();
        Self {
            id,
            catalog: *catalog,
            status: SiteStatus::Up,
            last_status_change: 0,
            values,
            locks: BTreeMap::new(),
            readable,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> SiteId {
        self.id
    }

    pub fn status(&self) -> SiteStatus {
        self.status
    }

    pub fn is_up(&self) -> bool {
        self.status == SiteStatus::Up
    }

    pub fn last_status_change(&self) -> Tick {
        self.last_status_change
    }

    pub fn hosts(&self, var: VarId) -> bool {
        self.values.contains_key(&var)
    }

    /// Committed value, regardless of locks.
    pub fn value(&self, var: VarId) -> Option<Value> {
        self.values.get(&var).copied()
    }

    pub fn values(&self) -> &BTreeMap<VarId, Value> {
        &self.values
    }

    pub fn is_readable(&self, var: VarId) -> bool {
        if !self.hosts(var) {
            return false;
        }
        if !self.catalog.is_replicated(var) {
            return true;
        }
        self.readable.get(&var).copied().unwrap_or(false)
    }

    pub fn lock(&self, var: VarId) -> Option<&LockSlot> {
        self.locks.get(&var)
    }

    pub fn locks(&self) -> impl Iterator<Item = (&VarId, &LockSlot)> {
        self.locks.iter()
    }

    pub fn snapshot_times(&self) -> impl Iterator<Item = Tick> + '_ {
        self.snapshots.keys().copied()
    }

    fn slot(&self, var: VarId) -> LockSlot {
        self.locks.get(&var).cloned().unwrap_or_default()
    }

    fn store_slot(&mut self, var: VarId, slot: LockSlot) {
        if slot.is_idle() {
            self.locks.remove(&var);
        } else {
            self.locks.insert(var, slot);
        }
    }

    /// Conflicting claimants for the request; empty when it could be granted.
    pub fn check_lock(&self, txn: &TxnName, var: VarId, kind: LockKind) -> BTreeSet<TxnName> {
        if !self.hosts(var) {
            return BTreeSet::new();
        }
        self.slot(var).blockers(txn, kind)
    }

    pub fn acquire_lock(&mut self, txn: &TxnName, var: VarId, kind: LockKind) -> Acquire {
        if !self.hosts(var) {
            return Acquire::NotHosted;
        }
        match self.slot(var).acquire(txn, kind) {
            LockDecision::Granted(slot) => {
                self.store_slot(var, slot);
                tracing::debug!(site = self.id, txn = %txn, var, ?kind, "lock granted");
                Acquire::Granted
            }
            LockDecision::Blocked(blockers) => {
                tracing::debug!(site = self.id, txn = %txn, var, ?kind, ?blockers, "lock blocked");
                Acquire::Blocked(blockers)
            }
        }
    }

    pub fn set_pending_write(&mut self, txn: &TxnName, var: VarId) -> bool {
        if !self.hosts(var) {
            return false;
        }
        match self.slot(var).mark_pending_write(txn) {
            Some(slot) => {
                self.store_slot(var, slot);
                true
            }
            None => false,
        }
    }

    pub fn release_locks(&mut self, txn: &TxnName) {
        let held: Vec<VarId> = self
            .locks
            .iter()
            .filter(|(_, slot)| slot.holds(txn, LockKind::Read) || slot.holds(txn, LockKind::Write))
            .map(|(var, _)| *var)
            .collect();
        for var in held {
            let slot = self.slot(var).release(txn);
            self.store_slot(var, slot);
        }
    }

    pub fn clear_pending_writes(&mut self, txn: &TxnName) {
        let owned: Vec<VarId> = self
            .locks
            .iter()
            .filter(|(_, slot)| slot.pending_write.as_ref() == Some(txn))
            .map(|(var, _)| *var)
            .collect();
        for var in owned {
            let slot = self.slot(var).clear_pending(txn);
            self.store_slot(var, slot);
        }
    }

    /// Value under a read lock held by `txn`.
    pub fn read(&self, txn: &TxnName, var: VarId) -> Option<Value> {
        if !self.locks.get(&var)?.holds(txn, LockKind::Read) {
            return None;
        }
        self.value(var)
    }

    /// Value recorded by the snapshot taken at exactly `at`.
    pub fn read_snapshot(&self, var: VarId, at: Tick) -> Option<Value> {
        self.snapshots.get(&at)?.get(&var).copied()
    }

    /// Install a committed value. Requires the write lock held by `txn`.
    pub fn write(&mut self, txn: &TxnName, var: VarId, value: Value) -> bool {
        let holds = self
            .locks
            .get(&var)
            .is_some_and(|slot| slot.holds(txn, LockKind::Write));
        if !holds {
            return false;
        }
        self.values.insert(var, value);
        if self.catalog.is_replicated(var) {
            self.readable.insert(var, true);
        }
        true
    }

    pub fn take_snapshot(&mut self, at: Tick) {
        self.snapshots
            .entry(at)
            .or_insert_with(|| self.values.clone());
    }

    pub fn fail(&mut self, at: Tick) {
        self.status = SiteStatus::Down;
        self.last_status_change = at;
        self.locks.clear();
    }

    pub fn recover(&mut self) {
        self.status = SiteStatus::Up;
        for readable in self.readable.values_mut() {
            *readable = false;
        }
    }
}
