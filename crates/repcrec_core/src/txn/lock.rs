//! Lock compatibility for a single (site, variable) slot.
//!
//! Every transition is a pure function from the current slot to the next one,
//! so the grant rules can be checked case by case without a site around them.

use std::collections::BTreeSet;

use super::{LockKind, TxnName};

/// Lock held on one variable at one site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LockState {
    #[default]
    Unlocked,
    /// Never empty.
    ReadLocked(BTreeSet<TxnName>),
    WriteLocked(TxnName),
}

/// Lock state plus the pending-write marker of a replicated write that is
/// waiting for admission at every up site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockSlot {
    pub state: LockState,
    pub pending_write: Option<TxnName>,
}

/// Result of a lock request against a slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LockDecision {
    Granted(LockSlot),
    /// Transactions holding or pending a conflicting claim. May contain the
    /// requester itself (its own pending write blocks its reads).
    Blocked(BTreeSet<TxnName>),
}

impl LockSlot {
    pub fn is_idle(&self) -> bool {
        self.state == LockState::Unlocked && self.pending_write.is_none()
    }

    pub fn holds(&self, txn: &TxnName, kind: LockKind) -> bool {
        match (&self.state, kind) {
            (LockState::ReadLocked(readers), LockKind::Read) => readers.contains(txn),
            (LockState::WriteLocked(writer), LockKind::Write) => writer == txn,
            _ => false,
        }
    }

    fn grantable(&self, txn: &TxnName, kind: LockKind) -> bool {
        let no_pending = self.pending_write.is_none();
        let own_pending = self.pending_write.as_ref() == Some(txn);
        match (&self.state, kind) {
            (LockState::Unlocked, LockKind::Read) => no_pending,
            (LockState::Unlocked, LockKind::Write) => no_pending || own_pending,
            (LockState::ReadLocked(readers), LockKind::Read) => {
                no_pending || own_pending || readers.contains(txn)
            }
            // Promotion of the sole reader.
            (LockState::ReadLocked(readers), LockKind::Write) => {
                readers.len() == 1 && readers.contains(txn) && (no_pending || own_pending)
            }
            (LockState::WriteLocked(writer), LockKind::Write) => writer == txn,
            (LockState::WriteLocked(_), LockKind::Read) => false,
        }
    }

    /// Conflicting claimants for `txn` requesting `kind`; empty when grantable.
    pub fn blockers(&self, txn: &TxnName, kind: LockKind) -> BTreeSet<TxnName> {
        let mut set = BTreeSet::new();
        if self.grantable(txn, kind) {
            return set;
        }
        if let Some(owner) = &self.pending_write {
            set.insert(owner.clone());
        }
        match &self.state {
            LockState::Unlocked => {}
            LockState::ReadLocked(readers) => set.extend(readers.iter().cloned()),
            LockState::WriteLocked(writer) => {
                set.insert(writer.clone());
            }
        }
        set
    }

    pub fn acquire(&self, txn: &TxnName, kind: LockKind) -> LockDecision {
        if !self.grantable(txn, kind) {
            return LockDecision::Blocked(self.blockers(txn, kind));
        }
        let state = match (kind, &self.state) {
            (LockKind::Read, LockState::ReadLocked(readers)) => {
                let mut readers = readers.clone();
                readers.insert(txn.clone());
                LockState::ReadLocked(readers)
            }
            (LockKind::Read, _) => LockState::ReadLocked(BTreeSet::from([txn.clone()])),
            (LockKind::Write, _) => LockState::WriteLocked(txn.clone()),
        };
        let pending_write = match kind {
            LockKind::Write if self.pending_write.as_ref() == Some(txn) => None,
            _ => self.pending_write.clone(),
        };
        LockDecision::Granted(LockSlot {
            state,
            pending_write,
        })
    }

    /// Install `txn` as the pending writer. Fails if another marker exists.
    /// On success `txn` gives up its own read lock so that it will observe its
    /// upcoming write rather than the value it read.
    pub fn mark_pending_write(&self, txn: &TxnName) -> Option<LockSlot> {
        if self.pending_write.is_some() {
            return None;
        }
        let state = match &self.state {
            LockState::ReadLocked(readers) if readers.contains(txn) => {
                let mut readers = readers.clone();
                readers.remove(txn);
                if readers.is_empty() {
                    LockState::Unlocked
                } else {
                    LockState::ReadLocked(readers)
                }
            }
            other => other.clone(),
        };
        Some(LockSlot {
            state,
            pending_write: Some(txn.clone()),
        })
    }

    /// Drop every lock `txn` holds here. The pending marker is untouched.
    pub fn release(&self, txn: &TxnName) -> LockSlot {
        let state = match &self.state {
            LockState::ReadLocked(readers) => {
                let mut readers = readers.clone();
                readers.remove(txn);
                if readers.is_empty() {
                    LockState::Unlocked
                } else {
                    LockState::ReadLocked(readers)
                }
            }
            LockState::WriteLocked(writer) if writer == txn => LockState::Unlocked,
            other => other.clone(),
        };
        LockSlot {
            state,
            pending_write: self.pending_write.clone(),
        }
    }

    pub fn clear_pending(&self, txn: &TxnName) -> LockSlot {
        let pending_write = match &self.pending_write {
            Some(owner) if owner == txn => None,
            other => other.clone(),
        };
        LockSlot {
            state: self.state.clone(),
            pending_write,
        }
    }
}
