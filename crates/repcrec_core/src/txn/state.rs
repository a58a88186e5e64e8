//! Live transaction records.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{SiteId, Tick, TxnName, Value, VarId};

/// Buffered write, applied to `sites` only when the transaction commits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingWrite {
    pub var: VarId,
    pub value: Value,
    pub sites: BTreeSet<SiteId>,
}

#[derive(Clone, Debug)]
pub struct Transaction {
    pub name: TxnName,
    pub read_only: bool,
    pub begin: Tick,
    /// First tick each site was touched. Commit validation compares these
    /// against the sites' last failure time.
    pub accessed_sites: BTreeMap<SiteId, Tick>,
    pub writes: Vec<PendingWrite>,
    /// Read/write instructions of this transaction still waiting in the
    /// scheduler buffer. `end` waits until this drops to zero.
    pub blocked_instructions: usize,
}

impl Transaction {
    pub fn new(name: TxnName, begin: Tick, read_only: bool) -> Self {
        Self {
            name,
            read_only,
            begin,
            accessed_sites: BTreeMap::new(),
            writes: Vec::new(),
            blocked_instructions: 0,
        }
    }

    /// Latest buffered value for `var`, if this transaction wrote it.
    pub fn local_write(&self, var: VarId) -> Option<Value> {
        self.writes
            .iter()
            .rev()
            .find(|w| w.var == var)
            .map(|w| w.value)
    }

    /// Record the first access to `site`; later accesses keep the first tick.
    pub fn record_access(&mut self, site: SiteId, at: Tick) {
        self.accessed_sites.entry(site).or_insert(at);
    }
}

/// Transactions indexed by name.
#[derive(Clone, Debug, Default)]
pub struct TxnRegistry {
    txns: BTreeMap<TxnName, Transaction>,
}

impl TxnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &TxnName) -> bool {
        self.txns.contains_key(name)
    }

    pub fn insert(&mut self, txn: Transaction) {
        self.txns.insert(txn.name.clone(), txn);
    }

    pub fn get(&self, name: &TxnName) -> Option<&Transaction> {
        self.txns.get(name)
    }

    pub fn get_mut(&mut self, name: &TxnName) -> Option<&mut Transaction> {
        self.txns.get_mut(name)
    }

    pub fn remove(&mut self, name: &TxnName) -> Option<Transaction> {
        self.txns.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.txns.values()
    }

    pub fn len(&self) -> usize {
        self.txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txns.is_empty()
    }

    /// Youngest member of `names` (largest begin tick). Ties keep the first
    /// name in iteration order.
    pub fn youngest<'a>(&self, names: impl IntoIterator<Item = &'a TxnName>) -> Option<TxnName> {
        let mut best: Option<(Tick, &TxnName)> = None;
        for name in names {
            let Some(txn) = self.txns.get(name) else {
                continue;
            };
            match best {
                Some((begin, _)) if begin >= txn.begin => {}
                _ => best = Some((txn.begin, name)),
            }
        }
        best.map(|(_, name)| name.clone())
    }
}
