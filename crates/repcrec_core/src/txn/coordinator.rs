//! Transaction manager: routes instructions to sites and owns the cross-site
//! protocols.
//!
//! The coordinator keeps the logical clock, the live transaction registry and
//! the wait-for graph. Reads of replicated variables rotate over the up sites
//! starting after the last site used. Writes of replicated variables are
//! admitted only when every up site can grant the write lock at once; until
//! then the writer leaves a pending-write marker at each up site so later
//! readers cannot starve it. Commit validation aborts a transaction if any
//! site it touched failed after the first access.

use std::collections::BTreeSet;

use super::catalog::Catalog;
use super::site::{Acquire, Site};
use super::state::{PendingWrite, Transaction, TxnRegistry};
use super::view::{SiteView, SystemView, TxnView};
use super::wait_for::WaitForGraph;
use super::{
    AbortReason, Instruction, LockKind, Outcome, SimConfig, SiteId, Tick, TxnName, Value, VarId,
};

#[derive(Debug)]
pub struct Coordinator {
    catalog: Catalog,
    /// Indexed by `site id - 1`.
    sites: Vec<Site>,
    txns: TxnRegistry,
    wait_for: WaitForGraph,
    clock: Tick,
    /// Last site picked for a replicated read.
    cursor: SiteId,
}

impl Coordinator {
    pub fn new(config: &SimConfig) -> Self {
        let catalog = Catalog::new(config);
        let sites = catalog.site_ids().map(|id| Site::new(id, &catalog)).collect();
        let cursor = catalog.site_count();
        Self {
            catalog,
            sites,
            txns: TxnRegistry::new(),
            wait_for: WaitForGraph::new(),
            clock: 0,
            cursor,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn now(&self) -> Tick {
        self.clock
    }

    pub fn advance_clock(&mut self) -> Tick {
        self.clock += 1;
        self.clock
    }

    pub fn site(&self, id: SiteId) -> Option<&Site> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.sites.get(idx)
    }

    fn site_mut(&mut self, id: SiteId) -> Option<&mut Site> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.sites.get_mut(idx)
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }

    pub fn transaction(&self, name: &TxnName) -> Option<&Transaction> {
        self.txns.get(name)
    }

    pub fn transactions(&self) -> &TxnRegistry {
        &self.txns
    }

    pub fn wait_for(&self) -> &WaitForGraph {
        &self.wait_for
    }

    fn is_site_up(&self, id: SiteId) -> bool {
        self.site(id).is_some_and(Site::is_up)
    }

    fn up_sites(&self) -> Vec<SiteId> {
        self.sites
            .iter()
            .filter(|site| site.is_up())
            .map(Site::id)
            .collect()
    }

    pub fn up_site_count(&self) -> usize {
        self.sites.iter().filter(|site| site.is_up()).count()
    }

    /// Advance the round-robin cursor to the next up site.
    fn next_up_site(&mut self) -> Option<SiteId> {
        let total = self.catalog.site_count();
        for _ in 0..total {
            self.cursor = if self.cursor >= total { 1 } else { self.cursor + 1 };
            if self.is_site_up(self.cursor) {
                return Some(self.cursor);
            }
        }
        None
    }

    /// Run one instruction against the current state.
    ///
    /// `QueryState` reports an empty buffer here; the scheduler owns the
    /// buffer and builds the full view itself.
    pub fn execute(&mut self, instruction: &Instruction) -> Outcome {
        match instruction {
            Instruction::Begin { txn } => self.begin(txn, false),
            Instruction::BeginReadOnly { txn } => self.begin(txn, true),
            Instruction::Read { txn, var } => {
                if !self.catalog.has_variable(*var) {
                    return Outcome::unknown(format!("unknown variable x{var}"));
                }
                self.read(txn, *var)
            }
            Instruction::Write { txn, var, value } => {
                if !self.catalog.has_variable(*var) {
                    return Outcome::unknown(format!("unknown variable x{var}"));
                }
                self.write(txn, *var, *value)
            }
            Instruction::End { txn } => self.end(txn),
            Instruction::Fail { site } => self.fail(*site),
            Instruction::Recover { site } => self.recover(*site),
            Instruction::Dump => Outcome::Dump { sites: self.dump() },
            Instruction::QueryState => Outcome::State {
                state: Box::new(self.query_state(Vec::new())),
            },
        }
    }

    pub fn begin(&mut self, name: &TxnName, read_only: bool) -> Outcome {
        if self.txns.contains(name) {
            return Outcome::unknown(format!("transaction {name} already exists"));
        }
        if read_only {
            if self.up_site_count() < self.sites.len() {
                tracing::debug!(txn = %name, "read-only begin waits for all sites to be up");
                return Outcome::blocked(BTreeSet::new());
            }
            let now = self.clock;
            for site in &mut self.sites {
                site.take_snapshot(now);
            }
        }
        tracing::debug!(txn = %name, read_only, tick = self.clock, "transaction begins");
        self.txns
            .insert(Transaction::new(name.clone(), self.clock, read_only));
        Outcome::done()
    }

    pub fn read(&mut self, name: &TxnName, var: VarId) -> Outcome {
        let Some(txn) = self.txns.get(name) else {
            tracing::debug!(txn = %name, var, "read for inactive transaction ignored");
            return Outcome::done();
        };
        let (read_only, begin) = (txn.read_only, txn.begin);
        if !read_only {
            if let Some(value) = txn.local_write(var) {
                return Outcome::value(value);
            }
        }

        let replicated = self.catalog.is_replicated(var);
        let attempts = if replicated { self.up_site_count() } else { 1 };
        let mut blockers = BTreeSet::new();
        for _ in 0..attempts {
            let site_id = if replicated {
                match self.next_up_site() {
                    Some(id) => id,
                    None => break,
                }
            } else {
                let home = self.catalog.home_site(var);
                if !self.is_site_up(home) {
                    break;
                }
                home
            };
            let Some(site) = self.site_mut(site_id) else {
                break;
            };
            let value = if read_only {
                site.read_snapshot(var, begin)
            } else if site.is_readable(var) {
                match site.acquire_lock(name, var, LockKind::Read) {
                    Acquire::Granted => site.read(name, var),
                    Acquire::Blocked(set) => {
                        blockers.extend(set);
                        None
                    }
                    Acquire::NotHosted => None,
                }
            } else {
                None
            };
            if let Some(value) = value {
                let now = self.clock;
                if let Some(txn) = self.txns.get_mut(name) {
                    txn.record_access(site_id, now);
                }
                return Outcome::value(value);
            }
        }

        blockers.remove(name);
        for blocker in &blockers {
            self.wait_for.add_edge(name, blocker);
        }
        tracing::debug!(txn = %name, var, ?blockers, "read blocked");
        Outcome::blocked(blockers)
    }

    pub fn write(&mut self, name: &TxnName, var: VarId, value: Value) -> Outcome {
        let Some(txn) = self.txns.get(name) else {
            tracing::debug!(txn = %name, var, "write for inactive transaction ignored");
            return Outcome::done();
        };
        if txn.read_only {
            return Outcome::unknown(format!("read-only transaction {name} cannot write"));
        }

        let up = self.up_sites();
        if up.is_empty() {
            return Outcome::blocked(BTreeSet::new());
        }

        if self.catalog.is_replicated(var) {
            let mut blockers = BTreeSet::new();
            for id in &up {
                if let Some(site) = self.site(*id) {
                    blockers.extend(site.check_lock(name, var, LockKind::Write));
                }
            }
            if blockers.is_empty() {
                for id in &up {
                    if let Some(site) = self.site_mut(*id) {
                        if let Acquire::Blocked(set) = site.acquire_lock(name, var, LockKind::Write)
                        {
                            tracing::warn!(site = *id, txn = %name, var, ?set, "write lock lost after check");
                        }
                    }
                }
                self.buffer_write(name, var, value, up);
                return Outcome::done();
            }
            for id in &up {
                if let Some(site) = self.site_mut(*id) {
                    site.set_pending_write(name, var);
                }
            }
            return self.block_on(name, var, blockers);
        }

        let home = self.catalog.home_site(var);
        if !self.is_site_up(home) {
            return Outcome::blocked(BTreeSet::new());
        }
        let Some(site) = self.site_mut(home) else {
            return Outcome::blocked(BTreeSet::new());
        };
        match site.acquire_lock(name, var, LockKind::Write) {
            Acquire::Granted => {
                self.buffer_write(name, var, value, vec![home]);
                Outcome::done()
            }
            Acquire::Blocked(blockers) => self.block_on(name, var, blockers),
            Acquire::NotHosted => Outcome::unknown(format!("x{var} is not stored at site {home}")),
        }
    }

    fn buffer_write(&mut self, name: &TxnName, var: VarId, value: Value, sites: Vec<SiteId>) {
        let now = self.clock;
        let Some(txn) = self.txns.get_mut(name) else {
            return;
        };
        for id in &sites {
            txn.record_access(*id, now);
        }
        txn.writes.push(PendingWrite {
            var,
            value,
            sites: sites.into_iter().collect(),
        });
    }

    fn block_on(&mut self, name: &TxnName, var: VarId, mut blockers: BTreeSet<TxnName>) -> Outcome {
        blockers.remove(name);
        for blocker in &blockers {
            self.wait_for.add_edge(name, blocker);
        }
        tracing::debug!(txn = %name, var, ?blockers, "write blocked");
        Outcome::blocked(blockers)
    }

    pub fn end(&mut self, name: &TxnName) -> Outcome {
        let Some(txn) = self.txns.get(name) else {
            tracing::debug!(txn = %name, "end for inactive transaction ignored");
            return Outcome::done();
        };
        if txn.blocked_instructions > 0 {
            return Outcome::blocked(BTreeSet::new());
        }

        let failed_site = txn.accessed_sites.iter().find_map(|(id, accessed)| {
            let site = self.site(*id)?;
            (site.last_status_change() > *accessed).then_some(*id)
        });
        if let Some(site) = failed_site {
            tracing::info!(txn = %name, site, "accessed site failed before commit");
            self.terminate(name);
            return Outcome::Aborted {
                txn: name.clone(),
                reason: AbortReason::SiteFailure,
            };
        }

        let writes = txn.writes.clone();
        for write in &writes {
            for id in &write.sites {
                let Some(site) = self.site_mut(*id) else {
                    continue;
                };
                if !site.write(name, write.var, write.value) {
                    tracing::warn!(site = *id, txn = %name, var = write.var, "site refused committed write");
                }
            }
        }
        tracing::info!(txn = %name, tick = self.clock, writes = writes.len(), "transaction committed");
        self.terminate(name);
        Outcome::Committed { txn: name.clone() }
    }

    /// Abort a live transaction. Returns `None` if `name` is not live.
    pub fn abort(&mut self, name: &TxnName, reason: AbortReason) -> Option<Outcome> {
        if !self.txns.contains(name) {
            return None;
        }
        tracing::info!(txn = %name, %reason, tick = self.clock, "transaction aborted");
        self.terminate(name);
        Some(Outcome::Aborted {
            txn: name.clone(),
            reason,
        })
    }

    fn terminate(&mut self, name: &TxnName) {
        if let Some(txn) = self.txns.remove(name) {
            for id in txn.accessed_sites.keys() {
                if let Some(site) = self.site_mut(*id) {
                    site.release_locks(name);
                }
            }
        }
        for site in &mut self.sites {
            site.clear_pending_writes(name);
        }
        self.wait_for.remove_node(name);
    }

    pub fn fail(&mut self, id: SiteId) -> Outcome {
        let now = self.clock;
        let Some(site) = self.site_mut(id) else {
            return Outcome::unknown(format!("unknown site {id}"));
        };
        site.fail(now);
        tracing::info!(site = id, tick = now, "site failed");
        Outcome::done()
    }

    pub fn recover(&mut self, id: SiteId) -> Outcome {
        let Some(site) = self.site_mut(id) else {
            return Outcome::unknown(format!("unknown site {id}"));
        };
        if site.is_up() {
            tracing::debug!(site = id, "recover of an up site ignored");
            return Outcome::done();
        }
        site.recover();
        tracing::info!(site = id, "site recovered");
        Outcome::done()
    }

    /// +1 on the first failure of a read/write, -1 when a counted one succeeds.
    pub fn update_blocked_count(&mut self, name: &TxnName, succeeded: bool, counted: bool) {
        let Some(txn) = self.txns.get_mut(name) else {
            return;
        };
        match (succeeded, counted) {
            (false, false) => txn.blocked_instructions += 1,
            (true, true) => txn.blocked_instructions = txn.blocked_instructions.saturating_sub(1),
            _ => {}
        }
    }

    /// Pick the youngest member of a wait-for cycle, if one exists.
    ///
    /// A cycle made only of transactions that are no longer live is dropped
    /// from the graph and reported as no victim.
    pub fn find_deadlock_victim(&mut self) -> Option<TxnName> {
        let cycle = self.wait_for.find_cycle()?;
        match self.txns.youngest(&cycle) {
            Some(victim) => {
                tracing::info!(victim = %victim, ?cycle, "deadlock detected");
                Some(victim)
            }
            None => {
                tracing::warn!(?cycle, "dropping wait-for cycle of inactive transactions");
                for name in &cycle {
                    self.wait_for.remove_node(name);
                }
                None
            }
        }
    }

    pub fn dump(&self) -> Vec<SiteView> {
        self.sites.iter().map(SiteView::from).collect()
    }

    pub fn query_state(&self, buffer: Vec<Instruction>) -> SystemView {
        SystemView {
            tick: self.clock,
            transactions: self.txns.iter().map(TxnView::from).collect(),
            buffer,
            wait_for: self
                .wait_for
                .edges()
                .iter()
                .map(|(from, to)| (from.clone(), to.iter().cloned().collect()))
                .collect(),
            sites: self.dump(),
        }
    }
}
