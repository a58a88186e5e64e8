//! Transaction processing module wiring.
//!
//! `site` and `lock` implement the per-site lock and data manager,
//! `wait_for` the deadlock detector, `state` the live transaction records,
//! `coordinator` the cross-site protocols and `scheduler` the tick loop.
//! `types` and `view` hold the shared instruction, outcome and state-dump
//! contracts.

mod catalog;
mod coordinator;
mod lock;
mod scheduler;
mod site;
mod state;
mod types;
mod view;
mod wait_for;

pub use catalog::Catalog;
pub use coordinator::Coordinator;
pub use lock::{LockSlot, LockState};
pub use scheduler::{RunSummary, Scheduler};
pub use site::{Acquire, Site, SiteStatus};
pub use state::{PendingWrite, Transaction, TxnRegistry};
pub use types::{
    AbortReason, Event, EventSink, Input, Instruction, LockKind, Outcome, SimConfig, SiteId,
    Tick, TxnName, Value, VarId, DEFAULT_SITES, DEFAULT_VARIABLES,
};
pub use view::{LockView, SiteView, SystemView, TxnView};
pub use wait_for::WaitForGraph;
