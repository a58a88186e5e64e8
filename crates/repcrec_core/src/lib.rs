//! Replicated concurrency control and recovery simulator.
//!
//! This crate provides the transaction processing core used by the `repcrec`
//! binary. Callers feed already-parsed `Instruction`s to a `Scheduler` and
//! receive structured `Event`s through an `EventSink`; text grammar and
//! rendering live in the outer crate.

pub mod txn;
