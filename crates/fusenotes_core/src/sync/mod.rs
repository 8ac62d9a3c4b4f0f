//! Remote synchronization: contract, sync pass and its timer.
//!
//! # Responsibility
//! - Push locally persisted changes to a remote store on a recurring schedule.
//!
//! # Invariants
//! - Merging remote histories is out of scope; sync is push-only.

pub mod auto_update;
pub mod engine;
pub mod remote;
