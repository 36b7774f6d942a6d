//! Offline mutation synchronization.
//!
//! The `SyncEngine` drains the pending-mutation queue against the network,
//! one entry at a time in id order, stopping at the first failure. It runs
//! on startup and whenever connectivity comes back, at most one pass at a
//! time, and reports progress through `SyncEvent` notifications.

pub mod engine;

pub use engine::{SyncEngine, SyncEvent, SyncOptions, SyncOutcome, SyncRun, SyncState};
