//! Durable local store for offline data access.
//!
//! This module provides the `LocalStore`, which owns two kinds of records:
//! - cached collection items, keyed by (collection, primary key)
//! - the FIFO queue of pending write mutations
//!
//! Both live as JSON files under the configured data directory and survive
//! process restarts. There is no TTL: cached items stay authoritative until a
//! mutation or an explicit clear replaces them.

pub mod records;
pub mod store;

pub use records::{primary_key_of, provisional_key, NewMutation, PendingMutation};
pub use store::LocalStore;
