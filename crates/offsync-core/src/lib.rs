//! offsync - offline-first data access.
//!
//! A client-side cache of server collections plus a durable queue of
//! pending writes, reconciled with the remote service whenever connectivity
//! is available:
//!
//! - `cache`: the durable `LocalStore` (cached items and the mutation queue)
//! - `policy`: the `Interceptor` deciding, per request, between the network,
//!   the cache and the queue
//! - `sync`: the `SyncEngine` replaying queued writes in order, one pass at
//!   a time
//! - `api`: request/response types and the `Transport` seam
//! - `client`: `OfflineClient`, which wires everything together

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod policy;
pub mod resource;
pub mod sync;

pub use api::{ApiError, HttpTransport, Method, Request, Response, ResponseSource, Transport};
pub use cache::{LocalStore, PendingMutation};
pub use client::OfflineClient;
pub use config::Config;
pub use connectivity::Connectivity;
pub use error::{Error, Result};
pub use policy::{decide, target_id, Decision, Interceptor, InterceptorConfig, Route};
pub use resource::{Operation, Resource, ResourceClient};
pub use sync::{SyncEngine, SyncEvent, SyncOptions, SyncOutcome, SyncRun, SyncState};
