//! Request routing policy.
//!
//! For every outgoing request the `Interceptor` consults `decide` with the
//! request method, the connectivity state and the caller's
//! `InterceptorConfig`, then carries out the chosen `Route`. The decision
//! itself is pure; all I/O happens in the interceptor.

pub mod interceptor;

pub use interceptor::Interceptor;

use serde::{Deserialize, Serialize};

use crate::api::Method;

/// Per-request caching behavior, supplied by the caller and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptorConfig {
    /// Collection the request reads or writes. Without it nothing is cached
    /// or queued.
    pub collection_key: Option<String>,
    /// Write successful GET responses into the cache.
    #[serde(default)]
    pub should_store: bool,
    /// Answer a failed GET from the cache instead of returning the error.
    #[serde(default)]
    pub should_return_stored_values_on_error: bool,
    /// Clear the collection before sending (online only).
    #[serde(default)]
    pub cache_buster: bool,
}

impl InterceptorConfig {
    pub fn for_collection(collection_key: impl Into<String>) -> Self {
        Self {
            collection_key: Some(collection_key.into()),
            ..Self::default()
        }
    }

    pub fn store(mut self) -> Self {
        self.should_store = true;
        self
    }

    pub fn fallback_on_error(mut self) -> Self {
        self.should_return_stored_values_on_error = true;
        self
    }

    pub fn bust_cache(mut self) -> Self {
        self.cache_buster = true;
        self
    }

    fn collection(&self) -> Option<&str> {
        self.collection_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Send untouched, no caching.
    PassThrough,
    /// Online GET: fetch, optionally store, optionally fall back on error.
    Fetch,
    /// Offline GET: answer from the cache.
    ReadCache,
    /// Online write: send, then fold the response into the cache.
    WriteThrough,
    /// Offline write: queue for replay and apply optimistically.
    Enqueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Clear the collection before anything else happens.
    pub bust_cache: bool,
    pub route: Route,
}

/// Route a request. Rules, highest priority first:
/// no collection ⇒ pass through; online cache-buster ⇒ clear first and keep
/// the normal handling; GET ⇒ fetch online or read cache offline; writes ⇒
/// write through online or enqueue offline; any other method passes through.
pub fn decide(method: Method, online: bool, config: Option<&InterceptorConfig>) -> Decision {
    let Some(config) = config.filter(|c| c.collection().is_some()) else {
        return Decision {
            bust_cache: false,
            route: Route::PassThrough,
        };
    };

    let route = match (method, online) {
        (Method::Get, true) => Route::Fetch,
        (Method::Get, false) => Route::ReadCache,
        (m, true) if m.is_write() => Route::WriteThrough,
        (m, false) if m.is_write() => Route::Enqueue,
        _ => Route::PassThrough,
    };

    Decision {
        bust_cache: config.cache_buster && online,
        route,
    }
}

/// Id targeted by a URL: its last path segment when that parses as a
/// non-negative integer. Query strings and fragments are ignored, and a
/// trailing slash means no id.
///
/// This is the only rule used to tell item requests (`/todos/1`) from
/// collection requests (`/todos`).
pub fn target_id(url: &str) -> Option<u64> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let last = path.rsplit('/').next()?;
    if last.is_empty() || !last.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    last.parse().ok()
}
