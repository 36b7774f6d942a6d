use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{Headers, Method, Request};

/// Identifier field read from items to derive their primary key.
pub const ID_FIELD: &str = "id";

/// Prefix for keys of items created offline before the server assigned an id.
const PROVISIONAL_PREFIX: &str = "local-";

/// A write recorded while offline, waiting to be replayed in `id` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: u64,
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: Headers,
    pub collection_key: String,
    /// Set when the optimistic cache entry was stored under
    /// `provisional_key(id)` because no real id was known yet.
    #[serde(default)]
    pub provisional: bool,
    pub queued_at: DateTime<Utc>,
}

impl PendingMutation {
    /// The request to replay against the network.
    pub fn to_request(&self) -> Request {
        Request {
            method: self.method,
            url: self.url.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// A mutation before the store has assigned its order id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub headers: Headers,
    pub collection_key: String,
    pub provisional: bool,
}

impl NewMutation {
    pub fn from_request(request: &Request, collection_key: impl Into<String>) -> Self {
        Self {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            headers: request.headers.clone(),
            collection_key: collection_key.into(),
            provisional: false,
        }
    }
}

/// Primary key of an item: its `id` field, numbers stringified.
pub fn primary_key_of(item: &Value) -> Option<String> {
    match item.get(ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cache key for an item created offline by mutation `id`.
pub fn provisional_key(id: u64) -> String {
    format!("{}{}", PROVISIONAL_PREFIX, id)
}
