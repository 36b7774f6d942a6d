#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use offsync_core::{
    ApiError, Connectivity, Interceptor, LocalStore, Request, Response, SyncEngine, SyncOptions,
    Transport,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const BASE: &str = "https://api.test";

pub fn url(path: &str) -> String {
    format!("{}{}", BASE, path)
}

/// Scripted answer for the next call.
pub enum Reply {
    Ok(u16, Option<Value>),
    Status(u16),
    Hang,
}

/// Transport double: records every request and answers from a script,
/// echoing the request body with 200 once the script runs out.
pub struct FakeTransport {
    calls: Mutex<Vec<Request>>,
    script: Mutex<VecDeque<Reply>>,
    gate: Option<Semaphore>,
    seen: Notify,
    /// When set, echoed object bodies without an `id` get the next one.
    next_id: Option<AtomicU64>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Every call blocks until `release` hands out a permit.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(Some(Semaphore::new(0))))
    }

    /// Echoes like `new`, but acts as a server assigning ids to new items.
    pub fn assigning_ids(first: u64) -> Arc<Self> {
        let mut transport = Self::build(None);
        transport.next_id = Some(AtomicU64::new(first));
        Arc::new(transport)
    }

    fn build(gate: Option<Semaphore>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            gate,
            seen: Notify::new(),
            next_id: None,
        }
    }

    fn echo(&self, request: &Request) -> Option<Value> {
        let mut body = request.body.clone();
        if let (Some(next_id), Some(Value::Object(map))) = (&self.next_id, body.as_mut()) {
            map.entry("id")
                .or_insert_with(|| Value::from(next_id.fetch_add(1, Ordering::SeqCst)));
        }
        body
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.url).collect()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.seen.notified();
            if self.call_count() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &Request) -> Result<Response, ApiError> {
        self.calls.lock().unwrap().push(request.clone());
        let reply = self.script.lock().unwrap().pop_front();
        self.seen.notify_waiters();

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        match reply {
            Some(Reply::Ok(status, body)) => Ok(Response::from_network(status, request.url.clone(), body)),
            Some(Reply::Status(status)) => Err(ApiError::from_status(status, "scripted failure")),
            Some(Reply::Hang) => std::future::pending().await,
            None => Ok(Response::from_network(200, request.url.clone(), self.echo(request))),
        }
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<LocalStore>,
    pub transport: Arc<FakeTransport>,
    pub connectivity: Connectivity,
    pub interceptor: Interceptor,
    pub engine: Arc<SyncEngine>,
}

impl Harness {
    pub async fn new(online: bool) -> Self {
        Self::with(online, FakeTransport::new(), SyncOptions::default()).await
    }

    pub async fn with(online: bool, transport: Arc<FakeTransport>, options: SyncOptions) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(LocalStore::open(dir.path()).await.expect("open store"));
        let connectivity = Connectivity::new(online);
        let interceptor = Interceptor::new(store.clone(), transport.clone(), connectivity.clone());
        let engine = Arc::new(SyncEngine::new(store.clone(), transport.clone(), options));
        Self {
            dir,
            store,
            transport,
            connectivity,
            interceptor,
            engine,
        }
    }
}
