//! Top-level entry point wiring the store, transport, connectivity signal,
//! interceptor and sync engine together.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::{HttpTransport, Request, Response, Transport};
use crate::cache::LocalStore;
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::policy::{Interceptor, InterceptorConfig};
use crate::resource::{Operation, Resource, ResourceClient};
use crate::sync::SyncEngine;

pub struct OfflineClient {
    store: Arc<LocalStore>,
    connectivity: Connectivity,
    interceptor: Interceptor,
    sync: Arc<SyncEngine>,
    base_url: Option<String>,
}

impl OfflineClient {
    /// Open the local store from `config` and talk HTTP.
    pub async fn open(config: &Config) -> Result<Self> {
        let transport = HttpTransport::with_timeout(config.request_timeout())?;
        let connectivity = Connectivity::new(!config.start_offline);
        Self::with_transport(config, Arc::new(transport), connectivity).await
    }

    pub async fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
        connectivity: Connectivity,
    ) -> Result<Self> {
        let data_dir = config.data_dir().map_err(Error::storage)?;
        debug!(?data_dir, "Opening offline client");

        let store = Arc::new(LocalStore::open(data_dir).await?);
        let interceptor = Interceptor::new(
            Arc::clone(&store),
            Arc::clone(&transport),
            connectivity.clone(),
        );
        let sync = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            transport,
            config.sync_options(),
        ));

        Ok(Self {
            store,
            connectivity,
            interceptor,
            sync,
            base_url: config.base_url.clone(),
        })
    }

    /// Kick off the startup sync pass and watch for reconnects. Returns the
    /// watcher task.
    pub fn start(&self) -> JoinHandle<()> {
        info!("Starting offline synchronization");
        let engine = Arc::clone(&self.sync);
        tokio::spawn(async move {
            engine.sync().await;
        });
        self.sync.watch_connectivity(&self.connectivity)
    }

    pub async fn send(&self, request: Request, config: Option<&InterceptorConfig>) -> Result<Response> {
        self.interceptor.send(request, config).await
    }

    /// Typed client for `<base_url>/<name>`.
    pub fn resource<T>(&self, name: &str, operations: &[Operation]) -> Result<ResourceClient<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| Error::InvalidRequest("no base_url configured".to_string()))?;
        let route = format!("{}/{}", base_url.trim_end_matches('/'), name);
        let resource = Resource::new(name, route).with_operations(operations);
        Ok(ResourceClient::new(self.interceptor.clone(), resource))
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn sync_engine(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }
}
