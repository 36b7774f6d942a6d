use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{decide, target_id, InterceptorConfig, Route};
use crate::api::{Method, Request, Response, Transport};
use crate::cache::{primary_key_of, LocalStore, NewMutation};
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};

/// Sits in front of the transport and answers each request live, from the
/// cache, or by queueing it, so callers never branch on connectivity.
#[derive(Clone)]
pub struct Interceptor {
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
}

impl Interceptor {
    pub fn new(
        store: Arc<LocalStore>,
        transport: Arc<dyn Transport>,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            store,
            transport,
            connectivity,
        }
    }

    pub async fn send(&self, request: Request, config: Option<&InterceptorConfig>) -> Result<Response> {
        let online = self.connectivity.is_online();
        let decision = decide(request.method, online, config);

        let (Some(config), Some(collection)) = (config, config.and_then(InterceptorConfig::collection))
        else {
            debug!(method = %request.method, url = %request.url, "Passing request through");
            return Ok(self.transport.send(&request).await?);
        };

        debug!(
            method = %request.method,
            url = %request.url,
            collection,
            online,
            route = ?decision.route,
            bust_cache = decision.bust_cache,
            "Routing request"
        );

        if decision.bust_cache {
            self.store.clear_collection(collection).await?;
        }

        match decision.route {
            Route::PassThrough => Ok(self.transport.send(&request).await?),
            Route::Fetch => self.fetch(&request, collection, config).await,
            Route::ReadCache => self.read_cache(&request.url, collection).await,
            Route::WriteThrough => self.write_through(&request, collection).await,
            Route::Enqueue => self.enqueue(request, collection).await,
        }
    }

    async fn fetch(
        &self,
        request: &Request,
        collection: &str,
        config: &InterceptorConfig,
    ) -> Result<Response> {
        match self.transport.send(request).await {
            Ok(response) => {
                if config.should_store {
                    self.store_response(collection, &request.url, &response).await?;
                }
                Ok(response)
            }
            Err(e) if config.should_return_stored_values_on_error => {
                warn!(url = %request.url, collection, error = %e, "Fetch failed, answering from cache");
                self.read_cache(&request.url, collection).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Single-item upsert for item URLs, full replace for collection URLs.
    async fn store_response(&self, collection: &str, url: &str, response: &Response) -> Result<()> {
        let Some(body) = response.body.as_ref() else {
            debug!(url, "Nothing to store: empty response body");
            return Ok(());
        };

        match (target_id(url), body) {
            (Some(id), _) => {
                let key = primary_key_of(body).unwrap_or_else(|| id.to_string());
                self.store
                    .apply_mutation(collection, &key, Method::Get, Some(body.clone()))
                    .await
            }
            (None, Value::Array(items)) => {
                self.store.replace_collection(collection, items).await?;
                Ok(())
            }
            (None, _) => {
                warn!(url, collection, "Collection response is not an array, not stored");
                Ok(())
            }
        }
    }

    async fn read_cache(&self, url: &str, collection: &str) -> Result<Response> {
        let cached = match target_id(url) {
            Some(id) => self.store.get_item(collection, &id.to_string()).await?,
            None => {
                let items = self.store.get_collection(collection).await?;
                (!items.is_empty()).then_some(Value::Array(items))
            }
        };

        match cached {
            Some(body) => {
                debug!(url, collection, "Answered from cache");
                Ok(Response::from_cache(url, body))
            }
            None => Err(Error::OfflineUnavailable {
                collection: collection.to_string(),
                url: url.to_string(),
            }),
        }
    }

    async fn write_through(&self, request: &Request, collection: &str) -> Result<Response> {
        let response = self.transport.send(request).await?;
        fold_write(&self.store, collection, request.method, &request.url, response.body.as_ref()).await?;
        Ok(response)
    }

    async fn enqueue(&self, request: Request, collection: &str) -> Result<Response> {
        let key = write_key(request.body.as_ref(), &request.url);
        let mut mutation = NewMutation::from_request(&request, collection);
        mutation.provisional =
            key.is_none() && request.body.is_some() && request.method != Method::Delete;

        let (id, key) = self.store.enqueue_and_apply(mutation, key).await?;
        if key.is_none() {
            debug!(mutation_id = id, "No key for optimistic apply");
        }

        info!(mutation_id = id, method = %request.method, url = %request.url, collection, "Queued offline mutation");
        Ok(Response::accepted(request.url))
    }
}

/// Cache key for a write: the body's own id, else the id in the URL.
pub(crate) fn write_key(body: Option<&Value>, url: &str) -> Option<String> {
    body.and_then(primary_key_of)
        .or_else(|| target_id(url).map(|id| id.to_string()))
}

/// Fold a successful write response into the cache.
pub(crate) async fn fold_write(
    store: &LocalStore,
    collection: &str,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> Result<()> {
    let Some(key) = write_key(body, url) else {
        debug!(url, collection, "Write response has no id, cache untouched");
        return Ok(());
    };

    if method == Method::Delete {
        return store.apply_mutation(collection, &key, method, None).await;
    }
    match body {
        Some(body) => store.apply_mutation(collection, &key, method, Some(body.clone())).await,
        None => {
            debug!(url, collection, "Write response has no body, cache untouched");
            Ok(())
        }
    }
}
