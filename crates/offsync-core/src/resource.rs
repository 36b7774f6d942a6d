//! Typed access to one REST collection through the interceptor.
//!
//! A `Resource` names a collection, its route and the operations the
//! service allows on it; a `ResourceClient<T>` turns those operations into
//! requests (`route` for the collection, `route/<id>` for items) and
//! (de)serializes `T`.

use std::fmt;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::api::{ApiError, Method, Request, Response};
use crate::error::{Error, Result};
use crate::policy::{Interceptor, InterceptorConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Patch,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Update,
        Operation::Patch,
        Operation::Delete,
    ];

    /// Read-only operations.
    pub const READ: [Operation; 2] = [Operation::List, Operation::Get];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::List => "LIST",
            Operation::Get => "GET",
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Patch => "PATCH",
            Operation::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Resource {
    name: String,
    route: String,
    allowed: Vec<Operation>,
    config: InterceptorConfig,
}

impl Resource {
    /// A resource allowing every operation, caching reads and falling back
    /// to the cache when a read fails.
    pub fn new(name: impl Into<String>, route: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            config: InterceptorConfig::for_collection(name.clone())
                .store()
                .fallback_on_error(),
            route: route.into().trim_end_matches('/').to_string(),
            allowed: Operation::ALL.to_vec(),
            name,
        }
    }

    pub fn with_operations(mut self, operations: &[Operation]) -> Self {
        self.allowed = operations.to_vec();
        self
    }

    /// Replace the default interceptor config. The collection key always
    /// stays the resource name.
    pub fn with_config(mut self, config: InterceptorConfig) -> Self {
        self.config = InterceptorConfig {
            collection_key: Some(self.name.clone()),
            ..config
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn allows(&self, operation: Operation) -> bool {
        self.allowed.contains(&operation)
    }

    pub fn collection_url(&self) -> String {
        self.route.clone()
    }

    pub fn item_url(&self, id: u64) -> String {
        format!("{}/{}", self.route, id)
    }
}

pub struct ResourceClient<T> {
    interceptor: Interceptor,
    resource: Resource,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceClient<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(interceptor: Interceptor, resource: Resource) -> Self {
        Self {
            interceptor,
            resource,
            _marker: PhantomData,
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    async fn call(&self, operation: Operation, request: Request) -> Result<Response> {
        if !self.resource.allows(operation) {
            return Err(Error::MethodNotAllowed {
                resource: self.resource.name.clone(),
                operation: operation.to_string(),
            });
        }
        self.interceptor.send(request, Some(&self.resource.config)).await
    }

    fn encode(item: &T) -> Result<Value> {
        serde_json::to_value(item).map_err(|e| Error::InvalidRequest(format!("Failed to encode body: {}", e)))
    }

    fn decode<U: DeserializeOwned>(response: Response) -> Result<Option<U>> {
        match response.body {
            Some(body) => serde_json::from_value(body).map(Some).map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to decode {}: {}", response.url, e)).into()
            }),
            None => Ok(None),
        }
    }

    fn require<U>(value: Option<U>, url: &str) -> Result<U> {
        value.ok_or_else(|| ApiError::InvalidResponse(format!("Empty response body from {}", url)).into())
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        let url = self.resource.collection_url();
        let response = self.call(Operation::List, Request::get(url.as_str())).await?;
        Self::require(Self::decode(response)?, &url)
    }

    pub async fn get(&self, id: u64) -> Result<T> {
        let url = self.resource.item_url(id);
        let response = self.call(Operation::Get, Request::get(url.as_str())).await?;
        Self::require(Self::decode(response)?, &url)
    }

    /// Returns the created item, or `None` when the write was queued offline.
    pub async fn create(&self, item: &T) -> Result<Option<T>> {
        let request = Request::post(self.resource.collection_url(), Self::encode(item)?);
        Self::decode(self.call(Operation::Create, request).await?)
    }

    pub async fn update(&self, id: u64, item: &T) -> Result<Option<T>> {
        let request = Request::put(self.resource.item_url(id), Self::encode(item)?);
        Self::decode(self.call(Operation::Update, request).await?)
    }

    pub async fn patch(&self, id: u64, item: &T) -> Result<Option<T>> {
        let request = Request::patch(self.resource.item_url(id), Self::encode(item)?);
        Self::decode(self.call(Operation::Patch, request).await?)
    }

    pub async fn delete(&self, id: u64) -> Result<()> {
        let request = Request::new(Method::Delete, self.resource.item_url(id));
        self.call(Operation::Delete, request).await?;
        Ok(())
    }
}
