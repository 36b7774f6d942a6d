use thiserror::Error;

use crate::api::ApiError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced to callers of the store, the interceptor and the
/// resource client.
#[derive(Error, Debug)]
pub enum Error {
    /// The persistence backend failed to read or write.
    #[error("storage fault: {0:#}")]
    StorageFault(anyhow::Error),

    /// Offline (or failed over) GET with nothing cached to answer it.
    #[error("no network and no stored data for '{collection}' ({url})")]
    OfflineUnavailable { collection: String, url: String },

    /// The transport failed or the server answered with a non-2xx status.
    #[error(transparent)]
    Network(#[from] ApiError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation {operation} is not allowed on resource '{resource}'")]
    MethodNotAllowed { resource: String, operation: String },
}

impl Error {
    pub(crate) fn storage(err: impl Into<anyhow::Error>) -> Self {
        Error::StorageFault(err.into())
    }
}
