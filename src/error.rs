//! Error types for the report publisher.

use serde_json::Value;

/// Result type alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the pipeline can surface.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid configuration, credentials or identity material.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network-level failure talking to a remote endpoint.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The remote service answered with an error envelope.
    #[error("remote API error: {message}; response: {payload}")]
    RemoteApi { message: String, payload: Value },

    /// The service identity tried to own a file in its own (non-existent) quota.
    #[error(
        "storageQuotaExceeded: service accounts have no personal storage quota. \
         Either put the target folder in a Shared Drive and add the service account \
         as a member, or use delegated OAuth with a user account. response: {payload}"
    )]
    QuotaExceeded { payload: Value },

    /// Site definition malformed or query execution failed.
    #[error("data source error: {0}")]
    DataSource(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn remote(message: impl Into<String>, payload: Value) -> Self {
        Error::RemoteApi {
            message: message.into(),
            payload,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<mysql_async::Error> for Error {
    fn from(e: mysql_async::Error) -> Self {
        Error::DataSource(e.to_string())
    }
}
