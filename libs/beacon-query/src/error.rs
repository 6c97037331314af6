//! Error types for the query engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The document store could not be reached or rejected a query.
    #[error("Document store error: {0}")]
    Store(String),

    /// Engine definitions could not be loaded or validated.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid schema description at '{path}': {message}")]
    Schema { path: String, message: String },

    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn schema(path: &str, message: impl Into<String>) -> Self {
        Self::Schema {
            path: if path.is_empty() {
                "#".to_string()
            } else {
                path.to_string()
            },
            message: message.into(),
        }
    }

    /// Store failures end the current request; everything else is a load-time problem.
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
