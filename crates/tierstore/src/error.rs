//! Error types for tierstore

use std::io;

use thiserror::Error;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store and cache operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Value or metadata could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected input, e.g. saving an absent value
    #[error("Validation error: {0}")]
    Validation(String),

    /// Source and first edge disagree; edges were repaired from the source
    #[error("Data from source and cache are inconsistent for id {id:?}")]
    Inconsistent {
        /// Id whose tiers disagreed
        id: String,
    },

    /// A tier's store call failed
    #[error("Backend operation failed at {tier}: {source}")]
    Backend {
        /// Tier label, e.g. `edge[1]` or `source`
        tier: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Id not present in the store
    #[error("Entry not found: {id:?}")]
    NotFound {
        /// Missing id
        id: String,
    },

    /// Optional capability not provided by this store
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Serialized execution queue has shut down
    #[error("Execution queue is closed")]
    QueueClosed,

    /// Store initialization failed
    #[error("Initialization failed: {0}")]
    Init(String),

    /// Free-form failure reported by an ad hoc store
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Wrap a per-tier failure with the tier's label
    pub fn backend(tier: impl Into<String>, source: Error) -> Self {
        Error::Backend {
            tier: tier.into(),
            source: Box::new(source),
        }
    }
}
