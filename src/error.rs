//! Error types for the lectern pipelines.
//!
//! One enum covers the whole engine; stages that can degrade (cleaner,
//! extractor, planner) recover locally and never surface these, while the
//! stages that cannot (ontology load, index writer) propagate them.

use thiserror::Error;

/// Result type alias for lectern operations.
pub type Result<T> = std::result::Result<T, LecternError>;

/// Error kinds surfaced by the ingestion and query pipelines.
#[derive(Error, Debug)]
pub enum LecternError {
    /// Missing or invalid configuration (ontology file, keys, config tree).
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/5xx/timeout from an external service. Retried per policy.
    #[error("transient error from {service}: {message}")]
    TransientExternal {
        /// Which external contract failed (`"text-model"`, `"embedding"`, `"vector-store"`).
        service: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// 4xx or malformed response from an external service. Not retried by
    /// the transport; call sites may issue one corrective retry.
    #[error("permanent error from {service}: {message}")]
    PermanentExternal {
        /// Which external contract failed.
        service: &'static str,
        /// Underlying failure description.
        message: String,
    },

    /// Metadata that cannot be coerced. Surfaced per-field as warnings,
    /// never fatal for an ingest.
    #[error("validation error: {0}")]
    Validation(String),

    /// The writer could not complete an atomic replace. Cleanup was
    /// attempted so that no mixed-generation vectors remain.
    #[error("partial index write for {doc_id}: {message}")]
    PartialIndex {
        /// Document whose replace failed.
        doc_id: String,
        /// Underlying failure description.
        message: String,
    },

    /// A required ingest stage failed beyond its degradation policy.
    #[error("ingest failed for {doc_id}: {reason}")]
    IngestFailed {
        /// Document that failed to ingest.
        doc_id: String,
        /// Why the document could not be indexed.
        reason: String,
    },

    /// Planner or variant retrieval failed; the query still answers using
    /// the original question and no smart filter.
    #[error("retrieval degraded: {0}")]
    RetrievalDegraded(String),

    /// The operation observed its cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// Storage or serialization fault inside the process.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LecternError {
    /// Whether the retry policy applies to this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientExternal { .. })
    }

    /// Shorthand for a transient external failure.
    pub fn transient(service: &'static str, message: impl Into<String>) -> Self {
        Self::TransientExternal {
            service,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent external failure.
    pub fn permanent(service: &'static str, message: impl Into<String>) -> Self {
        Self::PermanentExternal {
            service,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for LecternError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("sqlite: {err}"))
    }
}

impl From<serde_json::Error> for LecternError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

impl From<std::io::Error> for LecternError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("io: {err}"))
    }
}
