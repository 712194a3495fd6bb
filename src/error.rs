use thiserror::Error;

/// Failures surfaced by the storage engine.
///
/// Transport failures pass through unmodified; the engine adds no context
/// and performs no classification or retries.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid setup, caught before any I/O is attempted:
    /// an absent destination resolver, an incomplete credential, an empty
    /// container name or blob path.
    #[error("storage engine configuration: {0}")]
    Configuration(String),

    /// Any failure reported by the blob transport (network, auth,
    /// not-found, quota), propagated verbatim.
    #[error(transparent)]
    Transport(#[from] object_store::Error),

    /// The incoming byte stream failed mid-transfer.
    #[error("upload stream failed: {0}")]
    Stream(#[source] anyhow::Error),
}

impl EngineError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    /// True for transport not-found failures, the shape a delete of a
    /// missing blob surfaces.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(object_store::Error::NotFound { .. })
        )
    }
}
