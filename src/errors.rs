//! Error hierarchy for the configuration distribution engine.
//!
//! Environmental failures (malformed batches, validation rejections,
//! transport loss) are ordinary `Err` values. Caller contract violations
//! (double `start()`, interest updates on removed watches, reentrant
//! publication) are panics: they indicate a bug, not a condition to
//! recover from.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Settings loading/validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failures while processing a configuration update
    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Failures observed while decoding or applying a configuration update.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// The whole batch envelope could not be interpreted. No per-resource
    /// distinction is possible; every watch of the type is notified.
    #[error("Malformed update batch: {0}")]
    BatchDecode(String),

    /// A resource payload arrived under an unexpected type URL.
    #[error("Resource type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// A single resource payload failed to deserialize.
    #[error("Failed to decode resource {name:?}: {source}")]
    ResourceDecode {
        name: String,
        #[source]
        source: bincode::Error,
    },

    /// The transport lost its connection to the control plane. Retry and
    /// backoff live in the transport layer; the engine only reports it.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Self-inflicted by the subscription facade to unblock startup gating.
    /// Says nothing about upstream health.
    #[error("Initial fetch timed out")]
    InitialFetchTimeout,
}

/// Returned by a consumer that refuses a structurally valid but
/// semantically unacceptable update. The previously published snapshot
/// stays authoritative.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Config update rejected: {reason}")]
pub struct UpdateRejection {
    pub reason: String,
}

impl UpdateRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why an `on_config_update_failed` callback fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdateFailureReason {
    /// Connection dropped or stream reset; the transport will retry.
    TransportFailure,
    /// The batch envelope could not be decoded at all.
    BatchDecodeFailure,
    /// A consumer rejected the update; last-known-good is retained.
    UpdateRejected,
    /// No response of any kind arrived within the initial fetch window.
    InitialFetchTimeout,
}
