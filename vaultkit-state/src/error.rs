//! Error types for the state layer.

use std::sync::Arc;
use thiserror::Error;
use vaultkit_storage::StorageError;

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur in state operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored value failed to parse into its declared type.
    ///
    /// Never silently mapped to `None`; a silent null would be
    /// indistinguishable from "never set".
    #[error("failed to deserialize state at {key}: {source}")]
    Deserialize {
        /// The storage key that held the bad value.
        key: String,
        /// The underlying parse error.
        source: serde_json::Error,
    },

    /// A value failed to serialize for persistence.
    #[error("failed to serialize state for {key}: {source}")]
    Serialize {
        /// The storage key being written.
        key: String,
        /// The underlying serialize error.
        source: serde_json::Error,
    },

    /// `update` on active-user state found no active user in time.
    ///
    /// Retriable once an account becomes active.
    #[error("no active user available within {0:?}")]
    NoActiveUser(std::time::Duration),

    /// The dependency stream passed to `update_with` did not emit within
    /// the configured timeout. The update was abandoned with no write.
    #[error("update dependency did not emit within {0:?}")]
    DependencyTimeout(std::time::Duration),

    /// The observed state was torn down while a subscription waited on it.
    #[error("state subscription closed")]
    SubscriptionClosed,

    /// An error raised once on a shared stream, observed by a subscriber.
    #[error(transparent)]
    Shared(Arc<StateError>),
}

impl StateError {
    /// Wraps an error for fan-out to every subscriber of a shared stream.
    pub(crate) fn shared(self) -> Arc<StateError> {
        match self {
            StateError::Shared(inner) => inner,
            other => Arc::new(other),
        }
    }
}

impl From<Arc<StateError>> for StateError {
    fn from(inner: Arc<StateError>) -> Self {
        StateError::Shared(inner)
    }
}
