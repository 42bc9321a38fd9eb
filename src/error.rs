//! Session and application error types.

use crate::config::ConfigError;
use crate::link::LinkError;
use thiserror::Error;

/// A link fault that ended a session, tagged with the side it happened on.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The controller's own link failed. Only this session is affected.
    #[error("controller link '{device}' failed: {source}")]
    Controller {
        device: String,
        #[source]
        source: LinkError,
    },

    /// The shared device failed. Every session depends on it.
    #[error("shared link '{device}' failed: {source}")]
    Shared {
        device: String,
        #[source]
        source: LinkError,
    },
}

impl SessionError {
    pub fn controller(device: impl Into<String>, source: LinkError) -> Self {
        Self::Controller {
            device: device.into(),
            source,
        }
    }

    pub fn shared(device: impl Into<String>, source: LinkError) -> Self {
        Self::Shared {
            device: device.into(),
            source,
        }
    }

    /// Whether the fault was on the shared device.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared { .. })
    }
}

/// Unified application error type, as reported by the binary.
#[derive(Debug, Error)]
pub enum SharerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open '{device}': {source}")]
    Open {
        device: String,
        #[source]
        source: LinkError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("session for '{0}' panicked")]
    SessionPanicked(String),

    #[error("all {0} controller sessions failed")]
    AllControllersFailed(usize),

    #[error("no controllers configured")]
    NoControllers,

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// A specialized `Result` type for top-level operations.
pub type SharerResult<T> = Result<T, SharerError>;
