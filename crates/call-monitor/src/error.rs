//! Error types for the call monitor

use thiserror::Error;

use crate::types::{CallId, CallState, LocalSessionId};

/// Result type for call monitor operations
pub type CallMonitorResult<T> = Result<T, CallMonitorError>;

/// Errors that can occur while tracking a call session
#[derive(Debug, Clone, Error)]
pub enum CallMonitorError {
    /// Attempted to move a session out of a terminal state
    #[error("Invalid state transition for session {session}: {from:?} -> {to:?}")]
    InvalidTransition {
        session: String,
        from: CallState,
        to: CallState,
    },

    /// Attempted to assign a second, different call id
    #[error("Call id already assigned: {current} (attempted {attempted})")]
    CallIdAlreadyAssigned { current: CallId, attempted: CallId },

    /// A session with this local id is already registered
    #[error("Session already registered: {0}")]
    SessionAlreadyRegistered(LocalSessionId),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed ICE candidate line
    #[error("Invalid ICE candidate: {message}")]
    InvalidCandidate { message: String },

    /// An external collaborator (device layer, stats engine) failed
    #[error("{collaborator} error: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

impl CallMonitorError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid candidate error
    pub fn invalid_candidate(message: impl Into<String>) -> Self {
        Self::InvalidCandidate {
            message: message.into(),
        }
    }

    /// Create a device layer error
    pub fn device(message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: "Device layer",
            message: message.into(),
        }
    }

    /// Create a stats engine error
    pub fn stats_engine(message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator: "Stats engine",
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for CallMonitorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(format!("Failed to parse YAML: {}", err))
    }
}
