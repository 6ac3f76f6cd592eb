//! Error types and handling
//!
//! Subsystem errors aggregated into one client-wide type, plus the
//! `{ code, message }` shape handed to UI surfaces.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::commands::backend::CommandError;
use crate::events::PayloadError;
use crate::playback::PlaybackError;
use crate::recorder::state::TransitionError;
use crate::session::StoreError;
use crate::verification::VerificationError;

/// Client-wide error type
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response for UI surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ClientError {
    /// Stable code for the error, independent of its message
    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Command(e) => command_code(e),
            ClientError::Transition(e) => transition_code(e),
            ClientError::Store(StoreError::Transition(e)) => transition_code(e),
            ClientError::Store(StoreError::Command(e)) => command_code(e),
            ClientError::Store(StoreError::NotTerminal { .. }) => "SESSION_NOT_TERMINAL",
            ClientError::Store(StoreError::NoSession) => "NO_SESSION",
            ClientError::Playback(PlaybackError::Cancelled) => "PLAYBACK_CANCELLED",
            ClientError::Playback(PlaybackError::EmptyStream) => "EMPTY_STREAM",
            ClientError::Playback(_) => "PLAYBACK_ERROR",
            ClientError::Verification(VerificationError::Command(e)) => command_code(e),
            ClientError::Verification(_) => "VERIFICATION_UNAVAILABLE",
            ClientError::Payload(_) => "INVALID_PAYLOAD",
            ClientError::Config(_) => "CONFIG_ERROR",
        }
    }
}

fn command_code(error: &CommandError) -> &'static str {
    match error {
        CommandError::Rejected { .. } => "COMMAND_REJECTED",
        CommandError::Transport(_) => "TRANSPORT_ERROR",
    }
}

fn transition_code(error: &TransitionError) -> &'static str {
    match error {
        TransitionError::SessionInProgress(_) => "SESSION_IN_PROGRESS",
        TransitionError::ClearRequired(_) => "CLEAR_REQUIRED",
        TransitionError::NotAllowed { .. } => "ACTION_NOT_ALLOWED",
    }
}

impl From<ClientError> for ErrorResponse {
    fn from(error: ClientError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<anyhow::Error> for ClientError {
    fn from(error: anyhow::Error) -> Self {
        ClientError::Config(format!("{:#}", error))
    }
}

/// Result type alias using ClientError
pub type ClientResult<T> = Result<T, ClientError>;
