//! Backend invocation boundary
//!
//! Every capability of the trusted local service is reached through these
//! traits: request/response commands and named push channels. Implementations
//! wrap whatever IPC transport the host application uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::capture::WindowInfo;
use crate::events::Channel;
use crate::recorder::state::{RecordingInfo, RecordingSession, SessionId, StartRecordingRequest};
use crate::verification::VerificationReport;

/// Failure of a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Structured failure returned by the backend
    #[error("{command} rejected: {message}")]
    Rejected { command: String, message: String },

    /// The call never produced a backend answer
    #[error("transport error: {0}")]
    Transport(String),
}

impl CommandError {
    pub fn rejected(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            command: command.into(),
            message: message.into(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Coarse status of the recording service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub can_record: bool,

    pub has_screen_permission: bool,

    #[serde(default)]
    pub active_session_id: Option<SessionId>,

    #[serde(default)]
    pub backend_version: Option<String>,
}

/// A finished recording on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub session_id: SessionId,

    pub video_path: String,

    #[serde(default)]
    pub manifest_path: Option<String>,

    pub created_at: DateTime<Utc>,

    pub file_size_bytes: u64,

    #[serde(default)]
    pub encrypted: bool,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub anchored: bool,
}

/// Opaque id of one open decrypt-and-stream operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandleId(String);

impl StreamHandleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Total length and encryption flag of an open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub length: u64,
    pub encrypted: bool,
}

/// Secret used to open an encrypted recording
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "secret", rename_all = "camelCase")]
pub enum DecryptCredential {
    Password(String),
    PrivateKey(String),
}

impl fmt::Debug for DecryptCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// Session lifecycle and query commands
#[async_trait]
pub trait RecordingBackend: Send + Sync {
    async fn start_recording(&self, request: StartRecordingRequest) -> CommandResult<RecordingSession>;

    async fn stop_recording(&self, session_id: &SessionId) -> CommandResult<()>;

    async fn pause_recording(&self, session_id: &SessionId) -> CommandResult<()>;

    async fn resume_recording(&self, session_id: &SessionId) -> CommandResult<()>;

    async fn get_active_session(&self) -> CommandResult<Option<RecordingSession>>;

    async fn get_recording_info(&self, session_id: &SessionId) -> CommandResult<RecordingInfo>;

    async fn get_system_status(&self) -> CommandResult<SystemStatus>;

    /// Forget the backend's terminal session
    async fn clear_active_session(&self) -> CommandResult<()>;

    async fn list_recordings(&self) -> CommandResult<Vec<RecordingEntry>>;

    async fn list_windows(&self) -> CommandResult<Vec<WindowInfo>>;
}

/// Decrypt-and-stream commands
///
/// `read_chunk` advances a stateful decrypting cursor: ranges must be requested
/// in increasing order and never concurrently on one handle.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn open_decrypt_stream(
        &self,
        path: &str,
        credential: Option<&DecryptCredential>,
    ) -> CommandResult<StreamHandleId>;

    async fn describe_stream(&self, handle: &StreamHandleId) -> CommandResult<StreamInfo>;

    /// Inclusive byte range `[start, end]`
    async fn read_chunk(&self, handle: &StreamHandleId, start: u64, end: u64) -> CommandResult<Vec<u8>>;

    async fn close_stream(&self, handle: &StreamHandleId) -> CommandResult<()>;
}

/// Verification commands
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Offline checks only: manifest, signature, hash
    async fn verify_recording(&self, manifest_path: &str, video_path: &str) -> CommandResult<VerificationReport>;

    /// Offline checks plus an on-chain lookup of the anchor; needs network
    async fn verify_recording_deep(
        &self,
        manifest_path: &str,
        video_path: &str,
    ) -> CommandResult<VerificationReport>;
}

/// Push notification boundary
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Subscribe to one named channel. Each call yields an independent receiver.
    async fn subscribe(&self, channel: Channel) -> CommandResult<broadcast::Receiver<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = DecryptCredential::Password("hunter2".to_string());
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "Password(<redacted>)");
    }

    #[test]
    fn test_rejection_message() {
        let err = CommandError::rejected("pause_recording", "not recording");
        assert_eq!(err.to_string(), "pause_recording rejected: not recording");
    }
}
