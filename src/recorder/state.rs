//! Recording state management
//!
//! Defines the recording lifecycle state machine and the session data model
//! shared by every UI surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::capture::WindowInfo;

/// Opaque identifier of one recording attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Lifecycle status of a recording session
///
/// Serialized as an internally tagged union so `Error` can carry its message
/// without shape-sniffing: `{"type":"Recording"}`, `{"type":"Error","message":"..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum RecordingStatus {
    /// No recording in progress
    #[default]
    Idle,
    /// Start command accepted, waiting for the backend to confirm capture
    Preparing,
    /// Currently recording
    Recording,
    /// Recording is paused
    Paused,
    /// Stop requested, capture shutting down
    Stopping,
    /// Post-recording pipeline running (hashing, signing, encryption)
    Processing,
    /// Recording finished and sealed
    Completed,
    /// Recording stopped without processing
    Stopped,
    /// Backend reported the recording as failed
    Failed,
    /// Backend reported a fault with a message
    Error(String),
}

/// Failure to interpret a status value pushed by the backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusParseError {
    #[error("unknown recording status tag: {0}")]
    UnknownTag(String),

    #[error("unrecognized status shape: {0}")]
    Shape(String),
}

/// Rejected client-side transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("a recording session is already in progress ({0:?})")]
    SessionInProgress(RecordingStatus),

    #[error("the previous session ended in {0:?}; clear it before starting a new one")]
    ClearRequired(RecordingStatus),

    #[error("cannot {action} while {status:?}")]
    NotAllowed {
        action: &'static str,
        status: RecordingStatus,
    },
}

impl RecordingStatus {
    /// True while the session occupies the recorder.
    ///
    /// `Paused` is not active; see [`RecordingStatus::counts_duration`].
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Preparing | Self::Recording | Self::Stopping | Self::Processing
        )
    }

    /// True for backend-reported faults.
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, Self::Failed | Self::Error(_))
    }

    /// Terminal statuses only change through an explicit clear.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Stopped | Self::Failed | Self::Error(_)
        )
    }

    /// Whether a duration display should keep showing this session.
    pub fn counts_duration(&self) -> bool {
        self.is_active() || matches!(self, Self::Paused)
    }

    /// Whether the wall-clock is advancing the recorded duration.
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// Whether this status prevents starting a new session.
    pub fn blocks_new_session(&self) -> bool {
        self.is_active() || matches!(self, Self::Paused) || self.is_terminal_error()
    }

    /// Discriminant name as used on the wire
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Preparing => "Preparing",
            Self::Recording => "Recording",
            Self::Paused => "Paused",
            Self::Stopping => "Stopping",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Stopped => "Stopped",
            Self::Failed => "Failed",
            Self::Error(_) => "Error",
        }
    }

    /// Legal lifecycle edges.
    ///
    /// Re-asserting the current status is always legal. Terminal statuses have
    /// no outgoing edges; leaving them requires clearing the session.
    pub fn can_transition_to(&self, next: &RecordingStatus) -> bool {
        use RecordingStatus::*;

        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal_error() {
            return true;
        }

        matches!(
            (self, next),
            (Idle, Preparing)
                | (Idle, Recording)
                | (Preparing, Recording)
                | (Recording, Paused)
                | (Paused, Recording)
                | (Preparing | Recording | Paused, Stopping)
                | (Recording | Paused | Stopping, Stopped)
                | (Stopping, Processing)
                | (Processing, Completed)
        )
    }

    /// The one transition the client may make on its own: `Preparing` after a
    /// start command is accepted.
    pub fn optimistic_start(current: Option<&RecordingStatus>) -> Result<Self, TransitionError> {
        match current {
            Some(status) if status.is_terminal_error() => {
                Err(TransitionError::ClearRequired(status.clone()))
            }
            Some(status) if status.blocks_new_session() => {
                Err(TransitionError::SessionInProgress(status.clone()))
            }
            _ => Ok(Self::Preparing),
        }
    }

    /// Parse a status as pushed by the backend.
    ///
    /// Accepts the tagged form, a bare tag string and the single-key
    /// `{"Error": "message"}` form.
    pub fn from_wire(value: &Value) -> Result<Self, StatusParseError> {
        match value {
            Value::String(tag) => Self::from_tag(tag, None),
            Value::Object(map) => {
                if let Some(Value::String(tag)) = map.get("type") {
                    let message = map.get("message").and_then(Value::as_str);
                    return Self::from_tag(tag, message);
                }
                if map.len() == 1 {
                    if let Some((tag, Value::String(message))) = map.iter().next() {
                        return Self::from_tag(tag, Some(message));
                    }
                }
                Err(StatusParseError::Shape(value.to_string()))
            }
            other => Err(StatusParseError::Shape(other.to_string())),
        }
    }

    fn from_tag(tag: &str, message: Option<&str>) -> Result<Self, StatusParseError> {
        let status = match tag.to_ascii_lowercase().as_str() {
            "idle" => Self::Idle,
            "preparing" => Self::Preparing,
            "recording" => Self::Recording,
            "paused" => Self::Paused,
            "stopping" => Self::Stopping,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "stopped" => Self::Stopped,
            "failed" => Self::Failed,
            "error" => Self::Error(message.unwrap_or("unknown error").to_string()),
            _ => return Err(StatusParseError::UnknownTag(tag.to_string())),
        };
        Ok(status)
    }
}

/// Capture quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
}

/// Preferences captured at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingPreferences {
    pub quality: VideoQuality,

    pub audio_enabled: bool,

    /// Output file name pattern, e.g. `{app}-{timestamp}`
    pub filename_pattern: String,
}

impl Default for RecordingPreferences {
    fn default() -> Self {
        Self {
            quality: VideoQuality::High,
            audio_enabled: false,
            filename_pattern: "recording-{timestamp}".to_string(),
        }
    }
}

/// How the finished recording should be encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum EncryptionSettings {
    /// Symmetric key derived from a password
    #[serde(rename_all = "camelCase")]
    Password { password: String },
    /// Encrypted to one or more recipient public keys
    #[serde(rename_all = "camelCase")]
    PublicKey { recipient_public_keys: Vec<String> },
}

/// Arguments of the start command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub window_id: String,

    #[serde(default)]
    pub preferences: RecordingPreferences,

    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

/// One recording attempt, as tracked by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSession {
    pub session_id: SessionId,

    pub window_id: String,

    pub start_time: DateTime<Utc>,

    pub output_path: String,

    #[serde(default)]
    pub status: RecordingStatus,

    #[serde(default)]
    pub preferences: RecordingPreferences,

    #[serde(default)]
    pub window_metadata: Option<WindowInfo>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl RecordingSession {
    /// Session known only from a state-change event.
    ///
    /// Carries the id, status and start time; everything else is filled in
    /// when the active-session query is refetched.
    pub fn from_event(session_id: SessionId, status: RecordingStatus, seen_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            window_id: String::new(),
            start_time: seen_at,
            output_path: String::new(),
            status,
            preferences: RecordingPreferences::default(),
            window_metadata: None,
            title: None,
            description: None,
            tags: Vec::new(),
        }
    }

    /// Copy descriptive fields from a fetched copy, keeping id and status.
    pub fn merge_details(&mut self, fetched: &RecordingSession) {
        self.window_id = fetched.window_id.clone();
        self.start_time = fetched.start_time;
        self.output_path = fetched.output_path.clone();
        self.preferences = fetched.preferences.clone();
        self.window_metadata = fetched.window_metadata.clone();
        self.title = fetched.title.clone();
        self.description = fetched.description.clone();
        self.tags = fetched.tags.clone();
    }
}

/// Derived size and duration figures for the current session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub session_id: SessionId,

    pub duration_seconds: f64,

    pub file_size_bytes: u64,

    #[serde(default)]
    pub estimated_final_size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_status_is_idle() {
        assert_eq!(RecordingStatus::default(), RecordingStatus::Idle);
    }

    #[test]
    fn test_is_active() {
        assert!(RecordingStatus::Recording.is_active());
        assert!(RecordingStatus::Preparing.is_active());
        assert!(RecordingStatus::Stopping.is_active());
        assert!(RecordingStatus::Processing.is_active());
        assert!(!RecordingStatus::Paused.is_active());
        assert!(!RecordingStatus::Stopped.is_active());
        assert!(!RecordingStatus::Idle.is_active());
        assert!(!RecordingStatus::Error("x".to_string()).is_active());
    }

    #[test]
    fn test_is_terminal_error() {
        assert!(RecordingStatus::Error("x".to_string()).is_terminal_error());
        assert!(RecordingStatus::Failed.is_terminal_error());
        assert!(!RecordingStatus::Completed.is_terminal_error());
        assert!(!RecordingStatus::Stopped.is_terminal_error());
    }

    #[test]
    fn test_paused_counts_for_duration_only() {
        assert!(RecordingStatus::Paused.counts_duration());
        assert!(RecordingStatus::Paused.blocks_new_session());
        assert!(!RecordingStatus::Completed.counts_duration());
    }

    #[test]
    fn test_happy_path_transitions() {
        use RecordingStatus::*;
        let path = [Idle, Preparing, Recording, Paused, Recording, Stopping, Processing, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_statuses_are_sticky() {
        use RecordingStatus::*;
        for terminal in [Completed, Stopped, Failed, Error("boom".to_string())] {
            assert!(!terminal.can_transition_to(&Recording));
            assert!(!terminal.can_transition_to(&Idle));
            assert!(terminal.can_transition_to(&terminal.clone()));
        }
    }

    #[test]
    fn test_any_live_state_can_fail() {
        use RecordingStatus::*;
        for live in [Idle, Preparing, Recording, Paused, Stopping, Processing] {
            assert!(live.can_transition_to(&Failed));
            assert!(live.can_transition_to(&Error("disk full".to_string())));
        }
    }

    #[test]
    fn test_illegal_skips_rejected() {
        use RecordingStatus::*;
        assert!(!Preparing.can_transition_to(&Completed));
        assert!(!Recording.can_transition_to(&Processing));
        assert!(!Idle.can_transition_to(&Paused));
    }

    #[test]
    fn test_optimistic_start_gating() {
        assert_eq!(
            RecordingStatus::optimistic_start(None),
            Ok(RecordingStatus::Preparing)
        );
        assert_eq!(
            RecordingStatus::optimistic_start(Some(&RecordingStatus::Completed)),
            Ok(RecordingStatus::Preparing)
        );
        assert!(matches!(
            RecordingStatus::optimistic_start(Some(&RecordingStatus::Paused)),
            Err(TransitionError::SessionInProgress(_))
        ));
        assert!(matches!(
            RecordingStatus::optimistic_start(Some(&RecordingStatus::Error("x".to_string()))),
            Err(TransitionError::ClearRequired(_))
        ));
    }

    #[test]
    fn test_status_serializes_as_tagged_union() {
        let value = serde_json::to_value(RecordingStatus::Error("disk full".to_string())).unwrap();
        assert_eq!(value, json!({"type": "Error", "message": "disk full"}));

        let value = serde_json::to_value(RecordingStatus::Recording).unwrap();
        assert_eq!(value, json!({"type": "Recording"}));
    }

    #[test]
    fn test_from_wire_shapes() {
        assert_eq!(
            RecordingStatus::from_wire(&json!("recording")),
            Ok(RecordingStatus::Recording)
        );
        assert_eq!(
            RecordingStatus::from_wire(&json!({"Error": "x"})),
            Ok(RecordingStatus::Error("x".to_string()))
        );
        assert_eq!(
            RecordingStatus::from_wire(&json!({"type": "Paused"})),
            Ok(RecordingStatus::Paused)
        );
        assert!(matches!(
            RecordingStatus::from_wire(&json!("Exploded")),
            Err(StatusParseError::UnknownTag(_))
        ));
        assert!(matches!(
            RecordingStatus::from_wire(&json!(42)),
            Err(StatusParseError::Shape(_))
        ));
    }

    #[test]
    fn test_session_deserializes_with_defaults() {
        let session: RecordingSession = serde_json::from_value(json!({
            "sessionId": "abc",
            "windowId": "42",
            "startTime": "2026-01-01T00:00:00Z",
            "outputPath": "/tmp/rec.mov",
        }))
        .unwrap();

        assert_eq!(session.session_id.as_str(), "abc");
        assert_eq!(session.status, RecordingStatus::Idle);
        assert!(session.tags.is_empty());
    }
}
