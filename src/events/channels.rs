//! Push channels and their payloads
//!
//! Channel names are fixed by the backend. Payloads arrive as JSON and are
//! validated into typed events before anything acts on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::recorder::state::{RecordingStatus, SessionId};
use crate::session::SessionEvent;

/// Named push channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    SessionStateChanged,
    Progress,
    Error,
    AnchorStarted,
    AnchorProgress,
    AnchorCompleted,
    AnchorFailed,
    WindowListChanged,
    BackendLog,
}

impl Channel {
    pub const ALL: [Channel; 9] = [
        Channel::SessionStateChanged,
        Channel::Progress,
        Channel::Error,
        Channel::AnchorStarted,
        Channel::AnchorProgress,
        Channel::AnchorCompleted,
        Channel::AnchorFailed,
        Channel::WindowListChanged,
        Channel::BackendLog,
    ];

    /// Wire name of the channel
    pub fn name(&self) -> &'static str {
        match self {
            Channel::SessionStateChanged => "session-state-changed",
            Channel::Progress => "progress",
            Channel::Error => "error",
            Channel::AnchorStarted => "blockchain-anchor-started",
            Channel::AnchorProgress => "blockchain-anchor-progress",
            Channel::AnchorCompleted => "blockchain-anchor-completed",
            Channel::AnchorFailed => "blockchain-anchor-failed",
            Channel::WindowListChanged => "window-list-changed",
            Channel::BackendLog => "backend-log",
        }
    }

    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload rejected during shape validation
#[derive(Error, Debug)]
#[error("invalid {channel} payload: {source}")]
pub struct PayloadError {
    pub channel: Channel,
    #[source]
    pub source: serde_json::Error,
}

fn deserialize_status<'de, D>(deserializer: D) -> Result<RecordingStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    RecordingStatus::from_wire(&value).map_err(serde::de::Error::custom)
}

/// `session-state-changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangedPayload {
    pub session_id: SessionId,
    #[serde(deserialize_with = "deserialize_status")]
    pub status: RecordingStatus,
    pub timestamp: DateTime<Utc>,
}

/// `progress`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub session_id: SessionId,
    pub duration_seconds: f64,
    pub file_size_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

/// `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// Stage of a blockchain anchoring job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStage {
    Started,
    Progress,
    Completed,
    Failed,
}

/// `blockchain-anchor-*`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPayload {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub manifest_path: Option<String>,
    #[serde(default)]
    pub chain_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// `window-list-changed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowListChangedPayload {
    pub timestamp: DateTime<Utc>,
}

/// `backend-log`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendLogPayload {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub target: Option<String>,
}

/// Validated push notification
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    StateChanged(StateChangedPayload),
    Progress(ProgressPayload),
    Error(ErrorPayload),
    Anchor(AnchorStage, AnchorPayload),
    WindowListChanged(WindowListChangedPayload),
    BackendLog(BackendLogPayload),
}

impl PushEvent {
    /// Validate a raw payload arriving on `channel`.
    pub fn parse(channel: Channel, payload: Value) -> Result<PushEvent, PayloadError> {
        let wrap = |source: serde_json::Error| PayloadError { channel, source };
        let event = match channel {
            Channel::SessionStateChanged => {
                PushEvent::StateChanged(serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::Progress => PushEvent::Progress(serde_json::from_value(payload).map_err(wrap)?),
            Channel::Error => PushEvent::Error(serde_json::from_value(payload).map_err(wrap)?),
            Channel::AnchorStarted => {
                PushEvent::Anchor(AnchorStage::Started, serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::AnchorProgress => {
                PushEvent::Anchor(AnchorStage::Progress, serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::AnchorCompleted => {
                PushEvent::Anchor(AnchorStage::Completed, serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::AnchorFailed => {
                PushEvent::Anchor(AnchorStage::Failed, serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::WindowListChanged => {
                PushEvent::WindowListChanged(serde_json::from_value(payload).map_err(wrap)?)
            }
            Channel::BackendLog => PushEvent::BackendLog(serde_json::from_value(payload).map_err(wrap)?),
        };
        Ok(event)
    }

    pub fn channel(&self) -> Channel {
        match self {
            PushEvent::StateChanged(_) => Channel::SessionStateChanged,
            PushEvent::Progress(_) => Channel::Progress,
            PushEvent::Error(_) => Channel::Error,
            PushEvent::Anchor(AnchorStage::Started, _) => Channel::AnchorStarted,
            PushEvent::Anchor(AnchorStage::Progress, _) => Channel::AnchorProgress,
            PushEvent::Anchor(AnchorStage::Completed, _) => Channel::AnchorCompleted,
            PushEvent::Anchor(AnchorStage::Failed, _) => Channel::AnchorFailed,
            PushEvent::WindowListChanged(_) => Channel::WindowListChanged,
            PushEvent::BackendLog(_) => Channel::BackendLog,
        }
    }

    /// Store-level event carried by this notification, if any
    pub fn session_event(&self) -> Option<SessionEvent> {
        match self {
            PushEvent::StateChanged(p) => Some(SessionEvent::StatusChanged {
                session_id: p.session_id.clone(),
                status: p.status.clone(),
                timestamp: p.timestamp,
            }),
            PushEvent::Progress(p) => Some(SessionEvent::Progress {
                session_id: p.session_id.clone(),
                duration_seconds: p.duration_seconds,
                file_size_bytes: p.file_size_bytes,
                timestamp: p.timestamp,
            }),
            PushEvent::Error(p) => p.session_id.as_ref().map(|session_id| SessionEvent::Fault {
                session_id: session_id.clone(),
                message: p.error.clone(),
                timestamp: p.timestamp,
            }),
            _ => None,
        }
    }
}
