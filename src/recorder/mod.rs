//! Recording session model
//!
//! This module holds the session lifecycle:
//! - RecordingStatus and its predicates and transition table
//! - RecordingSession and the start request sent to the backend

pub mod state;

pub use state::{
    EncryptionSettings, RecordingInfo, RecordingPreferences, RecordingSession, RecordingStatus,
    SessionId, StartRecordingRequest, StatusParseError, TransitionError, VideoQuality,
};
