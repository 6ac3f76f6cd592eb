//! Backend command boundary and handlers
//!
//! `backend` declares the calls the trusted backend service answers;
//! `recording` issues them and folds the results into the session store.

pub mod backend;
pub mod recording;

pub use backend::{
    CommandError, CommandResult, DecryptCredential, PushSource, RecordingBackend, RecordingEntry,
    StreamBackend, StreamHandleId, StreamInfo, SystemStatus, VerificationBackend,
};
pub use recording::RecordingController;
