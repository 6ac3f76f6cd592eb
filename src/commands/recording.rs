//! Recording command handlers
//!
//! Issue lifecycle commands against the backend and fold their results into
//! the session store. Apart from the optimistic `Preparing` written on a
//! successful start, no handler writes a status: the backend's state events
//! do that.

use std::sync::Arc;

use crate::capture::WindowInfo;
use crate::commands::backend::{CommandError, CommandResult, RecordingBackend, RecordingEntry, SystemStatus};
use crate::recorder::state::{
    RecordingInfo, RecordingSession, RecordingStatus, SessionId, StartRecordingRequest, TransitionError,
};
use crate::session::{CachedValue, QueryKey, SessionStore, StoreError};

pub struct RecordingController {
    backend: Arc<dyn RecordingBackend>,
    store: Arc<SessionStore>,
}

impl RecordingController {
    pub fn new(backend: Arc<dyn RecordingBackend>, store: Arc<SessionStore>) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Start a new session.
    ///
    /// Refused locally while another session is live or a faulted session
    /// has not been cleared.
    pub async fn start(&self, request: StartRecordingRequest) -> Result<RecordingSession, StoreError> {
        self.store.check_can_start()?;

        tracing::info!("Starting recording of window {}", request.window_id);
        let session = self.backend.start_recording(request).await?;
        self.store.begin_session(session.clone())?;

        Ok(self.store.get_active().unwrap_or(session))
    }

    pub async fn stop(&self) -> Result<(), StoreError> {
        let session_id = self.gate("stop", |s| {
            matches!(
                s,
                RecordingStatus::Preparing | RecordingStatus::Recording | RecordingStatus::Paused
            )
        })?;
        tracing::info!("Stopping session {}", session_id);
        self.backend.stop_recording(&session_id).await?;
        self.store.invalidate(&[QueryKey::ActiveSession]);
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), StoreError> {
        let session_id = self.gate("pause", |s| matches!(s, RecordingStatus::Recording))?;
        tracing::info!("Pausing session {}", session_id);
        self.backend.pause_recording(&session_id).await?;
        self.store.invalidate(&[QueryKey::ActiveSession]);
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), StoreError> {
        let session_id = self.gate("resume", |s| matches!(s, RecordingStatus::Paused))?;
        tracing::info!("Resuming session {}", session_id);
        self.backend.resume_recording(&session_id).await?;
        self.store.invalidate(&[QueryKey::ActiveSession]);
        Ok(())
    }

    /// Clear a terminal session so a new one can start.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear(self.backend.as_ref()).await
    }

    /// Refetch every stale query.
    pub async fn refresh(&self) -> CommandResult<Vec<QueryKey>> {
        self.store.refresh(self.backend.as_ref()).await
    }

    pub async fn system_status(&self) -> CommandResult<SystemStatus> {
        match self.store.query(self.backend.as_ref(), QueryKey::SystemStatus).await? {
            CachedValue::SystemStatus(status) => Ok(status),
            other => Err(unexpected(QueryKey::SystemStatus, &other)),
        }
    }

    pub async fn recordings(&self) -> CommandResult<Vec<RecordingEntry>> {
        match self.store.query(self.backend.as_ref(), QueryKey::RecordingsList).await? {
            CachedValue::Recordings(recordings) => Ok(recordings),
            other => Err(unexpected(QueryKey::RecordingsList, &other)),
        }
    }

    pub async fn windows(&self) -> CommandResult<Vec<WindowInfo>> {
        match self.store.query(self.backend.as_ref(), QueryKey::WindowList).await? {
            CachedValue::Windows(windows) => Ok(windows),
            other => Err(unexpected(QueryKey::WindowList, &other)),
        }
    }

    pub async fn recording_info(&self, session_id: &SessionId) -> CommandResult<RecordingInfo> {
        let key = QueryKey::RecordingInfo(session_id.clone());
        match self.store.query(self.backend.as_ref(), key.clone()).await? {
            CachedValue::RecordingInfo(info) => Ok(info),
            other => Err(unexpected(key, &other)),
        }
    }

    /// Id of the current session if `allowed` accepts its status
    fn gate(&self, action: &'static str, allowed: fn(&RecordingStatus) -> bool) -> Result<SessionId, StoreError> {
        let session = self.store.get_active().ok_or(StoreError::NoSession)?;
        if !allowed(&session.status) {
            tracing::debug!("Refusing to {} session {} in {:?}", action, session.session_id, session.status);
            return Err(TransitionError::NotAllowed {
                action,
                status: session.status,
            }
            .into());
        }
        Ok(session.session_id)
    }
}

fn unexpected(key: QueryKey, value: &CachedValue) -> CommandError {
    CommandError::Transport(format!("cache returned {:?} for {:?}", value, key))
}
