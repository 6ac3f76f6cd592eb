//! Session state store
//!
//! Single source of truth for the current recording session. Writers are the
//! event bridge (status, progress, faults) and the command-result handlers
//! (start, clear, refresh); every UI surface reads through [`SessionStore::subscribe`]
//! and therefore observes the same snapshot.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;

use super::cache::{CacheRead, CachedValue, QueryCache, QueryKey};
use crate::commands::backend::{CommandError, CommandResult, RecordingBackend};
use crate::recorder::state::{
    RecordingInfo, RecordingSession, RecordingStatus, SessionId, TransitionError,
};

/// Authoritative change pushed by the backend for one session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        session_id: SessionId,
        status: RecordingStatus,
        timestamp: DateTime<Utc>,
    },
    Progress {
        session_id: SessionId,
        duration_seconds: f64,
        file_size_bytes: u64,
        timestamp: DateTime<Utc>,
    },
    Fault {
        session_id: SessionId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::StatusChanged { session_id, .. }
            | SessionEvent::Progress { session_id, .. }
            | SessionEvent::Fault { session_id, .. } => session_id,
        }
    }
}

/// Why an event was not applied
#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// No current session and the event does not start one
    NoSession,
    /// Event belongs to another session
    SessionMismatch { current: SessionId },
    /// Current session is terminal and only an explicit clear may change it
    TerminalSticky(RecordingStatus),
    /// Progress tick below the duration already shown
    ProgressRegressed { shown: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied,
    Ignored(IgnoreReason),
}

/// Store errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("session {session_id} is {status:?}; only terminal sessions can be cleared")]
    NotTerminal {
        session_id: SessionId,
        status: RecordingStatus,
    },

    #[error("no current session")]
    NoSession,

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// What every subscribed surface renders from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    /// Increments on every published change
    pub revision: u64,
    pub session: Option<RecordingSession>,
    pub info: Option<RecordingInfo>,
}

impl SessionSnapshot {
    pub fn status(&self) -> Option<&RecordingStatus> {
        self.session.as_ref().map(|s| &s.status)
    }

    pub fn has_active(&self) -> bool {
        self.status()
            .map(|s| s.is_active() || matches!(s, RecordingStatus::Paused))
            .unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    session: Option<RecordingSession>,
    info: Option<RecordingInfo>,
    /// Backend timestamp of the last applied progress tick
    last_tick_at: Option<DateTime<Utc>>,
    /// Highest duration handed out by `display_duration` for this session
    shown_duration: f64,
    /// Bumped by every event-sourced status write
    status_revision: u64,
    revision: u64,
    cache: QueryCache,
}

impl StoreInner {
    fn has_active(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.status.is_active() || matches!(s.status, RecordingStatus::Paused))
            .unwrap_or(false)
    }

    fn reset_session(&mut self, session: Option<RecordingSession>) {
        let session_id = session.as_ref().map(|s| s.session_id.clone());
        self.session = session;
        self.info = None;
        self.last_tick_at = None;
        self.shown_duration = 0.0;
        self.cache.set_active(session_id);
    }

    fn shown_info(&self, session_id: &SessionId) -> Option<&RecordingInfo> {
        self.info.as_ref().filter(|info| &info.session_id == session_id)
    }

    /// Duration at `now` before clamping; `None` without a session.
    fn duration_at(&self, now: DateTime<Utc>, fallback: Duration) -> Option<f64> {
        let session = self.session.as_ref()?;
        let ticked = self.shown_info(&session.session_id).map(|info| info.duration_seconds);

        if !session.status.is_capturing() {
            return Some(ticked.unwrap_or(0.0));
        }

        let seconds_since = |from: DateTime<Utc>| ((now - from).num_milliseconds().max(0) as f64) / 1000.0;

        Some(match (ticked, self.last_tick_at) {
            (Some(value), Some(at)) if now - at <= fallback => value,
            (Some(value), Some(at)) => value + seconds_since(at),
            (Some(value), None) => value,
            (None, _) if now - session.start_time <= fallback => 0.0,
            (None, _) => seconds_since(session.start_time),
        })
    }

    fn apply(&mut self, event: SessionEvent) -> ApplyOutcome {
        if self.session.is_none() {
            return self.apply_without_session(event);
        }
        let Some(current) = self.session.as_mut() else {
            return ApplyOutcome::Ignored(IgnoreReason::NoSession);
        };

        if &current.session_id != event.session_id() {
            return ApplyOutcome::Ignored(IgnoreReason::SessionMismatch {
                current: current.session_id.clone(),
            });
        }

        match event {
            SessionEvent::StatusChanged { status, .. } => {
                if current.status.is_terminal() && current.status != status {
                    return ApplyOutcome::Ignored(IgnoreReason::TerminalSticky(current.status.clone()));
                }
                if !current.status.can_transition_to(&status) {
                    tracing::warn!(
                        "Backend moved session {} from {:?} to {:?} outside the lifecycle table",
                        current.session_id,
                        current.status,
                        status
                    );
                }
                let terminal = status.is_terminal();
                current.status = status;
                self.status_revision += 1;
                if terminal {
                    self.cache.invalidate(&[
                        QueryKey::HasActiveSession,
                        QueryKey::RecordingsList,
                        QueryKey::SystemStatus,
                    ]);
                }
                ApplyOutcome::Applied
            }
            SessionEvent::Fault { message, .. } => {
                if current.status.is_terminal() {
                    return ApplyOutcome::Ignored(IgnoreReason::TerminalSticky(current.status.clone()));
                }
                current.status = RecordingStatus::Error(message);
                self.status_revision += 1;
                self.cache.invalidate(&[QueryKey::HasActiveSession, QueryKey::SystemStatus]);
                ApplyOutcome::Applied
            }
            SessionEvent::Progress {
                session_id,
                duration_seconds,
                file_size_bytes,
                timestamp,
            } => {
                if let Some(shown) = self.shown_info(&session_id).map(|info| info.duration_seconds) {
                    if duration_seconds < shown {
                        return ApplyOutcome::Ignored(IgnoreReason::ProgressRegressed { shown });
                    }
                }
                let estimated_final_size_bytes = self
                    .shown_info(&session_id)
                    .and_then(|info| info.estimated_final_size_bytes);
                self.info = Some(RecordingInfo {
                    session_id,
                    duration_seconds,
                    file_size_bytes,
                    estimated_final_size_bytes,
                });
                self.last_tick_at = Some(timestamp);
                ApplyOutcome::Applied
            }
        }
    }

    fn apply_without_session(&mut self, event: SessionEvent) -> ApplyOutcome {
        match event {
            SessionEvent::StatusChanged {
                session_id,
                status,
                timestamp,
            } if matches!(
                status,
                RecordingStatus::Preparing | RecordingStatus::Recording | RecordingStatus::Paused
            ) =>
            {
                tracing::info!("Adopting session {} started elsewhere ({:?})", session_id, status);
                self.reset_session(Some(RecordingSession::from_event(session_id, status, timestamp)));
                self.status_revision += 1;
                self.cache.invalidate(&[QueryKey::ActiveSession]);
                ApplyOutcome::Applied
            }
            _ => ApplyOutcome::Ignored(IgnoreReason::NoSession),
        }
    }

    /// Fold a fetched active session into local state.
    ///
    /// `events_since` is set when a status event was applied while the fetch
    /// was in flight; the event is newer than the response and wins.
    fn reconcile(&mut self, fetched: Option<RecordingSession>, events_since: bool) {
        let local_terminal = self
            .session
            .as_ref()
            .map(|s| s.status.is_terminal())
            .unwrap_or(false);
        let same_id = matches!(
            (&self.session, &fetched),
            (Some(local), Some(remote)) if local.session_id == remote.session_id
        );

        match fetched {
            Some(remote) if same_id => {
                if let Some(local) = self.session.as_mut() {
                    local.merge_details(&remote);
                    if !events_since && !local_terminal && local.status != remote.status {
                        tracing::debug!(
                            "Session {} status refetched: {:?} -> {:?}",
                            local.session_id,
                            local.status,
                            remote.status
                        );
                        local.status = remote.status;
                    }
                }
            }
            Some(remote) => {
                if self.session.is_none() || (!local_terminal && !events_since) {
                    self.reset_session(Some(remote));
                } else {
                    tracing::warn!(
                        "Backend reports session {} while {} is still shown; keeping local session until cleared",
                        remote.session_id,
                        self.session.as_ref().map(|s| s.session_id.as_str()).unwrap_or_default()
                    );
                }
            }
            None => {
                if self.session.is_some() && !local_terminal && !events_since {
                    tracing::info!("Backend has no active session; dropping local copy");
                    self.reset_session(None);
                }
            }
        }

        let has_active = self.has_active();
        self.cache
            .put(QueryKey::ActiveSession, CachedValue::ActiveSession(self.session.clone()));
        self.cache
            .put(QueryKey::HasActiveSession, CachedValue::HasActiveSession(has_active));
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            revision: self.revision,
            session: self.session.clone(),
            info: self.info.clone(),
        }
    }
}

pub struct SessionStore {
    inner: RwLock<StoreInner>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    progress_fallback: Duration,
}

impl SessionStore {
    /// Create an empty store.
    ///
    /// `progress_fallback` is how long the duration display trusts the last
    /// progress tick before falling back to a local clock.
    pub fn new(progress_fallback: std::time::Duration) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: RwLock::new(StoreInner::default()),
            snapshot_tx,
            progress_fallback: Duration::milliseconds(progress_fallback.as_millis() as i64),
        }
    }

    /// Current session, if any
    pub fn get_active(&self) -> Option<RecordingSession> {
        self.inner.read().session.clone()
    }

    pub fn recording_info(&self) -> Option<RecordingInfo> {
        self.inner.read().info.clone()
    }

    pub fn active_session_id(&self) -> Option<SessionId> {
        self.inner.read().session.as_ref().map(|s| s.session_id.clone())
    }

    /// Whether a session is occupying the recorder (paused included)
    pub fn has_active(&self) -> bool {
        self.inner.read().has_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn cached(&self, key: &QueryKey) -> Option<CacheRead> {
        self.inner.read().cache.get(key)
    }

    pub fn stale_keys(&self) -> Vec<QueryKey> {
        self.inner.read().cache.stale_keys()
    }

    /// Fail early when a start command would be refused locally.
    pub fn check_can_start(&self) -> Result<(), TransitionError> {
        let inner = self.inner.read();
        RecordingStatus::optimistic_start(inner.session.as_ref().map(|s| &s.status)).map(|_| ())
    }

    /// Install the session returned by an accepted start command.
    ///
    /// This is the only place the client sets a status on its own
    /// (`Preparing`); a status already reported by the backend is kept.
    pub(crate) fn begin_session(&self, mut session: RecordingSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write();

        let adopted = inner
            .session
            .as_ref()
            .map(|s| s.session_id == session.session_id)
            .unwrap_or(false);

        if adopted {
            // A state event for this session beat the command result.
            if let Some(local) = inner.session.as_mut() {
                local.merge_details(&session);
            }
        } else {
            let optimistic =
                RecordingStatus::optimistic_start(inner.session.as_ref().map(|s| &s.status))?;
            if session.status == RecordingStatus::Idle {
                session.status = optimistic;
            }
            tracing::info!("Session {} started ({:?})", session.session_id, session.status);
            inner.reset_session(Some(session));
        }

        let has_active = inner.has_active();
        let current = inner.session.clone();
        inner.cache.put(QueryKey::ActiveSession, CachedValue::ActiveSession(current));
        inner
            .cache
            .put(QueryKey::HasActiveSession, CachedValue::HasActiveSession(has_active));
        inner
            .cache
            .invalidate(&[QueryKey::SystemStatus, QueryKey::RecordingsList]);
        self.publish(&mut inner);
        Ok(())
    }

    /// Apply an authoritative event.
    pub(crate) fn apply_event(&self, event: SessionEvent) -> ApplyOutcome {
        let mut inner = self.inner.write();
        let outcome = inner.apply(event.clone());
        match &outcome {
            ApplyOutcome::Applied => self.publish(&mut inner),
            ApplyOutcome::Ignored(reason) => {
                tracing::debug!("Ignoring event for {}: {:?}", event.session_id(), reason);
            }
        }
        outcome
    }

    /// Mark queries stale so dependents refetch.
    pub(crate) fn invalidate(&self, keys: &[QueryKey]) -> Vec<QueryKey> {
        let mut inner = self.inner.write();
        let marked = inner.cache.invalidate(keys);
        self.publish(&mut inner);
        marked
    }

    /// Refetch every stale query.
    ///
    /// Stops at the first failing query; already refreshed keys keep their new
    /// values and the rest stay stale.
    pub async fn refresh(&self, backend: &dyn RecordingBackend) -> CommandResult<Vec<QueryKey>> {
        let keys = self.stale_keys();
        let mut refreshed = Vec::with_capacity(keys.len());

        for key in keys {
            if refreshed.contains(&key) {
                continue;
            }
            self.refresh_key(backend, &key).await?;
            if matches!(key, QueryKey::ActiveSession | QueryKey::HasActiveSession) {
                refreshed.push(QueryKey::ActiveSession);
                refreshed.push(QueryKey::HasActiveSession);
            } else {
                refreshed.push(key);
            }
        }

        Ok(refreshed)
    }

    /// Value for `key`, refetched first when it is missing or stale.
    pub async fn query(&self, backend: &dyn RecordingBackend, key: QueryKey) -> CommandResult<CachedValue> {
        if let Some(read) = self.cached(&key) {
            if !read.stale {
                return Ok(read.value);
            }
        }
        self.refresh_key(backend, &key).await?;
        self.cached(&key)
            .map(|read| read.value)
            .ok_or_else(|| CommandError::Transport(format!("{:?} missing after refetch", key)))
    }

    async fn refresh_key(&self, backend: &dyn RecordingBackend, key: &QueryKey) -> CommandResult<()> {
        match key {
            QueryKey::ActiveSession | QueryKey::HasActiveSession => self.refetch_active(backend).await,
            QueryKey::RecordingInfo(session_id) => {
                let fetched = backend.get_recording_info(session_id).await?;
                let mut inner = self.inner.write();
                let current = inner
                    .session
                    .as_ref()
                    .map(|s| &s.session_id == session_id)
                    .unwrap_or(false);
                if current {
                    // A tick newer than the fetch already moved the figures on.
                    let ticked_past_fetch = inner
                        .info
                        .as_ref()
                        .map(|info| {
                            &info.session_id == session_id
                                && info.duration_seconds > fetched.duration_seconds
                        })
                        .unwrap_or(false);
                    if ticked_past_fetch {
                        if let Some(info) = inner.info.as_mut() {
                            info.estimated_final_size_bytes = fetched.estimated_final_size_bytes;
                        }
                    } else {
                        inner.info = Some(fetched.clone());
                    }
                }
                inner.cache.put(key.clone(), CachedValue::RecordingInfo(fetched));
                self.publish(&mut inner);
                Ok(())
            }
            QueryKey::RecordingsList => {
                let recordings = backend.list_recordings().await?;
                self.put_cached(key.clone(), CachedValue::Recordings(recordings));
                Ok(())
            }
            QueryKey::WindowList => {
                let windows = backend.list_windows().await?;
                self.put_cached(key.clone(), CachedValue::Windows(windows));
                Ok(())
            }
            QueryKey::SystemStatus => {
                let status = backend.get_system_status().await?;
                self.put_cached(key.clone(), CachedValue::SystemStatus(status));
                Ok(())
            }
        }
    }

    async fn refetch_active(&self, backend: &dyn RecordingBackend) -> CommandResult<()> {
        let revision_before = self.inner.read().status_revision;
        let fetched = backend.get_active_session().await?;

        let mut inner = self.inner.write();
        let events_since = inner.status_revision != revision_before;
        inner.reconcile(fetched, events_since);
        self.publish(&mut inner);
        Ok(())
    }

    pub(crate) fn put_cached(&self, key: QueryKey, value: CachedValue) {
        let mut inner = self.inner.write();
        inner.cache.put(key, value);
        self.publish(&mut inner);
    }

    /// Remove a terminal session.
    ///
    /// A non-terminal session is never cleared: the request is rejected and
    /// the active session is refetched so the UI converges on the backend's
    /// view.
    pub async fn clear(&self, backend: &dyn RecordingBackend) -> Result<(), StoreError> {
        let current = self
            .inner
            .read()
            .session
            .as_ref()
            .map(|s| (s.session_id.clone(), s.status.clone()));
        let Some((session_id, status)) = current else {
            return Ok(());
        };

        if !status.is_terminal() {
            tracing::warn!("Refusing to clear session {} in {:?}", session_id, status);
            self.invalidate(&[QueryKey::ActiveSession]);
            if let Err(e) = self.refetch_active(backend).await {
                tracing::warn!("Failed to refetch active session: {}", e);
            }
            return Err(StoreError::NotTerminal { session_id, status });
        }

        backend.clear_active_session().await?;

        let mut inner = self.inner.write();
        let still_current = inner
            .session
            .as_ref()
            .map(|s| s.session_id == session_id)
            .unwrap_or(false);
        if still_current {
            inner.reset_session(None);
            inner.status_revision += 1;
        }
        inner
            .cache
            .invalidate(&[QueryKey::RecordingsList, QueryKey::SystemStatus]);
        let has_active = inner.has_active();
        let current = inner.session.clone();
        inner.cache.put(QueryKey::ActiveSession, CachedValue::ActiveSession(current));
        inner
            .cache
            .put(QueryKey::HasActiveSession, CachedValue::HasActiveSession(has_active));
        self.publish(&mut inner);

        tracing::info!("Cleared session {}", session_id);
        Ok(())
    }

    /// Duration to display at `now`, in seconds.
    ///
    /// Progress ticks are authoritative. While recording, if no tick arrived
    /// within the fallback window, the last tick is extrapolated with the wall
    /// clock (or the clock runs from `start_time` if there was never a tick).
    /// The value never drops below one already returned for the same session.
    pub fn display_duration(&self, now: DateTime<Utc>) -> f64 {
        let mut inner = self.inner.write();
        let Some(duration) = inner.duration_at(now, self.progress_fallback) else {
            return 0.0;
        };
        inner.shown_duration = inner.shown_duration.max(duration);
        inner.shown_duration
    }

    fn publish(&self, inner: &mut StoreInner) {
        inner.revision += 1;
        self.snapshot_tx.send_replace(inner.snapshot());
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(3))
    }
}
