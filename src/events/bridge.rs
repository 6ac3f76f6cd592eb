//! Event bridge
//!
//! Subscribes to the backend's push channels, validates each payload and
//! routes it into the session store or to registered local listeners.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::channels::{AnchorStage, BackendLogPayload, Channel, PushEvent};
use crate::commands::backend::{CommandError, PushSource};
use crate::recorder::state::SessionId;
use crate::session::{ApplyOutcome, IgnoreReason, QueryKey, SessionStore};

pub type ListenerId = u64;

type Callback = Arc<dyn Fn(&PushEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    channel: Channel,
    callback: Callback,
}

/// Result of delivering one notification
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Written to the session store
    Applied,
    /// Valid, but the store did not accept it
    Ignored(IgnoreReason),
    /// Progress tick older than one already applied
    Discarded,
    /// Handled locally (listeners, cache invalidation) without a store write
    Forwarded,
    /// Payload failed validation
    Invalid,
}

/// Rejects progress ticks that would move a session's duration backwards
///
/// Only ticks the store accepted raise the mark.
#[derive(Debug, Default)]
pub struct ProgressGuard {
    high_water: Mutex<HashMap<SessionId, f64>>,
}

impl ProgressGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a tick does not fall below the highest one recorded.
    pub fn admit(&self, session_id: &SessionId, duration_seconds: f64) -> bool {
        match self.high_water.lock().get(session_id) {
            Some(&max) => duration_seconds >= max,
            None => true,
        }
    }

    pub fn record(&self, session_id: &SessionId, duration_seconds: f64) {
        let mut high_water = self.high_water.lock();
        let mark = high_water.entry(session_id.clone()).or_insert(duration_seconds);
        *mark = mark.max(duration_seconds);
    }

    /// Forget every session but `current`.
    pub fn retain_session(&self, current: Option<&SessionId>) {
        self.high_water.lock().retain(|id, _| Some(id) == current);
    }

    pub fn high_water(&self, session_id: &SessionId) -> Option<f64> {
        self.high_water.lock().get(session_id).copied()
    }
}

struct Dispatcher {
    store: Arc<SessionStore>,
    listeners: RwLock<Vec<Listener>>,
    next_listener: AtomicU64,
    progress: ProgressGuard,
}

impl Dispatcher {
    fn dispatch(&self, channel: Channel, payload: Value) -> Delivery {
        let event = match PushEvent::parse(channel, payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping push notification: {}", e);
                return Delivery::Invalid;
            }
        };

        let delivery = match &event {
            PushEvent::Progress(tick) => {
                self.progress
                    .retain_session(self.store.active_session_id().as_ref());
                let delivery = if self.progress.admit(&tick.session_id, tick.duration_seconds) {
                    self.apply(&event)
                } else {
                    Delivery::Discarded
                };
                match delivery {
                    Delivery::Applied => {
                        self.progress.record(&tick.session_id, tick.duration_seconds);
                        Delivery::Applied
                    }
                    Delivery::Discarded | Delivery::Ignored(IgnoreReason::ProgressRegressed { .. }) => {
                        tracing::debug!(
                            "Discarding out-of-order progress for {}: {}s",
                            tick.session_id,
                            tick.duration_seconds
                        );
                        Delivery::Discarded
                    }
                    other => other,
                }
            }
            PushEvent::StateChanged(_) => self.apply(&event),
            PushEvent::Error(payload) => {
                tracing::error!(
                    "Backend error{}: {}",
                    payload
                        .session_id
                        .as_ref()
                        .map(|id| format!(" for session {}", id))
                        .unwrap_or_default(),
                    payload.error
                );
                if payload.session_id.is_some() {
                    self.apply(&event)
                } else {
                    Delivery::Forwarded
                }
            }
            PushEvent::Anchor(stage, payload) => {
                tracing::info!(
                    "Blockchain anchor {:?}{}",
                    stage,
                    payload
                        .session_id
                        .as_ref()
                        .map(|id| format!(" for session {}", id))
                        .unwrap_or_default()
                );
                if matches!(stage, AnchorStage::Completed | AnchorStage::Failed) {
                    self.store.invalidate(&[QueryKey::RecordingsList]);
                }
                Delivery::Forwarded
            }
            PushEvent::WindowListChanged(_) => {
                self.store.invalidate(&[QueryKey::WindowList]);
                Delivery::Forwarded
            }
            PushEvent::BackendLog(line) => {
                relay_backend_log(line);
                Delivery::Forwarded
            }
        };

        if matches!(delivery, Delivery::Applied | Delivery::Forwarded) {
            self.notify(&event);
        }
        delivery
    }

    fn apply(&self, event: &PushEvent) -> Delivery {
        let Some(session_event) = event.session_event() else {
            return Delivery::Forwarded;
        };
        match self.store.apply_event(session_event) {
            ApplyOutcome::Applied => Delivery::Applied,
            ApplyOutcome::Ignored(reason) => {
                if let IgnoreReason::SessionMismatch { current } = &reason {
                    tracing::warn!(
                        "Ignoring {} for another session (current {})",
                        event.channel(),
                        current
                    );
                }
                Delivery::Ignored(reason)
            }
        }
    }

    fn notify(&self, event: &PushEvent) {
        let channel = event.channel();
        // Clone the callbacks out so a listener may (un)register without deadlocking.
        let callbacks: Vec<Callback> = self
            .listeners
            .read()
            .iter()
            .filter(|l| l.channel == channel)
            .map(|l| l.callback.clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

fn relay_backend_log(line: &BackendLogPayload) {
    let origin = line.target.as_deref().unwrap_or("backend");
    match line.level.to_ascii_lowercase().as_str() {
        "error" => tracing::error!(target: "backend", "[{}] {}", origin, line.message),
        "warn" | "warning" => tracing::warn!(target: "backend", "[{}] {}", origin, line.message),
        "debug" => tracing::debug!(target: "backend", "[{}] {}", origin, line.message),
        "trace" => tracing::trace!(target: "backend", "[{}] {}", origin, line.message),
        _ => tracing::info!(target: "backend", "[{}] {}", origin, line.message),
    }
}

/// Channels that were and were not subscribed by a mount
#[derive(Debug, Default)]
pub struct MountReport {
    pub subscribed: Vec<Channel>,
    pub failed: Vec<(Channel, CommandError)>,
}

struct Mount {
    generation: u64,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Mount {
    fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
        }
    }
}

pub struct EventBridge {
    source: Arc<dyn PushSource>,
    dispatcher: Arc<Dispatcher>,
    mount: Mutex<Option<Mount>>,
    generation: AtomicU64,
}

impl EventBridge {
    pub fn new(source: Arc<dyn PushSource>, store: Arc<SessionStore>) -> Self {
        Self {
            source,
            dispatcher: Arc::new(Dispatcher {
                store,
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                progress: ProgressGuard::new(),
            }),
            mount: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Subscribe to every channel.
    ///
    /// Mounting again tears the previous subscriptions down first, so a
    /// remount never delivers a notification twice. A channel that fails to
    /// subscribe is logged and skipped; it is not retried.
    pub async fn mount(&self) -> MountReport {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        if let Some(previous) = self.mount.lock().replace(Mount {
            generation,
            cancel: cancel.clone(),
            tasks: Vec::new(),
        }) {
            tracing::debug!("Remounting event bridge; tearing down previous subscriptions");
            previous.shutdown();
        }

        let mut report = MountReport::default();
        for channel in Channel::ALL {
            if cancel.is_cancelled() {
                break;
            }
            match self.source.subscribe(channel).await {
                Ok(receiver) => {
                    let task = tokio::spawn(pump(
                        channel,
                        receiver,
                        self.dispatcher.clone(),
                        cancel.clone(),
                    ));
                    let mut mount = self.mount.lock();
                    match mount.as_mut() {
                        Some(current) if current.generation == generation => {
                            current.tasks.push(task);
                            report.subscribed.push(channel);
                        }
                        // Torn down or superseded while we were subscribing.
                        _ => {
                            task.abort();
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to subscribe to {}: {}; continuing with stale data",
                        channel,
                        e
                    );
                    report.failed.push((channel, e));
                }
            }
        }

        tracing::info!(
            "Event bridge mounted: {} channels, {} failed",
            report.subscribed.len(),
            report.failed.len()
        );
        report
    }

    /// Drop every subscription. Safe to call when not mounted.
    pub fn unmount(&self) {
        if let Some(mount) = self.mount.lock().take() {
            tracing::debug!("Unmounting event bridge");
            mount.shutdown();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mount.lock().is_some()
    }

    /// Route one raw payload as if it arrived on `channel`.
    ///
    /// Hosts whose transport is callback based call this directly instead of
    /// mounting.
    pub fn deliver(&self, channel: Channel, payload: Value) -> Delivery {
        self.dispatcher.dispatch(channel, payload)
    }

    pub fn add_listener<F>(&self, channel: Channel, callback: F) -> ListenerId
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let id = self.dispatcher.next_listener.fetch_add(1, Ordering::Relaxed);
        self.dispatcher.listeners.write().push(Listener {
            id,
            channel,
            callback: Arc::new(callback),
        });
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.dispatcher.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn progress_guard(&self) -> &ProgressGuard {
        &self.dispatcher.progress
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.unmount();
    }
}

async fn pump(
    channel: Channel,
    mut receiver: broadcast::Receiver<Value>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(payload) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    dispatcher.dispatch(channel, payload);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} listener lagged; {} notifications skipped", channel, skipped);
                }
                Err(RecvError::Closed) => {
                    tracing::debug!("{} channel closed by backend", channel);
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::state::RecordingStatus;
    use crate::session::CachedValue;
    use crate::testing::{sample_session, FakeBackend};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bridge_with_session(status: RecordingStatus) -> (Arc<FakeBackend>, Arc<SessionStore>, EventBridge) {
        let backend = Arc::new(FakeBackend::new());
        let store = Arc::new(SessionStore::default());
        let mut session = sample_session("s1");
        session.status = status;
        store.begin_session(session).unwrap();
        let bridge = EventBridge::new(backend.clone(), store.clone());
        (backend, store, bridge)
    }

    fn progress(session: &str, seconds: f64) -> Value {
        json!({
            "sessionId": session,
            "durationSeconds": seconds,
            "fileSizeBytes": 1024,
            "timestamp": "2026-03-01T10:00:00Z"
        })
    }

    fn state(session: &str, status: &str) -> Value {
        json!({"sessionId": session, "status": status, "timestamp": "2026-03-01T10:00:00Z"})
    }

    #[test]
    fn test_regressing_progress_tick_discarded() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Recording);

        assert_eq!(bridge.deliver(Channel::Progress, progress("s1", 5.0)), Delivery::Applied);
        assert_eq!(bridge.deliver(Channel::Progress, progress("s1", 3.0)), Delivery::Discarded);

        assert_eq!(store.recording_info().unwrap().duration_seconds, 5.0);
        assert_eq!(bridge.progress_guard().high_water(&SessionId::from("s1")), Some(5.0));
    }

    #[test]
    fn test_equal_progress_tick_admitted() {
        let (_, _, bridge) = bridge_with_session(RecordingStatus::Recording);
        bridge.deliver(Channel::Progress, progress("s1", 5.0));
        assert_eq!(bridge.deliver(Channel::Progress, progress("s1", 5.0)), Delivery::Applied);
    }

    #[test]
    fn test_progress_guard_is_per_session() {
        let guard = ProgressGuard::new();
        guard.record(&SessionId::from("a"), 10.0);
        assert!(guard.admit(&SessionId::from("b"), 1.0));
        assert!(!guard.admit(&SessionId::from("a"), 9.0));
        assert!(guard.admit(&SessionId::from("a"), 10.0));
    }

    #[tokio::test]
    async fn test_progress_below_refetched_duration_discarded() {
        let (backend, store, bridge) = bridge_with_session(RecordingStatus::Recording);
        backend.set_recorded_seconds(10.0);
        assert_eq!(bridge.deliver(Channel::Progress, progress("s1", 8.0)), Delivery::Applied);

        store.invalidate(&[QueryKey::RecordingInfo(SessionId::from("s1"))]);
        store.refresh(backend.as_ref()).await.unwrap();
        assert_eq!(store.recording_info().unwrap().duration_seconds, 10.0);

        assert_eq!(bridge.deliver(Channel::Progress, progress("s1", 9.0)), Delivery::Discarded);
        assert_eq!(store.recording_info().unwrap().duration_seconds, 10.0);
        assert_eq!(bridge.progress_guard().high_water(&SessionId::from("s1")), Some(8.0));
    }

    #[tokio::test]
    async fn test_progress_marks_forgotten_after_session_cleared() {
        let (backend, store, bridge) = bridge_with_session(RecordingStatus::Recording);
        bridge.deliver(Channel::Progress, progress("s1", 8.0));
        bridge.deliver(Channel::SessionStateChanged, state("s1", "Completed"));
        store.clear(backend.as_ref()).await.unwrap();

        let mut next = sample_session("s2");
        next.status = RecordingStatus::Recording;
        store.begin_session(next).unwrap();
        assert_eq!(bridge.deliver(Channel::Progress, progress("s2", 1.0)), Delivery::Applied);

        let guard = bridge.progress_guard();
        assert_eq!(guard.high_water(&SessionId::from("s1")), None);
        assert_eq!(guard.high_water(&SessionId::from("s2")), Some(1.0));
    }

    #[test]
    fn test_state_change_applied_and_mismatch_ignored() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Preparing);

        assert_eq!(
            bridge.deliver(Channel::SessionStateChanged, state("s1", "Recording")),
            Delivery::Applied
        );
        assert!(matches!(
            bridge.deliver(Channel::SessionStateChanged, state("other", "Paused")),
            Delivery::Ignored(IgnoreReason::SessionMismatch { .. })
        ));
        assert_eq!(store.get_active().unwrap().status, RecordingStatus::Recording);
    }

    #[test]
    fn test_invalid_payload_is_dropped() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Recording);
        let before = store.snapshot();

        assert_eq!(
            bridge.deliver(Channel::SessionStateChanged, json!({"sessionId": "s1"})),
            Delivery::Invalid
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_error_event_faults_session() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Recording);

        let delivery = bridge.deliver(
            Channel::Error,
            json!({"sessionId": "s1", "error": "disk full", "timestamp": "2026-03-01T10:00:00Z"}),
        );

        assert_eq!(delivery, Delivery::Applied);
        assert!(store.get_active().unwrap().status.is_terminal_error());
    }

    #[test]
    fn test_window_list_change_invalidates_and_notifies() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Recording);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.add_listener(Channel::WindowListChanged, move |event| {
            let _ = tx.send(event.clone());
        });

        let delivery = bridge.deliver(
            Channel::WindowListChanged,
            json!({"timestamp": "2026-03-01T10:00:00Z"}),
        );

        assert_eq!(delivery, Delivery::Forwarded);
        assert!(store.stale_keys().contains(&QueryKey::WindowList));
        assert!(matches!(rx.try_recv(), Ok(PushEvent::WindowListChanged(_))));
    }

    #[test]
    fn test_anchor_completion_invalidates_recordings() {
        let (_, store, bridge) = bridge_with_session(RecordingStatus::Completed);
        store.put_cached(QueryKey::RecordingsList, CachedValue::Recordings(vec![]));
        assert!(!store.stale_keys().contains(&QueryKey::RecordingsList));

        bridge.deliver(
            Channel::AnchorCompleted,
            json!({"sessionId": "s1", "txHash": "0xabc", "timestamp": "2026-03-01T10:00:00Z"}),
        );

        let read = store.cached(&QueryKey::RecordingsList).unwrap();
        assert!(read.stale);
        assert_eq!(read.value, CachedValue::Recordings(vec![]));
    }

    #[test]
    fn test_removed_listener_not_called() {
        let (_, _, bridge) = bridge_with_session(RecordingStatus::Recording);
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let id = bridge.add_listener(Channel::BackendLog, move |_| {
            let _ = tx.send(());
        });
        assert!(bridge.remove_listener(id));
        assert!(!bridge.remove_listener(id));

        bridge.deliver(Channel::BackendLog, json!({"level": "info", "message": "hello"}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mount_routes_pushed_events() {
        let (backend, store, bridge) = bridge_with_session(RecordingStatus::Preparing);
        let mut snapshots = store.subscribe();

        let report = bridge.mount().await;
        assert_eq!(report.subscribed.len(), Channel::ALL.len());

        backend.push(Channel::SessionStateChanged, state("s1", "Recording"));
        tokio::time::timeout(Duration::from_secs(1), snapshots.changed())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(store.get_active().unwrap().status, RecordingStatus::Recording);
    }

    #[tokio::test]
    async fn test_remount_does_not_duplicate_delivery() {
        let (backend, _, bridge) = bridge_with_session(RecordingStatus::Recording);
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        bridge.add_listener(Channel::BackendLog, move |_| {
            let _ = tx.send(());
        });

        bridge.mount().await;
        bridge.mount().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.receiver_count(Channel::BackendLog), 1);

        backend.push(Channel::BackendLog, json!({"level": "info", "message": "once"}));
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unmount_releases_every_listener() {
        let (backend, _, bridge) = bridge_with_session(RecordingStatus::Recording);
        bridge.mount().await;
        assert!(bridge.is_mounted());

        bridge.unmount();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!bridge.is_mounted());
        for channel in Channel::ALL {
            assert_eq!(backend.receiver_count(channel), 0, "{} still subscribed", channel);
        }
    }

    #[tokio::test]
    async fn test_subscription_failure_is_not_fatal() {
        let (backend, store, bridge) = bridge_with_session(RecordingStatus::Recording);
        backend.fail_subscribe(Channel::BackendLog);

        let report = bridge.mount().await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, Channel::BackendLog);
        assert_eq!(report.subscribed.len(), Channel::ALL.len() - 1);

        let mut snapshots = store.subscribe();
        backend.push(Channel::Progress, progress("s1", 4.0));
        tokio::time::timeout(Duration::from_secs(1), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.recording_info().unwrap().duration_seconds, 4.0);
    }
}
