//! Scripted backend for unit tests

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

use crate::capture::{WindowBounds, WindowInfo};
use crate::commands::backend::{
    CommandError, CommandResult, DecryptCredential, PushSource, RecordingBackend, RecordingEntry,
    StreamBackend, StreamHandleId, StreamInfo, SystemStatus, VerificationBackend,
};
use crate::events::Channel;
use crate::recorder::state::{
    RecordingInfo, RecordingPreferences, RecordingSession, RecordingStatus, SessionId,
    StartRecordingRequest,
};
use crate::verification::{
    CheckStatus, RecordingSummary, SignatureInfo, VerificationChecks, VerificationReport,
    VerificationStatus,
};

pub fn sample_session(id: &str) -> RecordingSession {
    RecordingSession {
        session_id: SessionId::from(id),
        window_id: "window-1".to_string(),
        start_time: Utc::now(),
        output_path: format!("/recordings/{}.mp4.enc", id),
        status: RecordingStatus::Idle,
        preferences: RecordingPreferences::default(),
        window_metadata: None,
        title: None,
        description: None,
        tags: Vec::new(),
    }
}

/// Offline report with every core check passing and no anchor
pub fn sample_report() -> VerificationReport {
    VerificationReport {
        timestamp: Utc::now(),
        status: VerificationStatus::Verified,
        checks: VerificationChecks {
            manifest_structure: CheckStatus::Pass,
            signature_valid: CheckStatus::Pass,
            hash_match: CheckStatus::Pass,
            blockchain_anchor: None,
        },
        recording_info: RecordingSummary {
            session_id: Some("s1".to_string()),
            ..Default::default()
        },
        signature_info: SignatureInfo {
            algorithm: Some("ed25519".to_string()),
            ..Default::default()
        },
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    failing: HashSet<String>,
    active_session: Option<RecordingSession>,
    recorded_seconds: f64,
    channels: HashMap<Channel, broadcast::Sender<Value>>,
    failing_channels: HashSet<Channel>,
    stream: Vec<u8>,
    stream_encrypted: bool,
    next_handle: u64,
    reads_started: usize,
    read_ranges: Vec<(u64, u64)>,
    read_gates: HashMap<usize, Arc<Notify>>,
    failing_read: Option<usize>,
    closes: usize,
    report: Option<VerificationReport>,
    deep_report: Option<VerificationReport>,
}

/// In-memory backend implementing every boundary trait
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and return the scripted failure for it, if any.
    fn record(&self, command: &str) -> CommandResult<()> {
        let mut state = self.state.lock();
        state.calls.push(command.to_string());
        if state.failing.contains(command) {
            return Err(CommandError::rejected(command, "scripted failure"));
        }
        Ok(())
    }

    pub fn calls_named(&self, command: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == command).count()
    }

    pub fn fail_command(&self, command: &str) {
        self.state.lock().failing.insert(command.to_string());
    }

    pub fn set_active_session(&self, session: Option<RecordingSession>) {
        self.state.lock().active_session = session;
    }

    /// Duration reported by `get_recording_info`.
    pub fn set_recorded_seconds(&self, seconds: f64) {
        self.state.lock().recorded_seconds = seconds;
    }

    /// Send `payload` to every current subscriber of `channel`.
    pub fn push(&self, channel: Channel, payload: Value) {
        if let Some(sender) = self.state.lock().channels.get(&channel) {
            let _ = sender.send(payload);
        }
    }

    pub fn receiver_count(&self, channel: Channel) -> usize {
        self.state
            .lock()
            .channels
            .get(&channel)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    pub fn fail_subscribe(&self, channel: Channel) {
        self.state.lock().failing_channels.insert(channel);
    }

    pub fn set_stream(&self, bytes: Vec<u8>, encrypted: bool) {
        let mut state = self.state.lock();
        state.stream = bytes;
        state.stream_encrypted = encrypted;
    }

    /// Hold the read with zero-based index `index` until the returned
    /// notify is signalled.
    pub fn gate_read(&self, index: usize) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().read_gates.insert(index, gate.clone());
        gate
    }

    pub fn fail_read_at(&self, index: usize) {
        self.state.lock().failing_read = Some(index);
    }

    pub fn reads_started(&self) -> usize {
        self.state.lock().reads_started
    }

    pub fn read_ranges(&self) -> Vec<(u64, u64)> {
        self.state.lock().read_ranges.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    pub fn set_verification_report(&self, report: VerificationReport) {
        self.state.lock().report = Some(report);
    }

    pub fn set_deep_report(&self, report: VerificationReport) {
        self.state.lock().deep_report = Some(report);
    }
}

#[async_trait]
impl RecordingBackend for FakeBackend {
    async fn start_recording(&self, request: StartRecordingRequest) -> CommandResult<RecordingSession> {
        self.record("start_recording")?;
        let mut session = sample_session("s1");
        session.window_id = request.window_id;
        session.preferences = request.preferences;
        session.title = request.title;
        session.description = request.description;
        session.tags = request.tags;
        Ok(session)
    }

    async fn stop_recording(&self, _session_id: &SessionId) -> CommandResult<()> {
        self.record("stop_recording")
    }

    async fn pause_recording(&self, _session_id: &SessionId) -> CommandResult<()> {
        self.record("pause_recording")
    }

    async fn resume_recording(&self, _session_id: &SessionId) -> CommandResult<()> {
        self.record("resume_recording")
    }

    async fn get_active_session(&self) -> CommandResult<Option<RecordingSession>> {
        self.record("get_active_session")?;
        Ok(self.state.lock().active_session.clone())
    }

    async fn get_recording_info(&self, session_id: &SessionId) -> CommandResult<RecordingInfo> {
        self.record("get_recording_info")?;
        Ok(RecordingInfo {
            session_id: session_id.clone(),
            duration_seconds: self.state.lock().recorded_seconds,
            file_size_bytes: 0,
            estimated_final_size_bytes: Some(50_000_000),
        })
    }

    async fn get_system_status(&self) -> CommandResult<SystemStatus> {
        self.record("get_system_status")?;
        let active_session_id = self
            .state
            .lock()
            .active_session
            .as_ref()
            .map(|s| s.session_id.clone());
        Ok(SystemStatus {
            can_record: true,
            has_screen_permission: true,
            active_session_id,
            backend_version: Some("0.1.0".to_string()),
        })
    }

    async fn clear_active_session(&self) -> CommandResult<()> {
        self.record("clear_active_session")?;
        self.state.lock().active_session = None;
        Ok(())
    }

    async fn list_recordings(&self) -> CommandResult<Vec<RecordingEntry>> {
        self.record("list_recordings")?;
        Ok(Vec::new())
    }

    async fn list_windows(&self) -> CommandResult<Vec<WindowInfo>> {
        self.record("list_windows")?;
        Ok(vec![WindowInfo {
            id: "window-1".to_string(),
            title: "Quarterly report".to_string(),
            app_name: "Editor".to_string(),
            bounds: Some(WindowBounds {
                x: 0,
                y: 0,
                width: 1280,
                height: 720,
            }),
            is_on_screen: true,
        }])
    }
}

#[async_trait]
impl StreamBackend for FakeBackend {
    async fn open_decrypt_stream(
        &self,
        _path: &str,
        _credential: Option<&DecryptCredential>,
    ) -> CommandResult<StreamHandleId> {
        self.record("open_decrypt_stream")?;
        let mut state = self.state.lock();
        state.next_handle += 1;
        Ok(StreamHandleId::new(format!("h-{}", state.next_handle)))
    }

    async fn describe_stream(&self, _handle: &StreamHandleId) -> CommandResult<StreamInfo> {
        self.record("describe_stream")?;
        let state = self.state.lock();
        Ok(StreamInfo {
            length: state.stream.len() as u64,
            encrypted: state.stream_encrypted,
        })
    }

    async fn read_chunk(&self, _handle: &StreamHandleId, start: u64, end: u64) -> CommandResult<Vec<u8>> {
        self.record("read_chunk")?;
        let (index, gate, failing) = {
            let mut state = self.state.lock();
            let index = state.reads_started;
            state.reads_started += 1;
            state.read_ranges.push((start, end));
            (index, state.read_gates.get(&index).cloned(), state.failing_read == Some(index))
        };

        if let Some(gate) = gate {
            gate.notified().await;
        }
        if failing {
            return Err(CommandError::rejected("read_chunk", format!("read {} failed", index)));
        }

        let state = self.state.lock();
        let len = state.stream.len();
        let from = (start as usize).min(len);
        let to = (end as usize).saturating_add(1).min(len);
        Ok(state.stream[from..to].to_vec())
    }

    async fn close_stream(&self, _handle: &StreamHandleId) -> CommandResult<()> {
        self.state.lock().closes += 1;
        self.record("close_stream")
    }
}

#[async_trait]
impl VerificationBackend for FakeBackend {
    async fn verify_recording(&self, _manifest_path: &str, _video_path: &str) -> CommandResult<VerificationReport> {
        self.record("verify_recording")?;
        Ok(self.state.lock().report.clone().unwrap_or_else(sample_report))
    }

    async fn verify_recording_deep(
        &self,
        _manifest_path: &str,
        _video_path: &str,
    ) -> CommandResult<VerificationReport> {
        self.record("verify_recording_deep")?;
        Ok(self.state.lock().deep_report.clone().unwrap_or_else(sample_report))
    }
}

#[async_trait]
impl PushSource for FakeBackend {
    async fn subscribe(&self, channel: Channel) -> CommandResult<broadcast::Receiver<Value>> {
        self.record("subscribe")?;
        let mut state = self.state.lock();
        if state.failing_channels.contains(&channel) {
            return Err(CommandError::Transport(format!("{} unavailable", channel)));
        }
        let sender = state
            .channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(64).0);
        Ok(sender.subscribe())
    }
}
