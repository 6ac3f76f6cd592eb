//! Client facade
//!
//! Wires the session store, event bridge, recording commands, playback and
//! verification around one backend.

use std::sync::Arc;

use crate::commands::backend::{DecryptCredential, PushSource, RecordingBackend, StreamBackend, VerificationBackend};
use crate::commands::recording::RecordingController;
use crate::config::ClientConfig;
use crate::events::{EventBridge, MountReport};
use crate::playback::{PlaybackController, PlaybackSurface, ResourceRegistry};
use crate::session::{QueryKey, SessionStore};
use crate::verification::VerificationSession;

/// A backend answering every command and push channel
pub trait Backend: RecordingBackend + StreamBackend + VerificationBackend + PushSource {}

impl<T> Backend for T where T: RecordingBackend + StreamBackend + VerificationBackend + PushSource {}

pub struct WitnessClient {
    config: ClientConfig,
    store: Arc<SessionStore>,
    bridge: EventBridge,
    recording: RecordingController,
    playback: Arc<PlaybackController>,
    verification: Arc<dyn VerificationBackend>,
}

impl WitnessClient {
    pub fn new<B: Backend + 'static>(backend: Arc<B>, config: ClientConfig) -> Self {
        Self::from_parts(backend.clone(), backend.clone(), backend.clone(), backend, config)
    }

    /// Build a client whose capabilities are served by separate objects.
    pub fn from_parts(
        recording: Arc<dyn RecordingBackend>,
        stream: Arc<dyn StreamBackend>,
        verification: Arc<dyn VerificationBackend>,
        push: Arc<dyn PushSource>,
        config: ClientConfig,
    ) -> Self {
        let store = Arc::new(SessionStore::new(config.progress_fallback()));
        let bridge = EventBridge::new(push, store.clone());
        let recording = RecordingController::new(recording, store.clone());
        let playback = Arc::new(PlaybackController::new(
            stream,
            ResourceRegistry::new(config.resource_scheme.clone()),
            config.chunk_size_bytes,
        ));

        Self {
            config,
            store,
            bridge,
            recording,
            playback,
            verification,
        }
    }

    /// Subscribe to push channels and pick up any session already running.
    pub async fn connect(&self) -> MountReport {
        let report = self.bridge.mount().await;

        self.store.invalidate(&[QueryKey::ActiveSession]);
        if let Err(e) = self.recording.refresh().await {
            tracing::warn!("Initial refresh failed, showing cached state: {}", e);
        }
        report
    }

    pub fn disconnect(&self) {
        self.bridge.unmount();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBridge {
        &self.bridge
    }

    pub fn recording(&self) -> &RecordingController {
        &self.recording
    }

    pub fn playback(&self) -> &Arc<PlaybackController> {
        &self.playback
    }

    /// Start loading a recording for playback. Dropping or unmounting the
    /// returned surface stops the load.
    pub fn play(&self, path: impl Into<String>, credential: Option<DecryptCredential>) -> PlaybackSurface {
        PlaybackSurface::mount(self.playback.clone(), path, credential)
    }

    pub fn verification(
        &self,
        manifest_path: impl Into<String>,
        video_path: impl Into<String>,
    ) -> VerificationSession {
        VerificationSession::new(self.verification.clone(), manifest_path, video_path)
    }
}
