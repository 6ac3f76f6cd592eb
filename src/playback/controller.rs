//! Playback of (possibly encrypted) recordings
//!
//! A recording is opened as a backend-side decrypting stream, pulled in
//! sequential chunks, assembled in memory and registered as a playable
//! resource. A [`PlaybackSurface`] owns one load: unmounting it stops further
//! pulls, closes the stream and guarantees no state is written afterwards.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ranges::{ChunkPlan, DEFAULT_CHUNK_SIZE};
use super::resource::{PlayableResource, ResourceRegistry};
use crate::commands::backend::{CommandError, DecryptCredential, StreamBackend, StreamHandleId, StreamInfo};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("failed to open stream: {0}")]
    Open(CommandError),

    #[error("failed to describe stream: {0}")]
    Describe(CommandError),

    #[error("chunk {start}-{end} failed: {source}")]
    Chunk {
        start: u64,
        end: u64,
        source: CommandError,
    },

    #[error("chunk {start}-{end} returned {actual} bytes, expected {expected}")]
    ChunkSize {
        start: u64,
        end: u64,
        expected: u64,
        actual: u64,
    },

    #[error("stream is empty")]
    EmptyStream,

    #[error("playback cancelled")]
    Cancelled,
}

/// Observable playback state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Opening,
    Loading {
        loaded_bytes: u64,
        total_bytes: u64,
    },
    Ready(PlayableResource),
    Failed(PlaybackError),
}

/// An open backend stream that is closed exactly once.
///
/// Prefer [`StreamLease::close`]; if the lease is dropped unclosed (for
/// example because the owning task was aborted) a best-effort close is
/// spawned on the current runtime.
pub struct StreamLease {
    backend: Arc<dyn StreamBackend>,
    handle: StreamHandleId,
    closed: bool,
}

impl StreamLease {
    pub fn new(backend: Arc<dyn StreamBackend>, handle: StreamHandleId) -> Self {
        Self {
            backend,
            handle,
            closed: false,
        }
    }

    pub fn handle(&self) -> &StreamHandleId {
        &self.handle
    }

    /// Close the stream. Failures are logged and swallowed.
    pub async fn close(mut self) {
        self.closed = true;
        if let Err(e) = self.backend.close_stream(&self.handle).await {
            tracing::warn!("Failed to close stream {}: {}", self.handle, e);
        }
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let backend = self.backend.clone();
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = backend.close_stream(&handle).await {
                        tracing::warn!("Failed to close dropped stream {}: {}", handle, e);
                    }
                });
            }
            Err(_) => tracing::warn!("Stream {} dropped outside a runtime; not closed", handle),
        }
    }
}

pub struct PlaybackController {
    backend: Arc<dyn StreamBackend>,
    registry: ResourceRegistry,
    chunk_size: u64,
}

impl PlaybackController {
    pub fn new(backend: Arc<dyn StreamBackend>, registry: ResourceRegistry, chunk_size: u64) -> Self {
        Self {
            backend,
            registry,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn with_defaults(backend: Arc<dyn StreamBackend>) -> Self {
        Self::new(backend, ResourceRegistry::default(), DEFAULT_CHUNK_SIZE)
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Open, pull and assemble one recording.
    ///
    /// `on_state` receives intermediate states (opening, loading progress).
    /// Cancellation is checked after every backend call; once observed no
    /// further chunk is requested and the stream is closed.
    pub async fn load(
        &self,
        path: &str,
        credential: Option<&DecryptCredential>,
        cancel: &CancellationToken,
        on_state: &(dyn Fn(PlaybackState) + Send + Sync),
    ) -> Result<PlayableResource, PlaybackError> {
        on_state(PlaybackState::Opening);
        let handle = self
            .backend
            .open_decrypt_stream(path, credential)
            .await
            .map_err(PlaybackError::Open)?;
        let lease = StreamLease::new(self.backend.clone(), handle);
        tracing::debug!("Opened stream {} for {}", lease.handle(), path);

        let pulled = if cancel.is_cancelled() {
            Err(PlaybackError::Cancelled)
        } else {
            self.pull(&lease, cancel, on_state).await
        };
        lease.close().await;

        let (bytes, info) = pulled?;
        if cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        Ok(self.registry.register(path, bytes, info.encrypted))
    }

    async fn pull(
        &self,
        lease: &StreamLease,
        cancel: &CancellationToken,
        on_state: &(dyn Fn(PlaybackState) + Send + Sync),
    ) -> Result<(Vec<u8>, StreamInfo), PlaybackError> {
        let info = self
            .backend
            .describe_stream(lease.handle())
            .await
            .map_err(PlaybackError::Describe)?;
        if cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }
        if info.length == 0 {
            return Err(PlaybackError::EmptyStream);
        }

        let plan = ChunkPlan::new(info.length, self.chunk_size);
        tracing::debug!(
            "Streaming {} bytes in {} chunks (encrypted: {})",
            info.length,
            plan.chunk_count(),
            info.encrypted
        );
        on_state(PlaybackState::Loading {
            loaded_bytes: 0,
            total_bytes: info.length,
        });

        let mut bytes = Vec::new();
        for range in plan {
            let chunk = self
                .backend
                .read_chunk(lease.handle(), range.start, range.end)
                .await
                .map_err(|source| PlaybackError::Chunk {
                    start: range.start,
                    end: range.end,
                    source,
                })?;
            if cancel.is_cancelled() {
                return Err(PlaybackError::Cancelled);
            }
            if chunk.len() as u64 != range.len() {
                return Err(PlaybackError::ChunkSize {
                    start: range.start,
                    end: range.end,
                    expected: range.len(),
                    actual: chunk.len() as u64,
                });
            }
            bytes.extend_from_slice(&chunk);
            on_state(PlaybackState::Loading {
                loaded_bytes: bytes.len() as u64,
                total_bytes: info.length,
            });
        }

        Ok((bytes, info))
    }
}

struct SurfaceShared {
    live: Mutex<bool>,
    state_tx: watch::Sender<PlaybackState>,
    writes: AtomicU64,
}

impl SurfaceShared {
    /// Write `state` unless the surface has been unmounted.
    fn publish(&self, state: PlaybackState) -> bool {
        let live = self.live.lock();
        if !*live {
            return false;
        }
        self.state_tx.send_replace(state);
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// One mounted playback view
pub struct PlaybackSurface {
    shared: Arc<SurfaceShared>,
    cancel: CancellationToken,
    registry: ResourceRegistry,
    task: Mutex<Option<JoinHandle<Result<PlayableResource, PlaybackError>>>>,
}

impl PlaybackSurface {
    /// Start loading `path` in the background.
    pub fn mount(
        controller: Arc<PlaybackController>,
        path: impl Into<String>,
        credential: Option<DecryptCredential>,
    ) -> Self {
        let path = path.into();
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        let shared = Arc::new(SurfaceShared {
            live: Mutex::new(true),
            state_tx,
            writes: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let registry = controller.registry().clone();

        let task = tokio::spawn({
            let shared = shared.clone();
            let cancel = cancel.clone();
            async move {
                let reporter = shared.clone();
                let on_state = move |state: PlaybackState| {
                    reporter.publish(state);
                };
                let result = controller
                    .load(&path, credential.as_ref(), &cancel, &on_state)
                    .await;

                match &result {
                    Ok(resource) => {
                        if !shared.publish(PlaybackState::Ready(resource.clone())) {
                            controller.registry().release(&resource.id);
                        }
                    }
                    Err(PlaybackError::Cancelled) => {
                        tracing::debug!("Playback of {} cancelled", path);
                    }
                    Err(e) => {
                        tracing::warn!("Playback of {} failed: {}", path, e);
                        shared.publish(PlaybackState::Failed(e.clone()));
                    }
                }
                result
            }
        });

        Self {
            shared,
            cancel,
            registry,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state_tx.subscribe()
    }

    /// Number of state writes so far
    pub fn state_writes(&self) -> u64 {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// Stop the load and free any assembled media. Idempotent.
    pub fn unmount(&self) {
        self.cancel.cancel();
        let mut live = self.shared.live.lock();
        if !*live {
            return;
        }
        *live = false;
        if let PlaybackState::Ready(resource) = &*self.shared.state_tx.borrow() {
            self.registry.release(&resource.id);
        }
    }

    /// Wait for the background load to finish.
    ///
    /// Returns `None` if it was already awaited or the task panicked.
    pub async fn finished(&self) -> Option<Result<PlayableResource, PlaybackError>> {
        let task = self.task.lock().take()?;
        match task.await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!("Playback task failed: {}", e);
                None
            }
        }
    }
}

impl Drop for PlaybackSurface {
    fn drop(&mut self) {
        self.unmount();
    }
}
