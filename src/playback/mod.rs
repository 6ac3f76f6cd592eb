//! In-memory playback of recordings

pub mod controller;
pub mod ranges;
pub mod resource;

pub use controller::{PlaybackController, PlaybackError, PlaybackState, PlaybackSurface, StreamLease};
pub use ranges::{ByteRange, ChunkPlan, DEFAULT_CHUNK_SIZE};
pub use resource::{PlayableResource, ResourceRegistry};
