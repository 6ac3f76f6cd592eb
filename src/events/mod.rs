pub mod bridge;
pub mod channels;

pub use bridge::{Delivery, EventBridge, ListenerId, MountReport, ProgressGuard};
pub use channels::{
    AnchorPayload, AnchorStage, BackendLogPayload, Channel, ErrorPayload, PayloadError,
    ProgressPayload, PushEvent, StateChangedPayload, WindowListChangedPayload,
};
