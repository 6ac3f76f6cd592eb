//! Capture targets

pub mod window;

pub use window::{WindowBounds, WindowInfo};
