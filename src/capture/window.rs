//! Capture target descriptions
//!
//! Windows the backend can record, as listed by `list_windows` and attached to
//! a session as its window metadata.

use serde::{Deserialize, Serialize};

/// Information about a capturable window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    /// Backend window identifier
    pub id: String,

    /// Window title
    pub title: String,

    /// Application name
    pub app_name: String,

    /// Window bounds
    #[serde(default)]
    pub bounds: Option<WindowBounds>,

    /// Whether the window is on screen
    #[serde(default)]
    pub is_on_screen: bool,
}

/// Window bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl WindowInfo {
    /// Label shown in window pickers: `App - Title`, or the app alone when
    /// the title is empty.
    pub fn display_label(&self) -> String {
        if self.title.trim().is_empty() {
            self.app_name.clone()
        } else {
            format!("{} - {}", self.app_name, self.title)
        }
    }
}
