//! In-memory playable resources
//!
//! Decrypted media never touches disk: once every chunk has arrived the bytes
//! are registered here and handed out through an opaque URL the host's media
//! element can fetch. Releasing the resource frees the bytes.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Scheme used for resource URLs unless configured otherwise
pub const DEFAULT_SCHEME: &str = "witness-stream";

const ENCRYPTED_SUFFIX: &str = "enc";

/// Handle to media registered in a [`ResourceRegistry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayableResource {
    pub id: Uuid,
    pub url: String,
    pub mime_type: String,
    pub len: u64,
    pub encrypted: bool,
}

#[derive(Debug)]
struct Entry {
    bytes: Arc<Vec<u8>>,
    mime_type: String,
}

#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    scheme: String,
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
}

impl ResourceRegistry {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register assembled media and return its handle.
    pub fn register(&self, source_path: &str, bytes: Vec<u8>, encrypted: bool) -> PlayableResource {
        let id = Uuid::new_v4();
        let file_name = Path::new(source_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("recording");
        let mime_type = mime_type_for(source_path, &bytes).to_string();
        let len = bytes.len() as u64;

        self.entries.write().insert(
            id,
            Entry {
                bytes: Arc::new(bytes),
                mime_type: mime_type.clone(),
            },
        );
        tracing::debug!("Registered playable resource {} ({} bytes)", id, len);

        PlayableResource {
            id,
            url: format!(
                "{}://localhost/{}/{}",
                self.scheme,
                id,
                urlencoding::encode(file_name)
            ),
            mime_type,
            len,
            encrypted,
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Vec<u8>>> {
        self.entries.read().get(id).map(|e| e.bytes.clone())
    }

    /// Look up the bytes and MIME type behind a resource URL.
    pub fn resolve(&self, url: &str) -> Option<(Arc<Vec<u8>>, String)> {
        let id = self.parse_url(url)?;
        self.entries
            .read()
            .get(&id)
            .map(|e| (e.bytes.clone(), e.mime_type.clone()))
    }

    /// Free the bytes. Returns whether the resource was still registered.
    pub fn release(&self, id: &Uuid) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            tracing::debug!("Released playable resource {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn parse_url(&self, url: &str) -> Option<Uuid> {
        let rest = url
            .strip_prefix(self.scheme.as_str())?
            .strip_prefix("://localhost/")?;
        let id = rest.split('/').next()?;
        Uuid::parse_str(id).ok()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEME)
    }
}

/// MIME type from the file extension (ignoring a trailing `.enc`), falling
/// back to sniffing the container header.
pub fn mime_type_for(path: &str, bytes: &[u8]) -> &'static str {
    let path = Path::new(path);
    let is_encrypted = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case(ENCRYPTED_SUFFIX))
        .unwrap_or(false);
    let plain = if is_encrypted {
        path.with_extension("")
    } else {
        path.to_path_buf()
    };

    let by_extension = plain
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match by_extension.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => sniff(bytes),
    }
}

fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        if &bytes[8..10] == b"qt" {
            return "video/quicktime";
        }
        return "video/mp4";
    }
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return "video/webm";
    }
    "application/octet-stream"
}
