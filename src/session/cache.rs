//! Query cache
//!
//! Results of backend queries keyed by what was asked, with declared
//! invalidation edges between keys. Invalidated entries stay readable and are
//! flagged stale until the next successful refetch.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::capture::WindowInfo;
use crate::commands::backend::{RecordingEntry, SystemStatus};
use crate::recorder::state::{RecordingInfo, RecordingSession, SessionId};

/// Identifier of a cached query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    ActiveSession,
    HasActiveSession,
    RecordingInfo(SessionId),
    RecordingsList,
    WindowList,
    SystemStatus,
}

impl QueryKey {
    /// Whether invalidating `self` must also invalidate `other`.
    pub fn invalidates(&self, other: &QueryKey) -> bool {
        if self == other {
            return true;
        }
        matches!(
            (self, other),
            (QueryKey::ActiveSession, QueryKey::HasActiveSession)
                | (QueryKey::ActiveSession, QueryKey::RecordingInfo(_))
                | (QueryKey::ActiveSession, QueryKey::SystemStatus)
        )
    }
}

/// Cached query result
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    ActiveSession(Option<RecordingSession>),
    HasActiveSession(bool),
    RecordingInfo(RecordingInfo),
    Recordings(Vec<RecordingEntry>),
    Windows(Vec<WindowInfo>),
    SystemStatus(SystemStatus),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    fetched_at: DateTime<Utc>,
    stale: bool,
}

/// Cached value plus freshness
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead {
    pub value: CachedValue,
    pub fetched_at: DateTime<Utc>,
    pub stale: bool,
}

#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, CacheEntry>,
    /// Keys invalidated before they were ever fetched
    pending: Vec<QueryKey>,
    /// Session whose recording info follows `ActiveSession`
    active: Option<SessionId>,
}

/// Whether invalidating `trigger` reaches `key` while `active` is current.
fn reaches(trigger: &QueryKey, key: &QueryKey, active: Option<&SessionId>) -> bool {
    match (trigger, key) {
        (QueryKey::ActiveSession, QueryKey::RecordingInfo(id)) => active == Some(id),
        _ => trigger.invalidates(key),
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &QueryKey) -> Option<CacheRead> {
        self.entries.get(key).map(|entry| CacheRead {
            value: entry.value.clone(),
            fetched_at: entry.fetched_at,
            stale: entry.stale,
        })
    }

    pub fn put(&mut self, key: QueryKey, value: CachedValue) {
        self.pending.retain(|k| k != &key);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                fetched_at: Utc::now(),
                stale: false,
            },
        );
    }

    /// Switch the current session, dropping recording info of any other.
    pub fn set_active(&mut self, session_id: Option<SessionId>) {
        let keep = |key: &QueryKey| match key {
            QueryKey::RecordingInfo(id) => session_id.as_ref() == Some(id),
            _ => true,
        };
        self.entries.retain(|key, _| keep(key));
        self.pending.retain(|key| keep(key));
        self.active = session_id;
    }

    pub fn remove(&mut self, key: &QueryKey) {
        self.entries.remove(key);
        self.pending.retain(|k| k != key);
    }

    /// Mark `keys` and everything downstream of them stale.
    ///
    /// Returns every key that was marked, including requested keys that have
    /// no entry yet (those are remembered so the next refresh fetches them).
    pub fn invalidate(&mut self, keys: &[QueryKey]) -> Vec<QueryKey> {
        let mut marked = Vec::new();
        let active = self.active.as_ref();

        for (key, entry) in self.entries.iter_mut() {
            if keys.iter().any(|k| reaches(k, key, active)) {
                entry.stale = true;
                marked.push(key.clone());
            }
        }

        for key in keys {
            if !self.entries.contains_key(key) && !self.pending.contains(key) {
                self.pending.push(key.clone());
            }
            if !marked.contains(key) {
                marked.push(key.clone());
            }
        }

        marked
    }

    /// Keys that need a refetch: stale entries plus never-fetched invalidations.
    pub fn stale_keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &self.pending {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        match self.entries.get(key) {
            Some(entry) => entry.stale,
            None => true,
        }
    }
}
