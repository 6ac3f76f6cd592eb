pub mod cache;
pub mod store;

pub use cache::{CacheRead, CachedValue, QueryCache, QueryKey};
pub use store::{ApplyOutcome, IgnoreReason, SessionEvent, SessionSnapshot, SessionStore, StoreError};
