//! UI session state held by the server.
//!
//! Each UI session (identified by the `X-Session-Id` header) owns its own
//! [`SyncCooldown`]. Sessions live in an LRU cache, so a governor disappears
//! together with its session instead of living for the whole process.

pub mod cooldown;
pub mod popup;

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::SyncConfig;

pub use cooldown::{CooldownActive, SyncCooldown};
pub use popup::{ListenerHandle, PopupMessage, PopupOutcome, PopupProbe, await_popup_completion};

/// Header naming the UI session a request belongs to.
pub const SESSION_ID_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 128;

/// Returns the session id if it is short and printable.
pub fn sanitize_session_id(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()
        && trimmed.len() <= MAX_SESSION_ID_LEN
        && trimmed.chars().all(|c| c.is_ascii_graphic()))
    .then_some(trimmed)
}

#[derive(Debug)]
pub struct SessionStore {
    window: Duration,
    sessions: Mutex<LruCache<String, SyncCooldown>>,
}

impl SessionStore {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.cooldown(), config.session_capacity)
    }

    /// Claims a sync of `source_id` for `session_id`.
    pub async fn try_acquire(&self, session_id: &str, source_id: Uuid) -> Result<(), CooldownActive> {
        let mut sessions = self.sessions.lock().await;
        let window = self.window;
        sessions
            .get_or_insert_mut(session_id.to_string(), || SyncCooldown::new(window))
            .try_acquire(source_id)
    }

    /// Gives back a claim whose sync did not go through.
    pub async fn release(&self, session_id: &str, source_id: Uuid) {
        if let Some(cooldown) = self.sessions.lock().await.get_mut(session_id) {
            cooldown.release(source_id);
        }
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_throttle_independently() {
        let store = SessionStore::new(Duration::from_secs(300), 8);
        let source = Uuid::new_v4();

        store.try_acquire("tab-a", source).await.unwrap();
        assert!(store.try_acquire("tab-a", source).await.is_err());
        assert!(store.try_acquire("tab-b", source).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_reopens_source() {
        let store = SessionStore::new(Duration::from_secs(300), 8);
        let source = Uuid::new_v4();

        store.try_acquire("tab-a", source).await.unwrap();
        store.release("tab-a", source).await;
        assert!(store.try_acquire("tab-a", source).await.is_ok());
        assert!(store.try_acquire("tab-a", source).await.is_err());
    }

    #[tokio::test]
    async fn test_least_recent_session_is_evicted() {
        let store = SessionStore::new(Duration::from_secs(300), 2);
        let source = Uuid::new_v4();

        store.try_acquire("one", source).await.unwrap();
        store.try_acquire("two", source).await.unwrap();
        store.try_acquire("three", source).await.unwrap();

        assert_eq!(store.session_count().await, 2);
        // "one" was evicted along with its cooldown.
        assert!(store.try_acquire("one", source).await.is_ok());
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize_session_id(" abc-123 "), Some("abc-123"));
        assert_eq!(sanitize_session_id(""), None);
        assert_eq!(sanitize_session_id("has space"), None);
        assert_eq!(sanitize_session_id(&"x".repeat(200)), None);
    }
}
