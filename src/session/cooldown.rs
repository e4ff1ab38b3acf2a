//! Per-session sync throttling.
//!
//! A [`SyncCooldown`] remembers when each source was last synced from one UI
//! session and refuses another sync of that source until the window passes.
//! It is advisory; duplicate reviews are prevented by storage uniqueness.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use thiserror::Error;
use uuid::Uuid;

/// Sources remembered per session before the least recently synced is forgotten.
const SOURCES_PER_SESSION: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(value) => value,
    None => NonZeroUsize::MIN,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync is cooling down, retry in {}s", .remaining.as_secs())]
pub struct CooldownActive {
    pub remaining: Duration,
}

impl CooldownActive {
    /// Remaining time rounded up to whole seconds, never zero.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.remaining.as_secs();
        if self.remaining.subsec_nanos() > 0 || secs == 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Debug)]
pub struct SyncCooldown {
    window: Duration,
    last_sync: LruCache<Uuid, Instant>,
}

impl SyncCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_sync: LruCache::new(SOURCES_PER_SESSION),
        }
    }

    pub fn try_acquire(&mut self, source_id: Uuid) -> Result<(), CooldownActive> {
        self.try_acquire_at(source_id, Instant::now())
    }

    /// Records a sync of `source_id` at `now` unless one is still inside the window.
    pub fn try_acquire_at(&mut self, source_id: Uuid, now: Instant) -> Result<(), CooldownActive> {
        if let Some(remaining) = self.remaining_at(source_id, now) {
            return Err(CooldownActive { remaining });
        }
        self.last_sync.put(source_id, now);
        Ok(())
    }

    /// Time left before `source_id` may sync again, if any.
    pub fn remaining_at(&self, source_id: Uuid, now: Instant) -> Option<Duration> {
        let last = self.last_sync.peek(&source_id)?;
        let elapsed = now.saturating_duration_since(*last);
        self.window
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }

    /// Forgets the last sync so the source can be retried immediately.
    pub fn release(&mut self, source_id: Uuid) {
        self.last_sync.pop(&source_id);
    }

    pub fn len(&self) -> usize {
        self.last_sync.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sync.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_sync_inside_window_is_rejected() {
        let mut cooldown = SyncCooldown::new(Duration::from_secs(300));
        let source = Uuid::new_v4();
        let start = Instant::now();

        assert!(cooldown.try_acquire_at(source, start).is_ok());

        let err = cooldown
            .try_acquire_at(source, start + Duration::from_secs(120))
            .unwrap_err();
        assert_eq!(err.remaining, Duration::from_secs(180));
        assert_eq!(err.retry_after_secs(), 180);
    }

    #[test]
    fn test_sync_allowed_after_window() {
        let mut cooldown = SyncCooldown::new(Duration::from_secs(300));
        let source = Uuid::new_v4();
        let start = Instant::now();

        cooldown.try_acquire_at(source, start).unwrap();
        assert!(
            cooldown
                .try_acquire_at(source, start + Duration::from_secs(300))
                .is_ok()
        );
    }

    #[test]
    fn test_sources_are_independent() {
        let mut cooldown = SyncCooldown::new(Duration::from_secs(300));
        let start = Instant::now();

        cooldown.try_acquire_at(Uuid::new_v4(), start).unwrap();
        assert!(cooldown.try_acquire_at(Uuid::new_v4(), start).is_ok());
        assert_eq!(cooldown.len(), 2);
    }

    #[test]
    fn test_release_allows_immediate_retry() {
        let mut cooldown = SyncCooldown::new(Duration::from_secs(300));
        let source = Uuid::new_v4();
        let start = Instant::now();

        cooldown.try_acquire_at(source, start).unwrap();
        cooldown.release(source);
        assert!(cooldown.try_acquire_at(source, start).is_ok());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let active = CooldownActive {
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(active.retry_after_secs(), 2);

        let tiny = CooldownActive {
            remaining: Duration::from_nanos(1),
        };
        assert_eq!(tiny.retry_after_secs(), 1);
    }
}
