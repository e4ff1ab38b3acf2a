//! OAuth popup completion channel.
//!
//! The callback page posts a [`PopupMessage`] to its opener and closes. The
//! opener side waits on [`await_popup_completion`], which resolves with the
//! first of two signals: a message for the expected service, or the popup
//! observed closed. Listener teardown runs exactly once on every exit path,
//! including when the waiting future is dropped.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Message posted by the OAuth callback page to the window that opened it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PopupMessage {
    AuthSuccess {
        service: String,
    },
    AuthError {
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl PopupMessage {
    pub fn service(&self) -> &str {
        match self {
            PopupMessage::AuthSuccess { service } | PopupMessage::AuthError { service, .. } => {
                service
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupOutcome {
    Succeeded,
    Failed { message: Option<String> },
    /// The popup went away without reporting a result
    Closed,
}

impl From<PopupMessage> for PopupOutcome {
    fn from(message: PopupMessage) -> Self {
        match message {
            PopupMessage::AuthSuccess { .. } => PopupOutcome::Succeeded,
            PopupMessage::AuthError { message, .. } => PopupOutcome::Failed { message },
        }
    }
}

/// Reports whether the popup window has been closed.
pub trait PopupProbe: Send + Sync {
    fn is_closed(&self) -> bool;
}

impl<F> PopupProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_closed(&self) -> bool {
        self()
    }
}

/// Owns the cleanup for whatever listeners feed the message channel.
pub struct ListenerHandle {
    on_teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new(on_teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_teardown: Some(Box::new(on_teardown)),
        }
    }

    pub fn noop() -> Self {
        Self { on_teardown: None }
    }

    /// Runs the cleanup if it has not run yet. Returns whether it ran now.
    pub fn teardown(&mut self) -> bool {
        match self.on_teardown.take() {
            Some(cleanup) => {
                cleanup();
                true
            }
            None => false,
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.on_teardown.is_none()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Waits for the popup flow of `service` to finish.
///
/// Messages for other services are ignored. A dropped sender counts as the
/// popup closing. `poll_interval` is raised to at least one millisecond.
pub async fn await_popup_completion<P>(
    service: &str,
    mut messages: mpsc::Receiver<PopupMessage>,
    popup: &P,
    poll_interval: Duration,
    listener: ListenerHandle,
) -> PopupOutcome
where
    P: PopupProbe + ?Sized,
{
    let mut listener = scopeguard::guard(listener, |mut listener| {
        listener.teardown();
    });

    let mut ticker = tokio::time::interval(poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            biased;
            message = messages.recv() => match message {
                Some(message) if message.service() == service => break PopupOutcome::from(message),
                Some(other) => {
                    debug!(service = other.service(), "Ignoring popup message for another service");
                }
                None => break PopupOutcome::Closed,
            },
            _ = ticker.tick() => {
                if popup.is_closed() {
                    break PopupOutcome::Closed;
                }
            }
        }
    };

    listener.teardown();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn counting_listener() -> (ListenerHandle, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handle = ListenerHandle::new(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handle, count)
    }

    #[test]
    fn test_message_wire_shape() {
        let success = PopupMessage::AuthSuccess {
            service: "google".into(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            serde_json::json!({"type": "auth-success", "service": "google"})
        );

        let error: PopupMessage = serde_json::from_value(serde_json::json!({
            "type": "auth-error",
            "service": "google",
            "message": "denied"
        }))
        .unwrap();
        assert_eq!(
            PopupOutcome::from(error),
            PopupOutcome::Failed {
                message: Some("denied".into())
            }
        );
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let (mut handle, count) = counting_listener();
        assert!(handle.teardown());
        assert!(!handle.teardown());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_message_wins_and_tears_down_once() {
        let (tx, rx) = mpsc::channel(4);
        let (listener, count) = counting_listener();
        let closed = || false;

        tx.send(PopupMessage::AuthSuccess {
            service: "google".into(),
        })
        .await
        .unwrap();

        let outcome =
            await_popup_completion("google", rx, &closed, Duration::from_millis(10), listener)
                .await;

        assert_eq!(outcome, PopupOutcome::Succeeded);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_still_detects_close() {
        let (_tx, rx) = mpsc::channel::<PopupMessage>(4);
        let (listener, count) = counting_listener();
        let closed = || true;

        let outcome = await_popup_completion("google", rx, &closed, Duration::ZERO, listener).await;

        assert_eq!(outcome, PopupOutcome::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_popup_resolves_without_message() {
        let (_tx, rx) = mpsc::channel::<PopupMessage>(4);
        let (listener, count) = counting_listener();
        let closed_flag = Arc::new(AtomicBool::new(false));
        let probe_flag = Arc::clone(&closed_flag);
        let probe = move || probe_flag.load(Ordering::SeqCst);

        let wait = tokio::spawn(async move {
            await_popup_completion("google", rx, &probe, Duration::from_millis(5), listener).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        closed_flag.store(true, Ordering::SeqCst);

        assert_eq!(wait.await.unwrap(), PopupOutcome::Closed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_service_messages_are_ignored() {
        let (tx, rx) = mpsc::channel(4);
        let (listener, _count) = counting_listener();
        let closed = || false;

        tx.send(PopupMessage::AuthSuccess {
            service: "facebook".into(),
        })
        .await
        .unwrap();
        tx.send(PopupMessage::AuthError {
            service: "google".into(),
            message: None,
        })
        .await
        .unwrap();

        let outcome =
            await_popup_completion("google", rx, &closed, Duration::from_secs(60), listener).await;
        assert_eq!(outcome, PopupOutcome::Failed { message: None });
    }

    #[tokio::test]
    async fn test_dropped_wait_still_tears_down() {
        let (_tx, rx) = mpsc::channel::<PopupMessage>(1);
        let (listener, count) = counting_listener();
        let closed = || false;

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            await_popup_completion("google", rx, &closed, Duration::from_secs(60), listener),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
