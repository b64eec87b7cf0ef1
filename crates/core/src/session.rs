//! Session state and the unauthenticated signal.

use tokio::sync::mpsc;

/// Per-user session snapshot.
///
/// `return_url` is captured when a redirect to the identity provider starts
/// and replayed once authentication completes. Only the login flow writes
/// these fields; everything else treats a `Session` as read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub is_authenticated: bool,
    pub return_url: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all session state, back to the anonymous defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Creates the signal/events pair for authentication failures.
///
/// The sender side is handed to the interceptor chain; the single receiver
/// belongs to whichever component reacts to lost sessions. One event is
/// delivered per observed failure.
pub fn unauthenticated_channel() -> (UnauthenticatedSignal, UnauthenticatedEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        UnauthenticatedSignal { tx },
        UnauthenticatedEvents { rx },
    )
}

/// Raised by the response interceptor when a request comes back 401, or 403
/// outside the account probe.
#[derive(Debug, Clone)]
pub struct UnauthenticatedSignal {
    tx: mpsc::UnboundedSender<()>,
}

impl UnauthenticatedSignal {
    pub fn raise(&self) {
        if self.tx.send(()).is_err() {
            tracing::warn!("unauthenticated signal raised with no consumer");
        }
    }
}

/// Receiving half of the unauthenticated channel.
#[derive(Debug)]
pub struct UnauthenticatedEvents {
    rx: mpsc::UnboundedReceiver<()>,
}

impl UnauthenticatedEvents {
    /// Waits for the next authentication failure. `None` once every signal
    /// handle has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }

    /// Non-blocking check, for tests and shutdown paths.
    pub fn try_recv(&mut self) -> Option<()> {
        self.rx.try_recv().ok()
    }

    /// Consumes every queued event, returning how many there were.
    pub fn drain(&mut self) -> usize {
        let mut seen = 0;
        while self.rx.try_recv().is_ok() {
            seen += 1;
        }
        seen
    }
}
