//! Bounded condition polling.
//!
//! Every wait in the login flow goes through [`poll_until`] so that a page
//! that never shows up turns into a diagnosable timeout instead of a hang.

use std::time::Duration;

use crate::error::{Error, Result};

/// How often to re-check a condition and how long to keep trying.
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Re-checks `condition` until it holds or `opts.timeout` elapses.
///
/// `what` names the awaited condition and is carried into the timeout error.
pub async fn poll_until<F>(what: &str, opts: PollOptions, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() >= opts.timeout {
            return Err(Error::Timeout {
                what: what.to_string(),
                waited_ms: opts.timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(opts.interval).await;
    }
}
