//! Retry policy for [`Session::invoke`](crate::Session::invoke): flood waits
//! and transient failures.

use std::time::Duration;

use crate::errors::InvocationError;

/// Default number of retries for [`InvokeOptions::retries`].
pub const MAX_RETRIES: u32 = 10;
/// Default response wait window.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default longest flood wait slept through automatically.
pub const SLEEP_THRESHOLD: Duration = Duration::from_secs(10);
/// Default pause before retrying a transient failure.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Per-call knobs for [`Session::invoke_with`](crate::Session::invoke_with).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InvokeOptions {
    /// Attempts per call. Every send that fails transiently uses one; flood
    /// waits that are slept through do not.
    pub retries: u32,
    /// How long to wait for each response.
    pub timeout: Duration,
    /// Flood waits up to this long are slept through; longer ones are
    /// returned to the caller.
    pub sleep_threshold: Duration,
    /// Pause between transient-failure retries.
    pub retry_delay: Duration,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            retries:         MAX_RETRIES,
            timeout:         WAIT_TIMEOUT,
            sleep_threshold: SLEEP_THRESHOLD,
            retry_delay:     RETRY_DELAY,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetryAction {
    /// Sleep, then retry without spending an attempt.
    FloodWait(Duration),
    /// Sleep, then retry, spending one attempt.
    Retry(Duration),
    /// Give the error to the caller.
    Fail,
}

impl InvokeOptions {
    /// Classify `error` under these options.
    pub fn classify(&self, error: &InvocationError) -> RetryAction {
        if let Some(secs) = error.flood_wait_seconds() {
            return if secs > self.sleep_threshold.as_secs() {
                RetryAction::Fail
            } else {
                RetryAction::FloodWait(Duration::from_secs(secs))
            };
        }
        if error.is_transient() {
            RetryAction::Retry(self.retry_delay)
        } else {
            RetryAction::Fail
        }
    }
}
