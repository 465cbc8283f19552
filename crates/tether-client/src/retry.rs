//! Caller-side retry for connection attempts.
//!
//! The manager makes each attempt safe and idempotent but never loops on its
//! own; callers that want backoff wrap `connect` with [`connect_with_retry`].

use std::time::Duration;

use tether_protocol::{TetherError, TetherResult};
use tracing::{debug, warn};

use crate::manager::ConnectionManager;
use crate::request::ConnectionRequest;

/// Backoff policy between connection attempts
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Fixed interval between retries
    Fixed {
        /// Time between attempts
        interval: Duration,
        /// Maximum number of retries (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Exponential backoff with jitter
    Exponential {
        /// Delay before the first retry
        base: Duration,
        /// Upper bound on any single delay
        max_delay: Duration,
        /// Maximum number of retries (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Never retry
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based), or `None` when the
    /// policy gives up.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed {
                interval,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                Some(*interval)
            }
            Self::Exponential {
                base,
                max_delay,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                let factor = 2u64.saturating_pow(attempt);
                let capped = (base.as_millis() as u64)
                    .saturating_mul(factor)
                    .min(max_delay.as_millis() as u64);
                // ±25% jitter
                let jitter_range = capped / 4;
                let offset = if jitter_range > 0 {
                    fastrand::u64(0..=jitter_range * 2)
                } else {
                    0
                };
                Some(Duration::from_millis(
                    capped.saturating_sub(jitter_range).saturating_add(offset),
                ))
            }
            Self::Never => None,
        }
    }
}

/// Whether a failed `connect` is worth another attempt.
fn should_retry(error: &TetherError) -> bool {
    match error {
        TetherError::RetryBudgetExhausted { .. } | TetherError::Superseded => false,
        other => other.kind().is_retryable(),
    }
}

/// Calls [`ConnectionManager::connect`] until it succeeds or `policy` gives up.
///
/// Configuration errors, an exhausted failure budget and superseded attempts
/// are returned immediately.
pub async fn connect_with_retry(
    manager: &ConnectionManager,
    request: ConnectionRequest,
    policy: &RetryPolicy,
) -> TetherResult<()> {
    let mut attempt = 0;
    loop {
        match manager.connect(request.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => match policy.delay(attempt) {
                Some(delay) => {
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connection attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    debug!(attempts = attempt + 1, "Retry policy exhausted");
                    return Err(e);
                }
            },
        }
    }
}
