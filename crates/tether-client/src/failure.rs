//! Consecutive connection failure bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tether_protocol::TetherError;

/// Consecutive failed connection attempts and the most recent cause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Connection attempts failed in a row without an intervening success
    pub consecutive_failures: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// When the most recent failure happened
    pub last_error_at: Option<DateTime<Utc>>,
}

impl FailureRecord {
    /// Count a failed connection attempt.
    pub(crate) fn record_failure(&mut self, error: &TetherError) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error.to_string());
        self.last_error_at = Some(Utc::now());
    }

    /// A successful connection ends the streak. The last error stays for
    /// diagnostics.
    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Clean slate, used for user-initiated recovery.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Periodic recovery step: one failure forgiven per tick, history kept.
    pub(crate) fn relax(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_sub(1);
    }

    /// Returns `true` once the streak has reached `limit`.
    #[must_use]
    pub fn is_exhausted(&self, limit: u32) -> bool {
        self.consecutive_failures >= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failures_accumulate_and_reset_on_success() {
        let mut record = FailureRecord::default();
        record.record_failure(&TetherError::transport("refused"));
        record.record_failure(&TetherError::transport("refused again"));
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(
            record.last_error.as_deref(),
            Some("Transport error: refused again")
        );
        assert!(record.last_error_at.is_some());

        record.record_success();
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_error.is_some());
    }

    #[test]
    fn test_relax_is_incremental_and_keeps_history() {
        let mut record = FailureRecord::default();
        for _ in 0..3 {
            record.record_failure(&TetherError::transport("refused"));
        }
        record.relax();
        assert_eq!(record.consecutive_failures, 2);
        assert!(record.last_error.is_some());

        record.relax();
        record.relax();
        record.relax();
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut record = FailureRecord::default();
        record.record_failure(&TetherError::transport("refused"));
        assert!(record.is_exhausted(1));
        record.reset();
        assert_eq!(record, FailureRecord::default());
        assert!(!record.is_exhausted(1));
    }
}
