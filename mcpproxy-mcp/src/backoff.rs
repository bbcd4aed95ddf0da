//! Per-upstream reconnect backoff

use rand::Rng;
use std::time::{Duration, Instant};

/// Exponential backoff with jitter, capped. One instance per upstream,
/// reset on a successful connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    failures: u32,
    next_attempt: Option<Instant>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: 0,
            next_attempt: None,
        }
    }

    /// Whether a connect attempt is currently allowed
    pub fn is_due(&self) -> bool {
        match self.next_attempt {
            Some(at) => Instant::now() >= at,
            None => true,
        }
    }

    /// Record a failed attempt and schedule the next one
    pub fn record_failure(&mut self) {
        let exp = self.failures.min(16);
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max);

        // Up to 25% jitter keeps a fleet of upstreams from reconnecting in
        // lockstep.
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4 + 1);
        let delay = base + Duration::from_millis(jitter_ms);

        self.failures = self.failures.saturating_add(1);
        self.next_attempt = Some(Instant::now() + delay);
    }

    /// Reset after a successful connect
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.next_attempt = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_backoff_is_due() {
        let backoff = Backoff::default();
        assert!(backoff.is_due());
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_failure_schedules_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.record_failure();
        assert!(!backoff.is_due());
        assert_eq!(backoff.failures(), 1);
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = Backoff::default();
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_success();
        assert!(backoff.is_due());
        assert_eq!(backoff.failures(), 0);
    }

    #[test]
    fn test_delay_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        for _ in 0..40 {
            backoff.record_failure();
        }
        // Cap plus maximum jitter
        let remaining = backoff
            .next_attempt
            .unwrap()
            .saturating_duration_since(Instant::now());
        assert!(remaining <= Duration::from_secs(75));
    }
}
