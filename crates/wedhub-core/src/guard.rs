//! Consecutive-failure guard around gateway calls.
//!
//! Two states only:
//! ```text
//! Closed: failures < threshold, calls go through
//! Open:   failures >= threshold, calls skipped until the cooldown passes
//! ```
//! There is no half-open probe. Once the cooldown has passed every call is
//! let through at full weight, and its outcome moves the counters directly:
//! a success closes the guard, another failure re-arms the cooldown.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Source of "now" so tests can move time by hand
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardConfig {
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

fn default_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

impl GuardConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Closed,
    Open { retry_in: Duration },
}

pub struct FailureGuard {
    failures: u32,
    threshold: u32,
    cooldown: Duration,
    next_attempt_at: Option<Instant>,
    clock: Arc<dyn Clock>,
}

impl FailureGuard {
    pub fn new(config: &GuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            failures: 0,
            // A threshold of 0 would never let anything through
            threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown(),
            next_attempt_at: None,
            clock,
        }
    }

    pub fn can_attempt(&self) -> bool {
        if self.failures < self.threshold {
            return true;
        }
        match self.next_attempt_at {
            Some(at) => self.clock.now() >= at,
            None => true,
        }
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
        self.next_attempt_at = None;
    }

    pub fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.threshold {
            self.next_attempt_at = Some(self.clock.now() + self.cooldown);
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failures
    }

    pub fn state(&self) -> GuardState {
        if self.failures < self.threshold {
            return GuardState::Closed;
        }
        let now = self.clock.now();
        match self.next_attempt_at {
            Some(at) if at > now => GuardState::Open { retry_in: at - now },
            _ => GuardState::Closed,
        }
    }
}

impl std::fmt::Debug for FailureGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureGuard")
            .field("failures", &self.failures)
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("next_attempt_at", &self.next_attempt_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> (FailureGuard, ManualClock) {
        let clock = ManualClock::new();
        let guard = FailureGuard::new(&GuardConfig::default(), Arc::new(clock.clone()));
        (guard, clock)
    }

    #[test]
    fn test_trips_after_three_failures() {
        let (mut guard, _clock) = guard();

        guard.on_failure();
        guard.on_failure();
        assert!(guard.can_attempt());

        guard.on_failure();
        assert!(!guard.can_attempt());
        assert!(matches!(guard.state(), GuardState::Open { .. }));
    }

    #[test]
    fn test_success_resets_count() {
        let (mut guard, _clock) = guard();

        guard.on_failure();
        guard.on_failure();
        guard.on_success();
        assert_eq!(guard.failure_count(), 0);

        guard.on_failure();
        assert!(guard.can_attempt());
        assert_eq!(guard.state(), GuardState::Closed);
    }

    #[test]
    fn test_cooldown_expiry_allows_attempt_without_reset() {
        let (mut guard, clock) = guard();
        for _ in 0..3 {
            guard.on_failure();
        }

        clock.advance(Duration::from_secs(29));
        assert!(!guard.can_attempt());

        clock.advance(Duration::from_secs(1));
        assert!(guard.can_attempt());
        // Counters are untouched; only the clock moved
        assert_eq!(guard.failure_count(), 3);
    }

    #[test]
    fn test_no_half_open_probe_failure_rearms_full_cooldown() {
        let (mut guard, clock) = guard();
        for _ in 0..3 {
            guard.on_failure();
        }
        clock.advance(Duration::from_secs(31));

        // Any number of callers may go through after cooldown, not just one probe
        assert!(guard.can_attempt());
        assert!(guard.can_attempt());

        guard.on_failure();
        assert!(!guard.can_attempt());
        assert_eq!(
            guard.state(),
            GuardState::Open {
                retry_in: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn test_zero_threshold_is_clamped() {
        let config = GuardConfig {
            failure_threshold: 0,
            cooldown_secs: 30,
        };
        let guard = FailureGuard::new(&config, Arc::new(ManualClock::new()));
        assert!(guard.can_attempt());
    }
}
