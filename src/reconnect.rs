//! Exponential backoff for auto-reconnect (§3.7, §4.7, C7).

use std::time::Duration;

/// Backoff configuration. `max_attempts = 0` means unlimited.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// The delay before the `attempt`-th retry (0-indexed): `min(initial *
    /// multiplier^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled).min(self.max_delay)
    }
}

/// Tracks reconnect attempts against a [`ReconnectPolicy`].
#[derive(Debug)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempt: u32,
}

/// What the caller should do next after a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then retry. Carries the 1-indexed attempt number.
    RetryAfter { attempt: u32, delay: Duration },
    /// Every configured attempt has been exhausted.
    Exhausted { attempts: u32 },
}

impl ReconnectState {
    /// Construct a fresh state for `policy`.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failed bring-up attempt and decide what to do next.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.policy.max_attempts != 0 && self.attempt >= self.policy.max_attempts {
            return ReconnectDecision::Exhausted { attempts: self.attempt };
        }

        let delay = self.policy.delay_for(self.attempt);
        self.attempt += 1;
        ReconnectDecision::RetryAfter { attempt: self.attempt, delay }
    }

    /// Reset the attempt counter, e.g. after a successful reconnect or an
    /// explicit `reset_reconnect_state()` call from the user.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The number of attempts made since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_law_example() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            max_attempts: 5,
        };
        let mut state = ReconnectState::new(policy);

        let expected = [1, 2, 4, 8, 16];
        for expected_delay in expected {
            match state.on_failure() {
                ReconnectDecision::RetryAfter { delay, .. } => {
                    assert_eq!(delay, Duration::from_secs(expected_delay));
                }
                ReconnectDecision::Exhausted { .. } => panic!("expected a retry"),
            }
        }

        match state.on_failure() {
            ReconnectDecision::Exhausted { attempts } => assert_eq!(attempts, 5),
            ReconnectDecision::RetryAfter { .. } => panic!("expected exhaustion on the 6th failure"),
        }
    }

    #[test]
    fn delay_caps_at_max_delay() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 10.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 0,
        };
        let mut state = ReconnectState::new(policy);
        for _ in 0..5 {
            match state.on_failure() {
                ReconnectDecision::RetryAfter { delay, .. } => assert!(delay <= Duration::from_secs(5)),
                ReconnectDecision::Exhausted { .. } => panic!("unlimited attempts should never exhaust"),
            }
        }
    }

    #[test]
    fn reset_clears_attempt_counter() {
        let mut state = ReconnectState::new(ReconnectPolicy::default());
        state.on_failure();
        state.on_failure();
        assert_eq!(state.attempts(), 2);
        state.reset();
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let policy = ReconnectPolicy { max_attempts: 0, ..ReconnectPolicy::default() };
        let mut state = ReconnectState::new(policy);
        for _ in 0..100 {
            assert!(matches!(state.on_failure(), ReconnectDecision::RetryAfter { .. }));
        }
    }
}
