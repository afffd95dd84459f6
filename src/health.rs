//! Periodic health checking via `org.freedesktop.DBus.Peer.Ping` (§4.7, C7).

use std::time::Duration;

/// Health check configuration.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// How often a ping is sent while the connection is otherwise idle.
    pub interval: Duration,
    /// Per-check timeout for the ping reply.
    pub check_timeout: Duration,
    /// Consecutive failures that escalate to a forced disconnect.
    pub escalation_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            escalation_threshold: 2,
        }
    }
}

/// Tracks consecutive health check failures against a [`HealthPolicy`].
#[derive(Debug, Default)]
pub struct HealthMonitor {
    consecutive_failures: u32,
}

/// The outcome of recording a health check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// The check succeeded and the connection was already considered
    /// healthy; nothing changes.
    StillHealthy,
    /// The check succeeded after one or more failures; the connection
    /// should transition back to `CONNECTED` and emit `HEALTH_RECOVERED`.
    Recovered,
    /// The check failed, but not enough times yet to escalate.
    Degraded { consecutive_failures: u32 },
    /// The check failed enough consecutive times to force a disconnect.
    Escalate { consecutive_failures: u32 },
}

impl HealthMonitor {
    /// Construct a monitor with no recorded failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful ping.
    pub fn record_success(&mut self) -> HealthOutcome {
        let was_degraded = self.consecutive_failures > 0;
        self.consecutive_failures = 0;
        if was_degraded {
            HealthOutcome::Recovered
        } else {
            HealthOutcome::StillHealthy
        }
    }

    /// Record a failed ping (timeout, error reply, or write failure).
    pub fn record_failure(&mut self, policy: &HealthPolicy) -> HealthOutcome {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= policy.escalation_threshold {
            HealthOutcome::Escalate { consecutive_failures: self.consecutive_failures }
        } else {
            HealthOutcome::Degraded { consecutive_failures: self.consecutive_failures }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_failure_degrades_but_does_not_escalate() {
        let policy = HealthPolicy::default();
        let mut monitor = HealthMonitor::new();
        assert_eq!(monitor.record_failure(&policy), HealthOutcome::Degraded { consecutive_failures: 1 });
    }

    #[test]
    fn two_consecutive_failures_escalate_by_default() {
        let policy = HealthPolicy::default();
        let mut monitor = HealthMonitor::new();
        monitor.record_failure(&policy);
        assert_eq!(
            monitor.record_failure(&policy),
            HealthOutcome::Escalate { consecutive_failures: 2 }
        );
    }

    #[test]
    fn success_after_failure_reports_recovery() {
        let policy = HealthPolicy::default();
        let mut monitor = HealthMonitor::new();
        monitor.record_failure(&policy);
        assert_eq!(monitor.record_success(), HealthOutcome::Recovered);
    }

    #[test]
    fn success_without_prior_failure_is_a_no_op() {
        let mut monitor = HealthMonitor::new();
        assert_eq!(monitor.record_success(), HealthOutcome::StillHealthy);
    }
}
