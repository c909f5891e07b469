//! Per-host circuit breaking for the outbound client.
//!
//! A host that keeps timing out gets a cooldown window during which calls
//! fail fast instead of burning the retry budget. After the window one
//! probe call is admitted; its outcome decides whether the circuit closes
//! or reopens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

enum HostState {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// How [`CircuitRegistry::admit`] let a call through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed; the call carries no special role.
    Normal,
    /// The cooldown elapsed and this call is the single probe whose
    /// outcome decides the circuit.
    Probe,
}

pub struct CircuitRegistry {
    threshold: u32,
    cooldown: Duration,
    hosts: Mutex<HashMap<String, HostState>>,
}

impl CircuitRegistry {
    #[must_use]
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a call to `host` may proceed.
    ///
    /// `Err(retry_in)` means the circuit is open (or a half-open probe is
    /// already in flight) and the call must fail fast. A probe admission
    /// must end in [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`withdraw`](Self::withdraw), or the circuit stays half-open for
    /// good.
    pub fn admit(&self, host: &str) -> Result<Admission, Duration> {
        let Ok(mut hosts) = self.hosts.lock() else {
            return Ok(Admission::Normal);
        };
        let state = hosts
            .entry(host.to_string())
            .or_insert(HostState::Closed {
                consecutive_failures: 0,
            });

        match state {
            HostState::Closed { .. } => Ok(Admission::Normal),
            HostState::Open { until } => {
                let now = Instant::now();
                if now >= *until {
                    tracing::info!(host, "circuit cooldown elapsed, admitting probe");
                    *state = HostState::HalfOpen;
                    Ok(Admission::Probe)
                } else {
                    Err(*until - now)
                }
            }
            HostState::HalfOpen => Err(self.cooldown),
        }
    }

    /// An admitted call was shed by a local policy before it reached the
    /// wire. A probe slot goes back as an already-elapsed window so the
    /// next caller can take it; a normal admission has nothing to undo.
    pub fn withdraw(&self, host: &str, admission: Admission) {
        if admission != Admission::Probe {
            return;
        }
        let Ok(mut hosts) = self.hosts.lock() else {
            return;
        };
        if let Some(state) = hosts.get_mut(host)
            && matches!(state, HostState::HalfOpen)
        {
            tracing::debug!(host, "probe withdrawn before send");
            *state = HostState::Open {
                until: Instant::now(),
            };
        }
    }

    /// A logical call to `host` completed. Closes the circuit and clears
    /// the failure streak.
    pub fn record_success(&self, host: &str) {
        let Ok(mut hosts) = self.hosts.lock() else {
            return;
        };
        if let Some(state) = hosts.get_mut(host) {
            if matches!(state, HostState::HalfOpen | HostState::Open { .. }) {
                tracing::info!(host, "circuit closed");
            }
            *state = HostState::Closed {
                consecutive_failures: 0,
            };
        }
    }

    /// A logical call to `host` failed after exhausting its retries.
    pub fn record_failure(&self, host: &str) {
        let Ok(mut hosts) = self.hosts.lock() else {
            return;
        };
        let state = hosts
            .entry(host.to_string())
            .or_insert(HostState::Closed {
                consecutive_failures: 0,
            });

        match state {
            HostState::Closed {
                consecutive_failures,
            } => {
                *consecutive_failures += 1;
                if *consecutive_failures >= self.threshold {
                    tracing::warn!(
                        host,
                        failures = *consecutive_failures,
                        cooldown_secs = self.cooldown.as_secs(),
                        "circuit opened"
                    );
                    *state = HostState::Open {
                        until: Instant::now() + self.cooldown,
                    };
                }
            }
            HostState::HalfOpen => {
                tracing::warn!(host, "probe failed, circuit reopened");
                *state = HostState::Open {
                    until: Instant::now() + self.cooldown,
                };
            }
            // A straggler from before the circuit opened; the window stands.
            HostState::Open { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_circuit_admits() {
        let registry = CircuitRegistry::new(3, Duration::from_secs(30));
        assert_eq!(registry.admit("api.example.org"), Ok(Admission::Normal));
    }

    #[test]
    fn opens_after_threshold_failures() {
        let registry = CircuitRegistry::new(2, Duration::from_secs(30));
        registry.record_failure("api.example.org");
        assert!(registry.admit("api.example.org").is_ok());
        registry.record_failure("api.example.org");

        let err = registry.admit("api.example.org").unwrap_err();
        assert!(err <= Duration::from_secs(30));
    }

    #[test]
    fn hosts_are_independent() {
        let registry = CircuitRegistry::new(1, Duration::from_secs(30));
        registry.record_failure("down.example.org");
        assert!(registry.admit("down.example.org").is_err());
        assert!(registry.admit("up.example.org").is_ok());
    }

    #[test]
    fn success_resets_failure_streak() {
        let registry = CircuitRegistry::new(2, Duration::from_secs(30));
        registry.record_failure("api.example.org");
        registry.record_success("api.example.org");
        registry.record_failure("api.example.org");
        assert!(registry.admit("api.example.org").is_ok());
    }

    #[test]
    fn elapsed_cooldown_admits_single_probe() {
        // Zero cooldown lapses immediately.
        let registry = CircuitRegistry::new(1, Duration::ZERO);
        registry.record_failure("api.example.org");

        assert_eq!(registry.admit("api.example.org"), Ok(Admission::Probe));
        // Probe in flight: the next caller still fails fast.
        assert!(registry.admit("api.example.org").is_err());
    }

    #[test]
    fn withdrawn_probe_slot_goes_to_the_next_caller() {
        let registry = CircuitRegistry::new(1, Duration::ZERO);
        registry.record_failure("api.example.org");

        let admission = registry.admit("api.example.org").unwrap();
        assert_eq!(admission, Admission::Probe);
        assert!(registry.admit("api.example.org").is_err());

        registry.withdraw("api.example.org", admission);
        assert_eq!(registry.admit("api.example.org"), Ok(Admission::Probe));
    }

    #[test]
    fn withdraw_does_not_reopen_a_circuit_closed_meanwhile() {
        let registry = CircuitRegistry::new(1, Duration::ZERO);
        registry.record_failure("api.example.org");
        let admission = registry.admit("api.example.org").unwrap();

        // A straggler success landed while the probe was parked.
        registry.record_success("api.example.org");
        registry.withdraw("api.example.org", admission);
        assert_eq!(registry.admit("api.example.org"), Ok(Admission::Normal));
    }

    #[test]
    fn probe_success_closes_circuit() {
        let registry = CircuitRegistry::new(1, Duration::ZERO);
        registry.record_failure("api.example.org");
        assert!(registry.admit("api.example.org").is_ok());

        registry.record_success("api.example.org");
        assert!(registry.admit("api.example.org").is_ok());
        assert!(registry.admit("api.example.org").is_ok());
    }

    #[test]
    fn probe_failure_reopens_circuit() {
        let registry = CircuitRegistry::new(1, Duration::ZERO);
        registry.record_failure("api.example.org");
        assert!(registry.admit("api.example.org").is_ok());

        registry.record_failure("api.example.org");
        // Reopened with a fresh (zero) cooldown: the next admit is a probe
        // again, and the one after it fails fast behind that probe.
        assert!(registry.admit("api.example.org").is_ok());
        assert!(registry.admit("api.example.org").is_err());
    }
}
