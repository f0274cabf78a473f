//! Three-state circuit breaker guarding outbound calls.
//!
//! One instance protects one resource (the brokerage session channel, the
//! advisor HTTP client). The breaker itself performs no I/O: callers check
//! `can_execute`, run the guarded call, and report the outcome exactly once
//! per attempt via `on_success`/`on_failure`.
//!
//! State transitions follow closed → open → half-open → closed, with any
//! failure in half-open returning immediately to open. Transitions are
//! logged at the transition point only, never per call.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

// =============================================================================
// Configuration
// =============================================================================

/// Thresholds controlling breaker transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing half-open.
    #[serde(with = "secs")]
    pub recovery_timeout: Duration,

    /// Consecutive half-open successes required to close again.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Builder method to set the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Builder method to set the recovery timeout.
    #[must_use]
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    /// Builder method to set the half-open success threshold.
    #[must_use]
    pub fn with_half_open_success_threshold(mut self, threshold: u32) -> Self {
        self.half_open_success_threshold = threshold;
        self
    }
}

// =============================================================================
// State
// =============================================================================

/// Breaker position, reported on the status surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }
}

/// Point-in-time view of a breaker, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
}

// =============================================================================
// Circuit breaker
// =============================================================================

/// Generic fault guard, cheap to share behind an `Arc`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a named breaker with the given configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a guarded call may run right now.
    ///
    /// An open breaker flips to half-open once the recovery timeout has
    /// elapsed, allowing a speculative probe.
    pub fn can_execute(&self) -> bool {
        {
            let inner = self.inner.read();
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => return true,
                BreakerState::Open => {
                    let recovered = inner
                        .last_failure
                        .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                    if !recovered {
                        return false;
                    }
                }
            }
        }

        // Recovery timeout elapsed: move open → half-open under the write lock.
        let mut inner = self.inner.write();
        if inner.state == BreakerState::Open
            && inner
                .last_failure
                .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout)
        {
            inner.state = BreakerState::HalfOpen;
            inner.success_count = 0;
            tracing::info!(breaker = %self.name, "circuit breaker half-open, probing");
        }
        inner.state != BreakerState::Open
    }

    /// Reports a successful guarded call.
    pub fn on_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count = inner.failure_count.saturating_sub(1);
            }
            BreakerState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.half_open_success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    tracing::info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            // No call should have executed while open; nothing to account.
            BreakerState::Open => {}
        }
    }

    /// Reports a failed (or timed-out) guarded call.
    pub fn on_failure(&self) {
        let mut inner = self.inner.write();
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "circuit breaker open"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.success_count = 0;
                tracing::warn!(breaker = %self.name, "circuit breaker reopened from half-open");
            }
            BreakerState::Open => {}
        }
    }

    /// Current state without side effects (does not probe half-open).
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.read().failure_count
    }

    /// Point-in-time view for the status surface.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }

    /// Resets the breaker to closed with cleared counters.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::new();
        tracing::info!(breaker = %self.name, "circuit breaker reset");
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// =============================================================================
// Tests
// =============================================================================
