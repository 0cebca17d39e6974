use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::config::CircuitBreakerConfig;

/// Per-adapter reconnect throttle (spec §4.1, §4.9).
///
/// `closed` → normal operation. `open` → consecutive failures crossed the
/// threshold; reconnect attempts are suppressed until the backoff elapses.
/// `half_open` → one probe attempt is allowed through; success closes the
/// breaker, failure reopens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    delay_ms: u64,
}

/// A transition the caller should log/emit as a `relay.circuit_breaker.*`
/// diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let delay_ms = config.backoff_base_ms;
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            delay_ms,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Record a successful connect/send. Closes the breaker if it was
    /// half-open or open, and resets the failure count and backoff delay.
    pub fn record_success(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.delay_ms = self.config.backoff_base_ms;
        if self.state == CircuitState::Closed {
            return None;
        }
        let from = self.state;
        self.state = CircuitState::Closed;
        Some(Transition {
            from,
            to: CircuitState::Closed,
        })
    }

    /// Record a failure. Returns the state transition, if any, so the
    /// caller can emit a diagnostic event.
    pub fn record_failure(&mut self) -> Option<Transition> {
        self.consecutive_failures += 1;

        if self.state == CircuitState::HalfOpen {
            let from = self.state;
            self.state = CircuitState::Open;
            self.delay_ms = (self.delay_ms * 2).min(self.config.backoff_cap_ms);
            return Some(Transition {
                from,
                to: CircuitState::Open,
            });
        }

        if self.state == CircuitState::Closed
            && self.consecutive_failures >= self.config.failure_threshold
        {
            self.state = CircuitState::Open;
            return Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open,
            });
        }

        None
    }

    /// Called by the reconnect loop once the backoff delay has elapsed while
    /// open, to allow exactly one probe attempt through.
    pub fn allow_probe(&mut self) -> Option<Transition> {
        if self.state != CircuitState::Open {
            return None;
        }
        let from = self.state;
        self.state = CircuitState::HalfOpen;
        Some(Transition {
            from,
            to: CircuitState::HalfOpen,
        })
    }

    /// Next backoff delay, including jitter, in milliseconds.
    pub fn next_delay_ms(&mut self) -> u64 {
        let jitter = jitter_ms(self.delay_ms, self.config.jitter_fraction);
        let total = self.delay_ms + jitter;
        self.delay_ms = (self.delay_ms * 2).min(self.config.backoff_cap_ms);
        total
    }
}

/// Jitter offset in `0..=base_ms * fraction`, derived from the current
/// system-clock nanosecond component so no `rand` dependency is needed.
fn jitter_ms(base_ms: u64, fraction: f64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    let max_jitter = ((base_ms as f64) * fraction) as u64;
    if max_jitter == 0 {
        return 0;
    }
    (nanos as u64) % max_jitter
}
