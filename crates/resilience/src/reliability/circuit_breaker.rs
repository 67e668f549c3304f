//! Count-based circuit breaker
//!
//! One [`CircuitBreaker`] exists per upstream endpoint name. Its state lives in
//! an immutable snapshot behind an [`ArcSwap`]; every transition builds the next
//! snapshot and installs it with compare-and-swap, so concurrent callers never
//! observe a half-applied window or a torn state.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConfigError;
use crate::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure or slow-call threshold exceeded - all calls rejected
    Open,

    /// Testing if service recovered - limited trial calls allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure/slow rate  ┌─────────┐  wait duration  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                               ▲        any failure        │
///      │                               └────────────────────────────┤
///      │              all trial calls succeed                       │
///      └────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use phonebill_resilience::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_sliding_window_size(20)
///     .with_wait_duration_in_open_state(Duration::from_secs(30));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (0.0-1.0] at or above which the circuit opens
    pub failure_rate_threshold: f64,

    /// Slow-call ratio (0.0-1.0] at or above which the circuit opens
    pub slow_call_rate_threshold: f64,

    /// Calls taking at least this long count as slow
    #[serde(with = "duration_millis")]
    pub slow_call_duration_threshold: Duration,

    /// Number of most recent outcomes kept in the sliding window
    pub sliding_window_size: usize,

    /// Outcomes required before rates are evaluated
    pub minimum_number_of_calls: usize,

    /// Trial calls admitted while half-open
    pub permitted_calls_in_half_open_state: u32,

    /// Time to stay open before admitting trial calls
    #[serde(with = "duration_millis")]
    pub wait_duration_in_open_state: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            slow_call_rate_threshold: 0.5,
            slow_call_duration_threshold: Duration::from_secs(10),
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
            permitted_calls_in_half_open_state: 3,
            wait_duration_in_open_state: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure rate threshold
    pub fn with_failure_rate_threshold(mut self, rate: f64) -> Self {
        self.failure_rate_threshold = rate;
        self
    }

    /// Set the slow call rate threshold
    pub fn with_slow_call_rate_threshold(mut self, rate: f64) -> Self {
        self.slow_call_rate_threshold = rate;
        self
    }

    /// Set the duration above which a call counts as slow
    pub fn with_slow_call_duration_threshold(mut self, duration: Duration) -> Self {
        self.slow_call_duration_threshold = duration;
        self
    }

    /// Set the sliding window size
    pub fn with_sliding_window_size(mut self, size: usize) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Set the minimum number of calls before rates are evaluated
    pub fn with_minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.minimum_number_of_calls = calls;
        self
    }

    /// Set the number of trial calls permitted while half-open
    pub fn with_permitted_calls_in_half_open_state(mut self, permits: u32) -> Self {
        self.permitted_calls_in_half_open_state = permits;
        self
    }

    /// Set how long the circuit stays open
    pub fn with_wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open_state = wait;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("failure_rate_threshold", self.failure_rate_threshold)?;
        check_rate("slow_call_rate_threshold", self.slow_call_rate_threshold)?;
        if self.sliding_window_size == 0 {
            return Err(ConfigError::invalid(
                "sliding_window_size",
                "must be at least 1",
            ));
        }
        if self.minimum_number_of_calls == 0
            || self.minimum_number_of_calls > self.sliding_window_size
        {
            return Err(ConfigError::invalid(
                "minimum_number_of_calls",
                format!("must be between 1 and {}", self.sliding_window_size),
            ));
        }
        if self.permitted_calls_in_half_open_state == 0 {
            return Err(ConfigError::invalid(
                "permitted_calls_in_half_open_state",
                "must be at least 1",
            ));
        }
        if self.slow_call_duration_threshold.is_zero() {
            return Err(ConfigError::invalid(
                "slow_call_duration_threshold",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn check_rate(field: &'static str, rate: f64) -> Result<(), ConfigError> {
    if rate.is_nan() || rate <= 0.0 || rate > 1.0 {
        return Err(ConfigError::invalid(field, format!("{rate} is outside (0, 1]")));
    }
    Ok(())
}

/// Error types for circuit breaker admission
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// Circuit is open, calls are not allowed
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// Circuit is half-open and every trial permit is in use
    #[error("circuit breaker '{name}' half-open, no permits available")]
    HalfOpenExhausted { name: String },
}

/// Result of a single guarded call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub duration_ms: u64,
    pub slow: bool,
}

impl CallOutcome {
    /// Build an outcome, classifying it as slow against `slow_threshold`
    pub fn new(success: bool, duration: Duration, slow_threshold: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            success,
            duration_ms: duration.as_millis() as u64,
            slow: duration >= slow_threshold,
        }
    }
}

/// Fixed-size ring of recent outcomes with running counters
///
/// Only the failed and slow flags are kept, packed one bit per slot, so the
/// per-record snapshot copy is `capacity / 64` words: a single word for
/// windows up to 64 calls.
#[derive(Debug, Clone)]
struct SlidingWindow {
    failed_bits: Vec<u64>,
    slow_bits: Vec<u64>,
    head: usize,
    len: usize,
    capacity: usize,
    failures: usize,
    slow: usize,
}

impl SlidingWindow {
    fn new(capacity: usize) -> Self {
        let words = capacity.div_ceil(64);
        Self {
            failed_bits: vec![0; words],
            slow_bits: vec![0; words],
            head: 0,
            len: 0,
            capacity,
            failures: 0,
            slow: 0,
        }
    }

    fn push(&mut self, outcome: &CallOutcome) {
        let slot = self.head;
        if self.len == self.capacity {
            if bit(&self.failed_bits, slot) {
                self.failures -= 1;
            }
            if bit(&self.slow_bits, slot) {
                self.slow -= 1;
            }
        } else {
            self.len += 1;
        }

        set_bit(&mut self.failed_bits, slot, !outcome.success);
        set_bit(&mut self.slow_bits, slot, outcome.slow);
        if !outcome.success {
            self.failures += 1;
        }
        if outcome.slow {
            self.slow += 1;
        }
        self.head = (slot + 1) % self.capacity;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn failure_rate(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.failures as f64 / self.len as f64
    }

    fn slow_call_rate(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.slow as f64 / self.len as f64
    }
}

fn bit(bits: &[u64], slot: usize) -> bool {
    bits[slot / 64] & (1 << (slot % 64)) != 0
}

fn set_bit(bits: &mut [u64], slot: usize, value: bool) {
    let mask = 1u64 << (slot % 64);
    if value {
        bits[slot / 64] |= mask;
    } else {
        bits[slot / 64] &= !mask;
    }
}

/// Immutable view of breaker state; replaced wholesale on every change
#[derive(Debug, Clone)]
struct Snapshot {
    state: CircuitState,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    half_open_permits_remaining: u32,
    half_open_successes: u32,
    /// Bumped on every state transition so late outcomes from an earlier
    /// state are not applied to the current one
    generation: u64,
}

impl Snapshot {
    fn closed(capacity: usize, generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            window: SlidingWindow::new(capacity),
            opened_at: None,
            opened_at_wall: None,
            half_open_permits_remaining: 0,
            half_open_successes: 0,
            generation,
        }
    }

    fn opened(&self, now: Instant) -> Self {
        Self {
            state: CircuitState::Open,
            window: SlidingWindow::new(self.window.capacity),
            opened_at: Some(now),
            opened_at_wall: Some(Utc::now()),
            half_open_permits_remaining: 0,
            half_open_successes: 0,
            generation: self.generation + 1,
        }
    }

    fn half_opened(&self, permits: u32) -> Self {
        Self {
            state: CircuitState::HalfOpen,
            window: SlidingWindow::new(self.window.capacity),
            opened_at: self.opened_at,
            opened_at_wall: self.opened_at_wall,
            half_open_permits_remaining: permits,
            half_open_successes: 0,
            generation: self.generation + 1,
        }
    }
}

/// Point-in-time metrics for a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub failure_rate: f64,
    pub slow_call_rate: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_permits_remaining: u32,
}

/// Permit that must be held during a protected call
///
/// Dropping a permit without recording an outcome hands a half-open trial
/// slot back to the breaker.
#[must_use = "record the call outcome on the permit"]
pub struct CircuitBreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    recorded: bool,
}

impl<'a> CircuitBreakerPermit<'a> {
    /// Report the call outcome and its duration
    pub fn record(mut self, success: bool, duration: Duration) -> CircuitState {
        self.recorded = true;
        let outcome = CallOutcome::new(
            success,
            duration,
            self.breaker.config.slow_call_duration_threshold,
        );
        self.breaker.apply(Some(self.generation), outcome)
    }

    /// Report the call succeeded
    pub fn success(self, duration: Duration) -> CircuitState {
        self.record(true, duration)
    }

    /// Report the call failed
    pub fn failure(self, duration: Duration) -> CircuitState {
        self.record(false, duration)
    }
}

impl Drop for CircuitBreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded {
            self.breaker.release(self.generation);
        }
    }
}

/// Call-admission state machine for one upstream endpoint
///
/// # Example
///
/// ```ignore
/// use phonebill_resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
///
/// let breaker = CircuitBreaker::new("kos-bill-inquiry", CircuitBreakerConfig::default());
///
/// match breaker.allow() {
///     Ok(permit) => {
///         let started = Instant::now();
///         let result = call_upstream().await;
///         permit.record(result.is_ok(), started.elapsed());
///     }
///     Err(CircuitBreakerError::Open { .. }) => {
///         // Circuit is open, fail fast
///     }
///     Err(e) => return Err(e.into()),
/// }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: ArcSwap<Snapshot>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let capacity = config.sliding_window_size.max(1);
        Self {
            name: name.into(),
            config,
            state: ArcSwap::from_pointee(Snapshot::closed(capacity, 0)),
        }
    }

    /// Get the breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    ///
    /// An open breaker whose wait duration has elapsed still reports `Open`
    /// until the next [`allow`](Self::allow) performs the transition.
    pub fn state(&self) -> CircuitState {
        self.state.load().state
    }

    /// Check if a call should be allowed
    ///
    /// Returns a permit that must be used to report the outcome.
    pub fn allow(&self) -> Result<CircuitBreakerPermit<'_>, CircuitBreakerError> {
        loop {
            let current = self.state.load();
            let next = match current.state {
                CircuitState::Closed => {
                    return Ok(self.permit(current.generation));
                }
                CircuitState::Open => {
                    let waited = current
                        .opened_at
                        .map(|opened| opened.elapsed())
                        .unwrap_or(Duration::MAX);
                    if waited < self.config.wait_duration_in_open_state {
                        return Err(CircuitBreakerError::Open {
                            name: self.name.clone(),
                        });
                    }
                    let mut next =
                        current.half_opened(self.config.permitted_calls_in_half_open_state);
                    next.half_open_permits_remaining -= 1;
                    next
                }
                CircuitState::HalfOpen => {
                    if current.half_open_permits_remaining == 0 {
                        return Err(CircuitBreakerError::HalfOpenExhausted {
                            name: self.name.clone(),
                        });
                    }
                    let mut next = Snapshot::clone(&current);
                    next.half_open_permits_remaining -= 1;
                    next
                }
            };

            let generation = next.generation;
            let entered_half_open = current.state == CircuitState::Open;
            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if std::ptr::eq(&**previous, &**current) {
                if entered_half_open {
                    info!(
                        breaker = %self.name,
                        permits = self.config.permitted_calls_in_half_open_state,
                        "circuit breaker half-open, admitting trial calls"
                    );
                }
                return Ok(self.permit(generation));
            }
        }
    }

    /// Record an outcome against the current state
    ///
    /// Prefer [`CircuitBreakerPermit::record`], which ignores outcomes of
    /// calls admitted before the latest transition.
    pub fn record_outcome(&self, outcome: CallOutcome) -> CircuitState {
        self.apply(None, outcome)
    }

    /// Snapshot of current metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let snapshot = self.state.load();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: snapshot.state,
            buffered_calls: snapshot.window.len(),
            failed_calls: snapshot.window.failures,
            slow_calls: snapshot.window.slow,
            failure_rate: snapshot.window.failure_rate(),
            slow_call_rate: snapshot.window.slow_call_rate(),
            opened_at: snapshot.opened_at_wall,
            half_open_permits_remaining: snapshot.half_open_permits_remaining,
        }
    }

    /// Force the breaker back to closed with an empty window
    pub fn reset(&self) {
        let current = self.state.load();
        self.state.store(Arc::new(Snapshot::closed(
            current.window.capacity,
            current.generation + 1,
        )));
        info!(breaker = %self.name, "circuit breaker reset");
    }

    fn permit(&self, generation: u64) -> CircuitBreakerPermit<'_> {
        CircuitBreakerPermit {
            breaker: self,
            generation,
            recorded: false,
        }
    }

    fn apply(&self, generation: Option<u64>, outcome: CallOutcome) -> CircuitState {
        loop {
            let current = self.state.load();
            let mut observed = (0.0, 0.0);
            if generation.is_some_and(|g| g != current.generation) {
                debug!(
                    breaker = %self.name,
                    state = %current.state,
                    "ignoring outcome of call admitted before last transition"
                );
                return current.state;
            }

            let next = match current.state {
                CircuitState::Closed => {
                    let mut next = Snapshot::clone(&current);
                    next.window.push(&outcome);
                    observed = (next.window.failure_rate(), next.window.slow_call_rate());
                    if self.should_open(&next.window) {
                        next.opened(Instant::now())
                    } else {
                        next
                    }
                }
                CircuitState::HalfOpen => {
                    if !outcome.success {
                        current.opened(Instant::now())
                    } else {
                        let mut next = Snapshot::clone(&current);
                        next.half_open_successes += 1;
                        if next.half_open_successes >= self.config.permitted_calls_in_half_open_state
                        {
                            Snapshot::closed(next.window.capacity, next.generation + 1)
                        } else {
                            next
                        }
                    }
                }
                CircuitState::Open => return CircuitState::Open,
            };

            let from = current.state;
            let to = next.state;
            let (failure_rate, slow_call_rate) = observed;
            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if std::ptr::eq(&**previous, &**current) {
                if from != to {
                    self.log_transition(from, to, failure_rate, slow_call_rate);
                } else {
                    debug!(
                        breaker = %self.name,
                        state = %to,
                        success = outcome.success,
                        duration_ms = outcome.duration_ms,
                        failure_rate,
                        slow_call_rate,
                        "recorded call outcome"
                    );
                }
                return to;
            }
        }
    }

    fn release(&self, generation: u64) {
        loop {
            let current = self.state.load();
            if current.generation != generation || current.state != CircuitState::HalfOpen {
                return;
            }
            let mut next = Snapshot::clone(&current);
            next.half_open_permits_remaining = (next.half_open_permits_remaining + 1)
                .min(self.config.permitted_calls_in_half_open_state);
            let previous = self.state.compare_and_swap(&current, Arc::new(next));
            if std::ptr::eq(&**previous, &**current) {
                return;
            }
        }
    }

    fn should_open(&self, window: &SlidingWindow) -> bool {
        window.len() >= self.config.minimum_number_of_calls
            && (window.failure_rate() >= self.config.failure_rate_threshold
                || window.slow_call_rate() >= self.config.slow_call_rate_threshold)
    }

    fn log_transition(
        &self,
        from: CircuitState,
        to: CircuitState,
        failure_rate: f64,
        slow_call_rate: f64,
    ) {
        match to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                %from,
                failure_rate,
                slow_call_rate,
                wait_ms = self.config.wait_duration_in_open_state.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => info!(breaker = %self.name, %from, %to, "circuit breaker transitioned"),
        }
    }
}
