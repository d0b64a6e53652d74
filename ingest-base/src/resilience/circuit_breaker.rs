use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use super::duration_ms;

/// Failures within the interval which open the breaker.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Window in which failures are counted.
pub const DEFAULT_FAILURE_INTERVAL: Duration = Duration::from_secs(60);
/// How long an open breaker rejects calls before letting a probe through.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_interval", with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    #[serde(default = "default_cooldown", with = "duration_ms", rename = "cooldown_ms")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            interval: DEFAULT_FAILURE_INTERVAL,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

fn default_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_interval() -> Duration {
    DEFAULT_FAILURE_INTERVAL
}

fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

/// Observable state of a breaker.
#[derive(Copy, Clone, Debug, Eq, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: VecDeque<Instant> },
    Open { since: Instant },
    HalfOpen { probing: bool },
}

/// Stops calls to a chain after a run of failures.
///
/// `Closed` lets everything through and counts failures in a sliding window.
/// Reaching the threshold opens the breaker; while open every call is
/// rejected. After the cooldown a single probe is let through (`HalfOpen`):
/// its success closes the breaker, its failure opens it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Closed {
                failures: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        match &*self.state.lock() {
            State::Closed { .. } => CircuitState::Closed,
            State::Open { .. } => CircuitState::Open,
            State::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Ask to make a call. `Err` carries the time until a probe may be
    /// attempted.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.acquire().map(|_| ())
    }

    /// Like [`Self::try_acquire`], but the returned permit frees the
    /// half-open slot if it is dropped before an outcome is recorded.
    pub fn permit(&self) -> Result<BreakerPermit<'_>, Duration> {
        let half_open = self.acquire()?;
        Ok(BreakerPermit {
            breaker: self,
            half_open,
            settled: false,
        })
    }

    /// `Ok(true)` when the caller holds the half-open slot.
    fn acquire(&self) -> Result<bool, Duration> {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { .. } => Ok(false),
            State::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.config.cooldown {
                    *state = State::HalfOpen { probing: true };
                    Ok(true)
                } else {
                    Err(self.config.cooldown - elapsed)
                }
            }
            State::HalfOpen { probing } => {
                if *probing {
                    Err(self.config.cooldown)
                } else {
                    *probing = true;
                    Ok(true)
                }
            }
        }
    }

    /// The call succeeded. Returns true when this closed the breaker.
    pub fn record_success(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures } => {
                failures.clear();
                false
            }
            State::HalfOpen { .. } | State::Open { .. } => {
                *state = State::Closed {
                    failures: VecDeque::new(),
                };
                true
            }
        }
    }

    /// The call failed. Returns true when this opened the breaker.
    pub fn record_failure(&self) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures } => {
                while failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > self.config.interval)
                {
                    failures.pop_front();
                }
                failures.push_back(now);
                if failures.len() >= self.config.failure_threshold.max(1) as usize {
                    *state = State::Open { since: now };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { .. } => {
                *state = State::Open { since: now };
                true
            }
            State::Open { .. } => false,
        }
    }

    /// The call ended with an outcome that says nothing about the chain's
    /// health (throttled, transient). Frees the half-open probe slot.
    pub fn release(&self) {
        if let State::HalfOpen { probing } = &mut *self.state.lock() {
            *probing = false;
        }
    }
}

/// A call let through by a [`CircuitBreaker`].
#[must_use]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Returns true when this closed the breaker.
    pub fn success(mut self) -> bool {
        self.settled = true;
        self.breaker.record_success()
    }

    /// Returns true when this opened the breaker.
    pub fn failure(mut self) -> bool {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.half_open && !self.settled {
            self.breaker.release();
        }
    }
}
