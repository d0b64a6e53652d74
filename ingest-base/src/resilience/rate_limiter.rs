use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::Deserialize;

use super::duration_ms;

/// Default number of calls allowed per period.
pub const DEFAULT_RATE_LIMIT: u32 = 1000;
/// Default refill period.
pub const DEFAULT_RATE_PERIOD: Duration = Duration::from_secs(60);

/// `limit` calls per `period`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_period", with = "duration_ms", rename = "period_ms")]
    pub period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RATE_LIMIT,
            period: DEFAULT_RATE_PERIOD,
        }
    }
}

fn default_limit() -> u32 {
    DEFAULT_RATE_LIMIT
}

fn default_period() -> Duration {
    DEFAULT_RATE_PERIOD
}

/// A [`governor`] rate limiter allowing `limit` calls per `period`, refilled
/// continuously. Never waits: a call either passes or learns how long until
/// the next one would.
pub struct RateLimiter<C: Clock = DefaultClock> {
    config: RateLimiterConfig,
    clock: C,
    governor: Governor<NotKeyed, InMemoryState, C>,
}

impl RateLimiter {
    /// A limiter with its full burst available.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> Self {
        let governor = Governor::direct_with_clock(quota(&config), &clock);
        Self {
            config,
            clock,
            governor,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Take a permit, or return the time until the next one.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.governor
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl<C: Clock> Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish()
    }
}

/// `limit` permits replenished one every `period / limit`. Settings reject a
/// zero limit or period; the quota still never panics on them.
fn quota(config: &RateLimiterConfig) -> Quota {
    let burst = NonZeroU32::new(config.limit).unwrap_or(NonZeroU32::MIN);
    let replenish = (config.period / burst.get()).max(Duration::from_nanos(1));
    Quota::with_period(replenish)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
