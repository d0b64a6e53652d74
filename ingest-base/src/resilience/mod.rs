//! Per-chain protection of the RPC providers: a token bucket rate limiter and
//! a circuit breaker, applied to every repository call of a chain.

pub use circuit_breaker::*;
pub use rate_limiter::*;
pub use repository::*;

mod circuit_breaker;
mod rate_limiter;
mod repository;

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
