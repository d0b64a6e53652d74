use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Default per-request timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// One configured RPC endpoint. Immutable after load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEndpoint {
    pub url: Url,
    /// Relative preference before the first health check has run
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Per-request timeout
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,
    /// Number of additional providers tried when a request fails with a
    /// retryable error
    #[serde(default)]
    pub retries: u32,
}

impl RpcEndpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            weight: default_weight(),
            timeout: default_timeout(),
            retries: 0,
        }
    }

    /// Host and port of the endpoint, safe to put in logs and metric labels
    /// (no path or credentials).
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or("unknown");
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }
}

fn default_weight() -> u32 {
    1
}

fn default_timeout() -> Duration {
    DEFAULT_RPC_TIMEOUT
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
