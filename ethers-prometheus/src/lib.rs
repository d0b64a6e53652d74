//! Instrumented RPC clients: request metrics, latency history and an
//! offline marker for every configured endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{categorize::*, health::*, json_rpc_client::*, metrics::*, rest_client::*};

mod categorize;
mod health;
pub mod json_rpc_client;
mod metrics;
mod rest_client;
