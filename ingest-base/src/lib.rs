//! This crate contains the building blocks of the ingester: settings,
//! metrics, resilient chain repositories, provider health checks, the
//! polling engine, handlers and metadata stores.

#![forbid(unsafe_code)]

pub mod settings;

mod agent;
pub use agent::*;

mod chains;
pub use chains::*;

pub mod db;

pub mod handlers;

mod health_check;
pub use health_check::*;

pub mod metrics;
pub use metrics::*;

pub mod polling;

pub mod resilience;

mod server;
pub use server::*;

mod tracker;
pub use tracker::*;
