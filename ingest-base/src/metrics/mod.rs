//! Useful metrics that all ingester components should use.

pub use self::core::*;

/// The metrics namespace prefix. All metric names will start with `{NAMESPACE}_`.
pub const NAMESPACE: &str = "ingest";

mod core;
