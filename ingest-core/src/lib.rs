//! This crate contains the domain types, traits and provider pool shared by
//! every part of the ingester.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub use chain::*;
pub use error::*;
pub use traits::*;
pub use types::*;

/// Chain identities
mod chain;
mod error;
/// RPC provider pools and health reports
pub mod rpc_clients;
/// Traits implemented by repositories, stores and handlers
pub mod traits;
/// Data types
pub mod types;
/// Serde helpers
pub mod utils;
