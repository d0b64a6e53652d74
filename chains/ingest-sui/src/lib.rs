//! Sui: checkpoints and transaction blocks over Sui JSON-RPC.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{repository::*, rpc::*};

mod repository;
mod rpc;
