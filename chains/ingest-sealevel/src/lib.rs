//! Solana: slots, block headers and program transactions over Solana
//! JSON-RPC.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{repository::*, rpc::*};

mod repository;
mod rpc;
