//! Cosmos-SDK chains: heights, block headers and contract transactions over
//! Tendermint JSON-RPC.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{repository::*, rpc::*};

mod repository;
mod rpc;
