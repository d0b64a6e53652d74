//! Near: blocks, chunks and receiver-filtered transactions over Near
//! JSON-RPC.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{repository::*, rpc::*};

mod repository;
mod rpc;
