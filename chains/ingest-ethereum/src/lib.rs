//! EVM chains: heights at a finality level, block headers and logs over
//! Ethereum JSON-RPC, with the finality quirks of individual chains.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{finality::*, repository::*, rpc::*};

mod finality;
mod repository;
mod rpc;

#[cfg(test)]
pub(crate) mod test_utils;
