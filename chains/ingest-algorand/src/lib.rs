//! Algorand: rounds from algod, block headers and application transactions
//! from the indexer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use self::{repository::*, rest::*};

mod repository;
mod rest;
