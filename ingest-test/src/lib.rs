//! Mocks of the ingester's traits, for tests.

#![allow(missing_docs)]

pub mod mocks;
pub mod test_utils;
