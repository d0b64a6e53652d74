//! The per-job polling loop.

pub use engine::*;
pub use range::*;

mod engine;
mod eta_calculator;
mod range;
