pub use endpoint::*;
pub use error::*;
pub use outlier::*;
pub use pool::*;

mod endpoint;
mod error;
mod outlier;
mod pool;
