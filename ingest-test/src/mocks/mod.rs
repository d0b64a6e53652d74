pub use handler::*;
pub use json_rpc::*;
pub use metadata::*;
pub use repository::*;

mod handler;
mod json_rpc;
mod metadata;
mod repository;
