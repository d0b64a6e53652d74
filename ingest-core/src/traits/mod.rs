pub use handler::*;
pub use metadata::*;
pub use repository::*;
pub use tracker::*;

mod handler;
mod metadata;
mod repository;
mod tracker;
