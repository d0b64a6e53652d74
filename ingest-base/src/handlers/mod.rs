//! Handlers turn fetched records into normalized events and publish them.
//! Mappers and targets are looked up by name in a [`HandlerRegistry`].

pub use map_and_publish::*;
pub use mappers::*;
pub use registry::*;
pub use targets::*;

mod map_and_publish;
mod mappers;
mod registry;
mod targets;
