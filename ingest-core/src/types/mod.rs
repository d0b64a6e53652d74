pub use block::*;
pub use cursor::*;
pub use event::*;
pub use execution::*;
pub use job::*;
pub use record::*;

mod block;
mod cursor;
mod event;
mod execution;
mod job;
mod record;
