//! Transfer planning and execution entry points

mod handler;
mod record;
mod stream;

pub use handler::*;
pub use record::*;
pub use stream::*;
