//! Task orchestration core
//!
//! Provides the ordered task queue, the worker pool, multipart coordination,
//! chunksize planning and run outcome counters.

mod chunksize;
mod executor;
mod multipart;
mod queue;
mod results;
mod task;

pub use chunksize::*;
pub use executor::*;
pub use multipart::*;
pub use queue::*;
pub use results::*;
pub use task::*;
