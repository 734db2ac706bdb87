//! Status output module
//!
//! Serializes user-facing status lines from all workers through one printer
//! thread, with a live progress line on interactive terminals.

mod printer;

pub use printer::*;

#[cfg(test)]
pub(crate) use printer::SharedBuffer;
