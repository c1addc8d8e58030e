//! Fuse node
//!
//! Opens the embedded store under a data directory, loads existing state and
//! keeps the periodic snapshot timer running until shutdown.

mod command;
mod node;

pub use command::*;
pub use node::*;
