//! Fuse State Management
//!
//! Provides a versioned key-value state store on top of a pluggable backend,
//! with periodic snapshots into a document store, advisory locks and
//! mutation events.
//! Values live under `state:<key>`; snapshots go to the `snapshots` collection.

pub mod events;
pub mod locks;
pub mod memory;
pub mod persistent;
pub mod scheduler;
pub mod snapshot;
pub mod store;


pub use events::*;
pub use locks::*;
pub use memory::*;
pub use persistent::*;
pub use scheduler::*;
pub use snapshot::*;
pub use store::*;
