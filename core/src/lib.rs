//! Fuse Core Library
//!
//! Core types, traits, and abstractions for the Fuse state subsystem.
//! This crate defines the data model, the backend contracts and the
//! shared error and configuration types.

pub mod types;
pub mod traits;
pub mod error;
pub mod config;

pub use types::*;
pub use traits::*;
pub use error::*;
pub use config::*;
