//! tl-core: shared types, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other tl-* crates,
//! providing the channel identity type, a unified error type, application
//! configuration, and a broadcast event bus for session lifecycle events.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::ChannelNumber;
