//! Typed documents for the streams the engine is used with.
//!
//! Each module names its endpoint, builds the placeholder document and
//! deserializes views into its own shape. None of them look at frames.

pub mod conversation;
pub mod diffs;
pub mod execution_processes;
pub mod slash_commands;
