//! Shared data shapes for the `QChat` message pipeline.
//!
//! Holds the pure parts of the pipeline: bit strings, the per-message
//! prefix-tree codec, message records, and the JSON contracts of the
//! encryption oracle and the HTTP API.

pub mod api;
pub mod bits;
pub mod codec;
pub mod message;
pub mod oracle;
