//! `QChat` server library.
//!
//! Exposes the configuration layer and the HTTP routes for use in tests and
//! embedding. The routes front a [`qchat::pipeline::MessagePipeline`] wired
//! to the HTTP encryption oracle.

pub mod config;
pub mod server;
