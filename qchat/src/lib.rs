//! `QChat` message confidentiality pipeline.
//!
//! Outbound text is compressed with a per-message prefix tree, encrypted by
//! a remote oracle under a key negotiated per `(sender, conversation)`
//! pairing, and persisted. Inbound records are decrypted and decoded, with
//! per-record fallback to the stored plaintext.

pub mod gateway;
pub mod keys;
pub mod negotiate;
pub mod pipeline;
pub mod store;
