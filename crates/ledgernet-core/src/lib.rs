//! ledgernet-core — wire format, message catalogue, crypto capability and
//! configuration. All other Ledgernet crates depend on this one.

pub mod config;
pub mod crypto;
pub mod message;
pub mod vote;
pub mod wire;

pub use wire::{Hash, RequestType, WireError, WireMessage};
