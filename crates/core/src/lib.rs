//! MTE Relay Core Types
//!
//! This crate defines the error taxonomy, domain identifiers and the wire
//! header shared by every MTE Relay client crate.

mod error;
mod header;
mod types;

pub use error::*;
pub use header::*;
pub use types::*;
