//! MTE Relay Cryptography
//!
//! Engine traits the relay client drives, plus a software engine, X25519 key
//! exchange and the bounded handle pool.

mod engine;
mod keys;
mod pool;
mod software;

pub use engine::*;
pub use keys::*;
pub use pool::*;
pub use software::*;
