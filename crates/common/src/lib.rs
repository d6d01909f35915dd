//! Common utilities and types shared across custody crates.

pub mod crc32;
pub mod error;
pub mod hash;
pub mod timestamp;

pub use error::{Error, Result};
pub use hash::DigestValue;
pub use timestamp::Timestamp;
