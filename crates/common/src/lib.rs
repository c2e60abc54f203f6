//! Common types for the key rotation workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::{KEY_HINT_LEN, Secret, key_hint};
