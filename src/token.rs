//! Token records and redacted secret wrappers.

pub mod record;
pub mod secret;

pub use record::*;
pub use secret::*;
