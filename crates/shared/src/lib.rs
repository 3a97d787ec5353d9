//! Shared types for the calibra realtime feed: wire protocol, models and errors.

pub mod models;
pub mod protocol;
pub mod error;

pub use models::*;
pub use protocol::*;
pub use error::*;
