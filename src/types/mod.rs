//! Shared types for Courier

pub mod error;

pub use error::{CourierError, Result};
