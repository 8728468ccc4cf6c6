//! Shared types, error helpers, and utilities used across all etm crates.

pub mod error;
pub mod identifier;
pub mod time;

pub use {
    error::FromMessage,
    identifier::{ChatIdentifier, IdentifierError, MASTER_CHANNEL_ID},
};
