//! CLI command implementations.

pub mod config;
pub mod dump;
pub mod export;
pub mod inspect;
