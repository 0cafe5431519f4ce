//! # Stamp Card Server Library
//!
//! HTTP API, CLI, configuration and error types for the festival stamp card
//! server. The binary in `main.rs` is a thin wrapper around [`cli::execute`].

pub mod api;
pub mod cli;
pub mod config;
pub mod error;

pub use config::AppConfig;
pub use error::AppError;
