//! CLI configuration for the Trinity node binary.

pub mod config;

pub use config::{Config, LogLevel};
