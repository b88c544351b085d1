//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{expand_path, load_config, Config, ConfigError, API_KEY_ENV, API_URL_ENV};
