//! Configuration parser
//!
//! Turns a configuration file plus `KRAKEND_*` environment overrides into a
//! typed, normalized configuration.

pub mod format;
pub mod loader;
mod store;

pub use format::ConfigFormat;
pub use loader::{Configuration, DEFAULT_DELIMITER, DEFAULT_ENV_PREFIX, Parser, ParserOptions};
