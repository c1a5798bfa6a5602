//! KrakenD configuration loader
//!
//! Loads a gateway service configuration from a JSON, YAML or TOML file,
//! layers `KRAKEND_*` environment overrides on top, deserializes the result
//! into a typed configuration and normalizes its open-ended `extra_config`
//! maps so they look the same whatever format they came from.
//!
//! ## Pipeline
//!
//! ```text
//! extension → decode into store → env overrides → deserialize → normalize → init
//! ```
//!
//! - `.yml` / `.yaml` files are YAML, `.toml` files are TOML, anything else is JSON
//! - non-string mapping keys (YAML `1: a`, `~: b`) survive decoding and are
//!   stringified only by normalization
//! - `KRAKEND_PORT=8000` overrides `port`; nested keys use the parser's
//!   delimiter (`KRAKEND_EXTRA_CONFIG.FOO=bar` with the default `.`)
//! - every error message starts with the quoted path of the file
//!
//! ## Example
//!
//! ```no_run
//! use krakend_config::{Parser, ServiceConfig};
//!
//! let cfg: ServiceConfig = Parser::new().parse("krakend.json")?;
//! println!("{} endpoints on port {}", cfg.endpoints.len(), cfg.port);
//! # Ok::<(), krakend_config::ParseError>(())
//! ```

pub mod error;
pub mod extra;
pub mod parser;
pub mod service;

// Re-export main types
pub use error::{DecodeError, InitError, ParseError, Result, check_err};
pub use extra::{DeError, ExtraConfig, ExtraValue};
pub use parser::{ConfigFormat, Configuration, Parser, ParserOptions};
pub use service::{BackendConfig, EndpointConfig, ServiceConfig};
