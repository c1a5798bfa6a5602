//! Configuration loader with layered sources
//!
//! Loads a service configuration in one linear pass:
//! 1. Configuration file (JSON, YAML or TOML, picked by extension), decoded
//!    into a generic store that keeps mapping keys as the decoder saw them
//! 2. Environment variables (KRAKEND_*) set on top of the file values
//! 3. Deserialization into the typed configuration
//! 4. Normalization of every extra config map
//! 5. The configuration's own `init` hook (skipped by the `*_without_init`
//!    variants)

use crate::error::{InitError, ParseError, Result, check_err};
use crate::extra::{ExtraConfig, ExtraValue, normalize_extra_config};
use crate::parser::format::ConfigFormat;
use crate::parser::store::Store;
use config::{Environment, Map, Source};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::{fs, io};
use tracing::{debug, info, warn};

/// Prefix of the environment variables overriding file values
pub const DEFAULT_ENV_PREFIX: &str = "KRAKEND";

/// Separator between the prefix and the key path in variable names
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator between the segments of a nested key path
pub const DEFAULT_DELIMITER: &str = ".";

/// Path reported in errors for content that did not come from a file
const INLINE_SOURCE: &str = "<inline>";

/// A configuration the [`Parser`] can materialize.
///
/// The implementor owns the schema (through its `Deserialize` impl), lists
/// the extra config maps to normalize, and may validate itself in `init`.
pub trait Configuration: DeserializeOwned {
    /// Every extra config map carried by the configuration
    fn extra_configs_mut(&mut self) -> Vec<&mut ExtraConfig>;

    /// Validate and complete the loaded values
    fn init(&mut self) -> std::result::Result<(), InitError> {
        Ok(())
    }
}

/// Loader settings, fixed at construction
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Nested key delimiter used in environment variable names
    pub delimiter: String,

    /// Environment variable prefix, without the trailing `_`
    pub env_prefix: String,

    /// Variables to use instead of the process environment
    pub env_source: Option<Map<String, String>>,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            env_source: None,
        }
    }
}

impl ParserOptions {
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn env_source(mut self, vars: Map<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }
}

/// Configuration file parser
#[derive(Debug, Clone, Default)]
pub struct Parser {
    options: ParserOptions,
}

impl Parser {
    /// Create a parser with the default `.` delimiter and `KRAKEND_` prefix
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiter(delimiter: impl Into<String>) -> Self {
        Self::with_options(ParserOptions::default().delimiter(delimiter))
    }

    pub fn with_options(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Load the file and, if that succeeds, initialize the configuration
    pub fn parse<C: Configuration>(&self, path: impl AsRef<Path>) -> Result<C> {
        let path = path.as_ref();
        let mut cfg: C = self.parse_without_init(path)?;
        cfg.init().map_err(|e| check_err(e, path))?;
        Ok(cfg)
    }

    /// Load the file, overlay the environment and normalize the result
    /// without calling the configuration's `init`.
    pub fn parse_without_init<C: Configuration>(&self, path: impl AsRef<Path>) -> Result<C> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path);
        debug!(path = %path.display(), %format, "Loading configuration file");

        let content =
            fs::read_to_string(path).map_err(|e| ParseError::file(path, read_error(&e)))?;
        let store = Store::decode(&content, format).map_err(|e| ParseError::file(path, e))?;

        self.materialize(store, path)
    }

    /// Run the whole pipeline on in-memory content (useful for testing)
    pub fn parse_str<C: Configuration>(&self, content: &str, format: ConfigFormat) -> Result<C> {
        let mut cfg: C = self.parse_str_without_init(content, format)?;
        cfg.init().map_err(|e| check_err(e, INLINE_SOURCE))?;
        Ok(cfg)
    }

    /// [`parse_str`](Self::parse_str) without the configuration's `init`
    pub fn parse_str_without_init<C: Configuration>(
        &self,
        content: &str,
        format: ConfigFormat,
    ) -> Result<C> {
        let store =
            Store::decode(content, format).map_err(|e| ParseError::file(INLINE_SOURCE, e))?;
        self.materialize(store, Path::new(INLINE_SOURCE))
    }

    fn materialize<C: Configuration>(&self, mut store: Store, path: &Path) -> Result<C> {
        self.overlay_env(&mut store);

        let mut cfg: C = store
            .into_config()
            .map_err(|e| ParseError::unmarshal(path, e))?;

        let extras = cfg.extra_configs_mut();
        let normalized = extras.len();
        for extra in extras {
            normalize_extra_config(extra);
        }

        info!(
            path = %path.display(),
            extra_configs = normalized,
            "Configuration loaded"
        );
        Ok(cfg)
    }

    /// Set the environment overrides on top of the file values.
    ///
    /// Overrides never fail the load: if they cannot be collected the file
    /// values are used as they are.
    fn overlay_env(&self, store: &mut Store) {
        let vars = match self.environment().collect() {
            Ok(vars) => vars,
            Err(e) => {
                warn!(error = %e, "Ignoring environment overrides");
                return;
            }
        };
        debug!(
            prefix = %self.options.env_prefix,
            overrides = vars.len(),
            "Collected environment overrides"
        );

        // Sorted so a parent key is always set before its children
        let mut vars: Vec<_> = vars.into_iter().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, value) in vars {
            match value.into_string() {
                Ok(value) => store.set(&key, ExtraValue::String(value)),
                Err(e) => warn!(key = %key, error = %e, "Ignoring environment override"),
            }
        }
    }

    // e.g. KRAKEND_PORT=8000 sets `port`, KRAKEND_EXTRA_CONFIG.FOO=bar sets
    // `extra_config.foo` with the default delimiter
    fn environment(&self) -> Environment {
        Environment::with_prefix(&self.options.env_prefix)
            .prefix_separator(ENV_PREFIX_SEPARATOR)
            .separator(&self.options.delimiter)
            .source(self.options.env_source.clone())
    }
}

fn read_error(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => format!("configuration file not found ({err})"),
        _ => format!("cannot read configuration file: {err}"),
    }
}
