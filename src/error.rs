//! Error types for krakend-config
//!
//! Every failure of the loading pipeline carries the path of the file being
//! loaded, so the rendered message always reads `'<path>': <cause>`.
//! We use `thiserror` for the library errors; the binary wraps them in
//! `anyhow` at its boundary.

use std::path::Path;
use thiserror::Error;

/// Errors returned by [`Parser`](crate::parser::Parser)
#[derive(Error, Debug)]
pub enum ParseError {
    /// The file is missing, unreadable, or malformed for its format
    #[error("'{path}': {message}")]
    File { path: String, message: String },

    /// The decoded data does not fit the shape of the target configuration
    #[error("'{path}': {message}")]
    Unmarshal { path: String, message: String },

    /// The configuration's own initialization rejected the loaded values
    #[error("'{path}': {source}")]
    Init {
        path: String,
        #[source]
        source: InitError,
    },
}

impl ParseError {
    pub fn file(path: impl AsRef<Path>, err: impl ToString) -> Self {
        Self::File {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn unmarshal(path: impl AsRef<Path>, err: impl ToString) -> Self {
        Self::Unmarshal {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }

    /// Path of the configuration file the error refers to
    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Unmarshal { path, .. } | Self::Init { path, .. } => {
                path
            }
        }
    }

    /// Whether the error was raised before the data reached the typed schema
    pub fn is_file_error(&self) -> bool {
        matches!(self, Self::File { .. })
    }
}

/// Errors raised by a configuration's `init` hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("unsupported version: {found} (want: {want})")]
    UnsupportedVersion { found: u32, want: u32 },

    #[error("invalid endpoint path '{path}': it must start with '/'")]
    InvalidEndpointPath { path: String },

    #[error("duplicated endpoint: {method} {path}")]
    DuplicatedEndpoint { method: String, path: String },

    #[error("endpoint {method} {path} has no backends")]
    NoBackends { method: String, path: String },

    #[error("invalid duration '{value}' for {field}")]
    InvalidTimeout { field: String, value: String },

    #[error("{0}")]
    Custom(String),
}

/// Errors raised while turning file content into the generic value tree
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("expected a mapping at the top level, found {0}")]
    NotAMapping(&'static str),
}

/// Wrap an init error with the path of the file it was loaded from
pub fn check_err(err: InitError, path: impl AsRef<Path>) -> ParseError {
    ParseError::Init {
        path: path.as_ref().display().to_string(),
        source: err,
    }
}

/// Result type alias for the loader
pub type Result<T> = std::result::Result<T, ParseError>;
