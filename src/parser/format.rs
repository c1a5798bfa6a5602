//! File format selection

use std::fmt;
use std::path::Path;

/// Source format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigFormat {
    #[default]
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    /// Pick the decoder from the file extension.
    ///
    /// `.yml` and `.yaml` are YAML, `.toml` is TOML, and everything else
    /// (including `.json` and no extension at all) is JSON.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yml" | "yaml" => Self::Yaml,
            "toml" => Self::Toml,
            _ => Self::Json,
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        })
    }
}
