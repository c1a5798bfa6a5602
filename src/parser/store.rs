//! The generic key-value store a configuration is materialized from
//!
//! File content is decoded with the format's own serde decoder into an
//! [`ExtraValue`] tree. Mapping keys are kept exactly as the decoder saw them,
//! so a YAML `~`, `1.50` or `[a, b]` key stays a null, float or sequence key
//! until normalization stringifies it.

use crate::error::DecodeError;
use crate::extra::{DeError, ExtraValue, stringify_key};
use crate::parser::format::ConfigFormat;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Store {
    root: ExtraValue,
}

impl Store {
    /// Decode `content` and check that it is a mapping.
    ///
    /// An empty document (a YAML file with only comments, a JSON `null`) is
    /// an empty mapping.
    pub fn decode(content: &str, format: ConfigFormat) -> Result<Self, DecodeError> {
        let root = match format {
            ConfigFormat::Json => serde_json::from_str::<ExtraValue>(content)?,
            ConfigFormat::Yaml if is_blank_yaml(content) => ExtraValue::Null,
            ConfigFormat::Yaml => serde_yaml::from_str::<ExtraValue>(content)?,
            ConfigFormat::Toml => ExtraValue::from(toml::from_str::<toml::Table>(content)?),
        };

        match root {
            ExtraValue::Null => Ok(Self::default()),
            ExtraValue::Map(_) | ExtraValue::KeyedMap(_) => Ok(Self { root }),
            other => Err(DecodeError::NotAMapping(other.kind())),
        }
    }

    /// Set the value at a `.`-separated key path.
    ///
    /// Missing mappings along the path are created and scalars in the way are
    /// replaced. A numeric segment addresses an existing sequence element.
    pub fn set(&mut self, path: &str, value: ExtraValue) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if !segments.is_empty() {
            set_path(&mut self.root, &segments, value);
        }
    }

    /// Deserialize the whole tree into the target configuration
    pub fn into_config<C: DeserializeOwned>(self) -> Result<C, DeError> {
        C::deserialize(self.root)
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            root: ExtraValue::Map(BTreeMap::new()),
        }
    }
}

fn is_blank_yaml(content: &str) -> bool {
    content.lines().map(str::trim).all(|line| {
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

fn set_path(node: &mut ExtraValue, segments: &[&str], value: ExtraValue) {
    let Some((segment, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    let index = segment.parse::<usize>().ok();

    match node {
        ExtraValue::Map(map) => {
            set_path(map.entry(segment.to_string()).or_default(), rest, value);
        }
        ExtraValue::KeyedMap(entries) => {
            match entries.iter_mut().find(|(key, _)| stringify_key(key) == *segment) {
                Some((_, child)) => set_path(child, rest, value),
                None => {
                    let mut child = ExtraValue::Null;
                    set_path(&mut child, rest, value);
                    entries.push((ExtraValue::String(segment.to_string()), child));
                }
            }
        }
        ExtraValue::Sequence(items) if index.is_some_and(|i| i < items.len()) => {
            if let Some(item) = index.and_then(|i| items.get_mut(i)) {
                set_path(item, rest, value);
            }
        }
        _ => {
            let mut child = ExtraValue::Null;
            set_path(&mut child, rest, value);
            *node = ExtraValue::Map(BTreeMap::from([(segment.to_string(), child)]));
        }
    }
}
