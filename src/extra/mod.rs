//! Open-ended "extra config" values
//!
//! Extra config maps are extension points: the loader does not know their
//! shape, so they are decoded into an [`ExtraValue`] tree. Some decoders hand
//! back mappings whose keys are not strings (YAML allows `1: foo` or
//! `true: bar`); those land in [`ExtraValue::KeyedMap`] and are rewritten into
//! string-keyed [`ExtraValue::Map`]s by [`ExtraValue::normalize`].
//!
//! After normalization no `KeyedMap` survives anywhere in the tree.

mod de;

pub use de::DeError;

use serde::de::{self as serde_de, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Extension map attached to the service and to each of its sub-resources
pub type ExtraConfig = BTreeMap<String, ExtraValue>;

/// A decoded value of unknown shape
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExtraValue {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    /// Only for values above `i64::MAX`
    Unsigned(u64),
    Float(f64),
    String(String),
    Sequence(Vec<ExtraValue>),
    Map(BTreeMap<String, ExtraValue>),
    /// Mapping whose keys are not all strings, in decode order
    KeyedMap(Vec<(ExtraValue, ExtraValue)>),
}

impl ExtraValue {
    /// Rewrite every non-string-keyed mapping in the tree into a string-keyed one.
    ///
    /// Sequences keep their order and length, string-keyed maps keep their
    /// keys, scalars are returned untouched. Normalizing twice is the same
    /// as normalizing once.
    pub fn normalize(mut self) -> Self {
        self.normalize_in_place();
        self
    }

    /// In-place variant of [`normalize`](Self::normalize).
    ///
    /// Distinct keys can stringify to the same text (`1` and `"1"`, or `1.0`
    /// and `1`). The entry decoded last wins and a warning names the key.
    pub fn normalize_in_place(&mut self) {
        match self {
            Self::Sequence(items) => items.iter_mut().for_each(Self::normalize_in_place),
            Self::Map(map) => map.values_mut().for_each(Self::normalize_in_place),
            Self::KeyedMap(entries) => {
                let mut map = BTreeMap::new();
                for (key, mut value) in std::mem::take(entries) {
                    value.normalize_in_place();
                    let key = stringify_key(&key);
                    if map.contains_key(&key) {
                        warn!(key = %key, "Mapping keys collide once stringified, keeping the last one");
                    }
                    map.insert(key, value);
                }
                *self = Self::Map(map);
            }
            _ => {}
        }
    }

    /// True when no `KeyedMap` is left anywhere in the tree
    pub fn is_normalized(&self) -> bool {
        match self {
            Self::Sequence(items) => items.iter().all(Self::is_normalized),
            Self::Map(map) => map.values().all(Self::is_normalized),
            Self::KeyedMap(_) => false,
            _ => true,
        }
    }

    /// Short description of the arm, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "a boolean",
            Self::Integer(_) | Self::Unsigned(_) => "an integer",
            Self::Float(_) => "a float",
            Self::String(_) => "a string",
            Self::Sequence(_) => "a sequence",
            Self::Map(_) | Self::KeyedMap(_) => "a mapping",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::Unsigned(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ExtraValue]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ExtraValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key of a string-keyed map
    pub fn get(&self, key: &str) -> Option<&ExtraValue> {
        self.as_map().and_then(|map| map.get(key))
    }

    /// Decode this subtree into a typed namespace struct
    ///
    /// Components owning an extra config namespace use this to read their
    /// own settings once the loader is done.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DeError> {
        T::deserialize(self.clone())
    }
}

/// Normalize every value of an extra config map
pub fn normalize_extra_config(extra: &mut ExtraConfig) {
    extra.values_mut().for_each(ExtraValue::normalize_in_place);
}

/// The one key-stringification policy used when a mapping key is not a string.
///
/// Scalars use their plain textual form (`1`, `true`, `1.5`, `null`), strings
/// are kept verbatim and composite keys are rendered as compact JSON.
pub fn stringify_key(key: &ExtraValue) -> String {
    key.to_string()
}

impl fmt::Display for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Unsigned(u) => write!(f, "{u}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Sequence(_) | Self::Map(_) | Self::KeyedMap(_) => {
                let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
        }
    }
}

impl From<serde_json::Value> for ExtraValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Unsigned(u)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<toml::Value> for ExtraValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => Self::String(s),
            toml::Value::Integer(i) => Self::Integer(i),
            toml::Value::Float(f) => Self::Float(f),
            toml::Value::Boolean(b) => Self::Bool(b),
            toml::Value::Datetime(dt) => Self::String(dt.to_string()),
            toml::Value::Array(items) => {
                Self::Sequence(items.into_iter().map(Self::from).collect())
            }
            toml::Value::Table(table) => Self::from(table),
        }
    }
}

impl From<toml::Table> for ExtraValue {
    fn from(table: toml::Table) -> Self {
        Self::Map(table.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
    }
}

impl From<&str> for ExtraValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ExtraValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for ExtraValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for ExtraValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl Serialize for ExtraValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Unsigned(u) => serializer.serialize_u64(*u),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Self::KeyedMap(entries) => {
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(&stringify_key(key), value)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ExtraValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ExtraValueVisitor)
    }
}

struct ExtraValueVisitor;

impl<'de> Visitor<'de> for ExtraValueVisitor {
    type Value = ExtraValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any configuration value")
    }

    fn visit_bool<E: serde_de::Error>(self, v: bool) -> Result<ExtraValue, E> {
        Ok(ExtraValue::Bool(v))
    }

    fn visit_i64<E: serde_de::Error>(self, v: i64) -> Result<ExtraValue, E> {
        Ok(ExtraValue::Integer(v))
    }

    fn visit_i128<E: serde_de::Error>(self, v: i128) -> Result<ExtraValue, E> {
        if let Ok(i) = i64::try_from(v) {
            Ok(ExtraValue::Integer(i))
        } else if let Ok(u) = u64::try_from(v) {
            Ok(ExtraValue::Unsigned(u))
        } else {
            Err(E::custom(format!("integer {v} is out of range")))
        }
    }

    // Decoders disagree on signedness for positive numbers; keep one arm for
    // everything that fits in an i64 so equal data compares equal.
    fn visit_u64<E: serde_de::Error>(self, v: u64) -> Result<ExtraValue, E> {
        Ok(i64::try_from(v)
            .map(ExtraValue::Integer)
            .unwrap_or(ExtraValue::Unsigned(v)))
    }

    fn visit_u128<E: serde_de::Error>(self, v: u128) -> Result<ExtraValue, E> {
        u64::try_from(v)
            .map_err(|_| E::custom(format!("integer {v} is out of range")))
            .and_then(|u| self.visit_u64(u))
    }

    fn visit_f64<E: serde_de::Error>(self, v: f64) -> Result<ExtraValue, E> {
        Ok(ExtraValue::Float(v))
    }

    fn visit_str<E: serde_de::Error>(self, v: &str) -> Result<ExtraValue, E> {
        Ok(ExtraValue::String(v.to_string()))
    }

    fn visit_string<E: serde_de::Error>(self, v: String) -> Result<ExtraValue, E> {
        Ok(ExtraValue::String(v))
    }

    fn visit_none<E: serde_de::Error>(self) -> Result<ExtraValue, E> {
        Ok(ExtraValue::Null)
    }

    fn visit_unit<E: serde_de::Error>(self) -> Result<ExtraValue, E> {
        Ok(ExtraValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<ExtraValue, D::Error> {
        ExtraValue::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ExtraValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(ExtraValue::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ExtraValue, A::Error> {
        let mut entries: Vec<(ExtraValue, ExtraValue)> =
            Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry()? {
            entries.push((key, value));
        }

        if entries
            .iter()
            .all(|(key, _)| matches!(key, ExtraValue::String(_)))
        {
            let map = entries
                .into_iter()
                .filter_map(|(key, value)| match key {
                    ExtraValue::String(key) => Some((key, value)),
                    _ => None,
                })
                .collect();
            Ok(ExtraValue::Map(map))
        } else {
            Ok(ExtraValue::KeyedMap(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error as ValueError, MapDeserializer};
    use serde_json::json;

    fn keyed(entries: Vec<(ExtraValue, ExtraValue)>) -> ExtraValue {
        ExtraValue::KeyedMap(entries)
    }

    #[test]
    fn test_scalars_unchanged() {
        for value in [
            ExtraValue::Null,
            ExtraValue::Bool(true),
            ExtraValue::Integer(-3),
            ExtraValue::Float(1.5),
            ExtraValue::from("test"),
        ] {
            assert_eq!(value.clone().normalize(), value);
        }
    }

    #[test]
    fn test_keyed_map_becomes_string_keyed() {
        let value = keyed(vec![
            (ExtraValue::Integer(1), "one".into()),
            (ExtraValue::Bool(true), "yes".into()),
            (ExtraValue::from("plain"), "kept".into()),
            (ExtraValue::Float(2.5), "half".into()),
        ]);

        let normalized = value.normalize();
        let map = normalized.as_map().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map["1"], ExtraValue::from("one"));
        assert_eq!(map["true"], ExtraValue::from("yes"));
        assert_eq!(map["plain"], ExtraValue::from("kept"));
        assert_eq!(map["2.5"], ExtraValue::from("half"));
    }

    #[test]
    fn test_nested_keyed_maps_are_walked() {
        let inner = keyed(vec![(ExtraValue::Integer(200), "ok".into())]);
        let value = ExtraValue::Sequence(vec![
            ExtraValue::Map(BTreeMap::from([("codes".to_string(), inner)])),
            ExtraValue::Sequence(vec![keyed(vec![(
                ExtraValue::Null,
                ExtraValue::Integer(1),
            )])]),
        ]);
        assert!(!value.is_normalized());

        let normalized = value.normalize();
        assert!(normalized.is_normalized());

        let items = normalized.as_sequence().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].get("codes").and_then(|c| c.get("200")),
            Some(&ExtraValue::from("ok"))
        );
        assert_eq!(
            items[1].as_sequence().unwrap()[0].get("null"),
            Some(&ExtraValue::Integer(1))
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let value = keyed(vec![
            (ExtraValue::Integer(1), keyed(vec![(ExtraValue::Bool(false), "x".into())])),
            (
                ExtraValue::from("list"),
                ExtraValue::Sequence(vec![ExtraValue::Integer(1), "a".into()]),
            ),
        ]);
        let once = value.normalize();
        let twice = once.clone().normalize();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sequence_order_and_length_preserved() {
        let value = ExtraValue::Sequence(vec![
            "gomez".into(),
            "morticia".into(),
            ExtraValue::Integer(3),
        ]);
        let normalized = value.clone().normalize();
        assert_eq!(normalized, value);
    }

    #[test]
    fn test_stringify_composite_key() {
        let key = ExtraValue::Sequence(vec![ExtraValue::Integer(1), "a".into()]);
        assert_eq!(stringify_key(&key), r#"[1,"a"]"#);
        assert_eq!(stringify_key(&ExtraValue::from("verbatim")), "verbatim");
    }

    #[test]
    fn test_deserialize_non_string_keys() {
        let de = MapDeserializer::<_, ValueError>::new(vec![(1i64, "a"), (2i64, "b")].into_iter());
        let value = ExtraValue::deserialize(de).unwrap();
        assert!(matches!(value, ExtraValue::KeyedMap(ref entries) if entries.len() == 2));

        let normalized = value.normalize();
        assert_eq!(normalized.get("1"), Some(&ExtraValue::from("a")));
        assert_eq!(normalized.get("2"), Some(&ExtraValue::from("b")));
    }

    #[test]
    fn test_deserialize_string_keys_is_map() {
        let value: ExtraValue =
            serde_json::from_value(json!({"user": "test", "parents": ["gomez", "morticia"]}))
                .unwrap();
        assert!(matches!(value, ExtraValue::Map(_)));
        assert_eq!(value.get("user"), Some(&ExtraValue::from("test")));
    }

    #[test]
    fn test_positive_numbers_share_one_arm() {
        let from_unsigned: ExtraValue = serde_json::from_str("5").unwrap();
        assert_eq!(from_unsigned, ExtraValue::Integer(5));

        let big: ExtraValue = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(big, ExtraValue::Unsigned(u64::MAX));
    }

    #[test]
    fn test_keyed_map_serializes_with_string_keys() {
        let value = keyed(vec![(ExtraValue::Integer(7), "seven".into())]);
        assert_eq!(serde_json::to_value(&value).unwrap(), json!({"7": "seven"}));
    }

    #[test]
    fn test_decode_namespace() {
        #[derive(Deserialize)]
        struct Nested {
            data: Data,
        }
        #[derive(Deserialize)]
        struct Data {
            status: String,
        }

        let value = ExtraValue::from(json!({"data": {"status": "OK"}}));
        let nested: Nested = value.decode().unwrap();
        assert_eq!(nested.data.status, "OK");
    }

    #[test]
    fn test_colliding_keys_keep_the_last_entry() {
        let value = keyed(vec![
            (ExtraValue::Integer(1), "integer".into()),
            (ExtraValue::from("1"), "string".into()),
            (ExtraValue::Bool(true), "first".into()),
            (ExtraValue::from("true"), "second".into()),
        ]);

        let normalized = value.normalize();
        let map = normalized.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["1"], ExtraValue::from("string"));
        assert_eq!(map["true"], ExtraValue::from("second"));
    }

    #[test]
    fn test_toml_datetime_becomes_string() {
        let table: toml::Table = toml::from_str("at = 1979-05-27T07:32:00Z\nn = 3").unwrap();
        let value = ExtraValue::from(table);
        assert_eq!(value.get("at"), Some(&ExtraValue::from("1979-05-27T07:32:00Z")));
        assert_eq!(value.get("n"), Some(&ExtraValue::Integer(3)));
    }

    #[test]
    fn test_kind() {
        assert_eq!(ExtraValue::Sequence(vec![]).kind(), "a sequence");
        assert_eq!(keyed(vec![]).kind(), "a mapping");
        assert_eq!(ExtraValue::from("x").kind(), "a string");
    }

    #[test]
    fn test_normalize_extra_config() {
        let mut extra = ExtraConfig::new();
        extra.insert(
            "ns".to_string(),
            keyed(vec![(ExtraValue::Integer(1), "a".into())]),
        );
        normalize_extra_config(&mut extra);
        assert!(extra.values().all(ExtraValue::is_normalized));
    }
}
