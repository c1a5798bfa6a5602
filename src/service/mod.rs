//! Service configuration schema
//!
//! The typed shape a KrakenD-style gateway configuration is loaded into.
//! Only the fields the gateway core needs are typed; everything component
//! specific lives in the `extra_config` maps of the service, its endpoints
//! and their backends.

use crate::error::InitError;
use crate::extra::ExtraConfig;
use crate::parser::Configuration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// The only configuration version this crate understands
pub const CONFIG_VERSION: u32 = 3;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_METHOD: &str = "GET";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Configuration format version (must be 3)
    pub version: u32,

    /// Service name, informative only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Listening port
    pub port: u16,

    /// Default backend hosts
    pub host: Vec<String>,

    /// Default endpoint timeout (e.g. "2s", "1500ms")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Default cache TTL for responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,

    /// Default output encoding of the endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_encoding: Option<String>,

    /// Service-level extensions
    pub extra_config: ExtraConfig,

    pub endpoints: Vec<EndpointConfig>,

    /// Parsed `timeout`, set by `init`
    #[serde(skip)]
    pub timeout_duration: Duration,
}

/// A public endpoint exposed by the gateway
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Public URL path (e.g. "/users/{id}")
    pub endpoint: String,

    /// HTTP method, upper-cased by `init`
    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_encoding: Option<String>,

    /// Endpoint-level extensions
    pub extra_config: ExtraConfig,

    pub backend: Vec<BackendConfig>,

    /// Parsed `timeout`, inherited from the service when unset
    #[serde(skip)]
    pub timeout_duration: Duration,
}

/// An upstream call made on behalf of an endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Upstream hosts, inherited from the service when empty
    pub host: Vec<String>,

    /// Upstream path template
    pub url_pattern: String,

    /// HTTP method, inherited from the endpoint when empty
    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Key the backend response is nested under when merging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Backend-level extensions
    pub extra_config: ExtraConfig,
}

impl Configuration for ServiceConfig {
    fn extra_configs_mut(&mut self) -> Vec<&mut ExtraConfig> {
        let mut extras = vec![&mut self.extra_config];
        for endpoint in &mut self.endpoints {
            extras.push(&mut endpoint.extra_config);
            for backend in &mut endpoint.backend {
                extras.push(&mut backend.extra_config);
            }
        }
        extras
    }

    fn init(&mut self) -> Result<(), InitError> {
        ServiceConfig::init(self)
    }
}

impl ServiceConfig {
    /// Validate the loaded configuration and fill in inherited defaults
    pub fn init(&mut self) -> Result<(), InitError> {
        if self.version != CONFIG_VERSION {
            return Err(InitError::UnsupportedVersion {
                found: self.version,
                want: CONFIG_VERSION,
            });
        }

        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }

        self.timeout_duration = match &self.timeout {
            Some(raw) => parse_duration("timeout", raw)?,
            None => DEFAULT_TIMEOUT,
        };
        if let Some(raw) = &self.cache_ttl {
            parse_duration("cache_ttl", raw)?;
        }

        let mut seen = HashSet::new();
        for endpoint in &mut self.endpoints {
            endpoint.init(&self.host, self.timeout_duration)?;

            if !seen.insert((endpoint.method.clone(), endpoint.endpoint.clone())) {
                return Err(InitError::DuplicatedEndpoint {
                    method: endpoint.method.clone(),
                    path: endpoint.endpoint.clone(),
                });
            }
        }

        Ok(())
    }
}

impl EndpointConfig {
    fn init(&mut self, hosts: &[String], timeout: Duration) -> Result<(), InitError> {
        if !self.endpoint.starts_with('/') {
            return Err(InitError::InvalidEndpointPath {
                path: self.endpoint.clone(),
            });
        }

        self.method = if self.method.is_empty() {
            DEFAULT_METHOD.to_string()
        } else {
            self.method.to_uppercase()
        };

        self.timeout_duration = match &self.timeout {
            Some(raw) => parse_duration(&format!("{} timeout", self.endpoint), raw)?,
            None => timeout,
        };
        if let Some(raw) = &self.cache_ttl {
            parse_duration(&format!("{} cache_ttl", self.endpoint), raw)?;
        }

        if self.backend.is_empty() {
            return Err(InitError::NoBackends {
                method: self.method.clone(),
                path: self.endpoint.clone(),
            });
        }

        for backend in &mut self.backend {
            if backend.host.is_empty() {
                backend.host = hosts.to_vec();
            }
            if backend.method.is_empty() {
                backend.method = self.method.clone();
            } else {
                backend.method = backend.method.to_uppercase();
            }
            if !backend.url_pattern.starts_with('/') {
                backend.url_pattern = format!("/{}", backend.url_pattern);
            }
        }

        Ok(())
    }
}

/// Parse a duration written as a number followed by a unit
/// (`ns`, `us`, `ms`, `s`, `m` or `h`), e.g. `1500ms` or `2s`.
pub fn parse_duration(field: &str, raw: &str) -> Result<Duration, InitError> {
    let invalid = || InitError::InvalidTimeout {
        field: field.to_string(),
        value: raw.to_string(),
    };

    let value = raw.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(invalid)?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().map_err(|_| invalid())?;

    let secs = match unit {
        "ns" => number / 1e9,
        "us" | "µs" => number / 1e6,
        "ms" => number / 1e3,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return Err(invalid()),
    };

    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(path: &str, method: &str) -> EndpointConfig {
        EndpointConfig {
            endpoint: path.to_string(),
            method: method.to_string(),
            backend: vec![BackendConfig {
                url_pattern: "users".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn service(endpoints: Vec<EndpointConfig>) -> ServiceConfig {
        ServiceConfig {
            version: CONFIG_VERSION,
            host: vec!["http://localhost:8000".to_string()],
            endpoints,
            ..Default::default()
        }
    }

    #[test]
    fn test_unsupported_version() {
        let mut cfg = ServiceConfig::default();
        let err = cfg.init().unwrap_err();
        assert_eq!(err.to_string(), "unsupported version: 0 (want: 3)");
    }

    #[test]
    fn test_defaults_are_filled_in() {
        let mut cfg = service(vec![endpoint("/users", "")]);
        cfg.init().unwrap();

        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.timeout_duration, DEFAULT_TIMEOUT);

        let endpoint = &cfg.endpoints[0];
        assert_eq!(endpoint.method, "GET");
        assert_eq!(endpoint.timeout_duration, DEFAULT_TIMEOUT);

        let backend = &endpoint.backend[0];
        assert_eq!(backend.host, vec!["http://localhost:8000"]);
        assert_eq!(backend.method, "GET");
        assert_eq!(backend.url_pattern, "/users");
    }

    #[test]
    fn test_backend_keeps_own_settings() {
        let mut ep = endpoint("/users", "post");
        ep.backend[0].host = vec!["http://users:9000".to_string()];
        ep.backend[0].method = "put".to_string();
        let mut cfg = service(vec![ep]);
        cfg.init().unwrap();

        let backend = &cfg.endpoints[0].backend[0];
        assert_eq!(cfg.endpoints[0].method, "POST");
        assert_eq!(backend.host, vec!["http://users:9000"]);
        assert_eq!(backend.method, "PUT");
    }

    #[test]
    fn test_duplicated_endpoint() {
        let mut cfg = service(vec![endpoint("/users", "get"), endpoint("/users", "GET")]);
        assert_eq!(
            cfg.init().unwrap_err(),
            InitError::DuplicatedEndpoint {
                method: "GET".to_string(),
                path: "/users".to_string(),
            }
        );
    }

    #[test]
    fn test_same_path_different_method_is_fine() {
        let mut cfg = service(vec![endpoint("/users", "GET"), endpoint("/users", "POST")]);
        assert!(cfg.init().is_ok());
    }

    #[test]
    fn test_invalid_endpoint_path() {
        let mut cfg = service(vec![endpoint("users", "GET")]);
        assert!(matches!(
            cfg.init(),
            Err(InitError::InvalidEndpointPath { .. })
        ));
    }

    #[test]
    fn test_endpoint_without_backends() {
        let mut ep = endpoint("/users", "GET");
        ep.backend.clear();
        let mut cfg = service(vec![ep]);
        assert!(matches!(cfg.init(), Err(InitError::NoBackends { .. })));
    }

    #[test]
    fn test_endpoint_timeout_overrides_service() {
        let mut ep = endpoint("/slow", "GET");
        ep.timeout = Some("10s".to_string());
        let mut cfg = service(vec![ep, endpoint("/fast", "GET")]);
        cfg.timeout = Some("1500ms".to_string());
        cfg.init().unwrap();

        assert_eq!(cfg.timeout_duration, Duration::from_millis(1500));
        assert_eq!(cfg.endpoints[0].timeout_duration, Duration::from_secs(10));
        assert_eq!(cfg.endpoints[1].timeout_duration, Duration::from_millis(1500));
    }

    #[test]
    fn test_invalid_timeout() {
        let mut cfg = service(vec![]);
        cfg.timeout = Some("soon".to_string());
        assert!(matches!(cfg.init(), Err(InitError::InvalidTimeout { .. })));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("t", "2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("t", "250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("t", "1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("t", "1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("t", "10").is_err());
        assert!(parse_duration("t", "s").is_err());
        assert!(parse_duration("t", "3d").is_err());
    }

    #[test]
    fn test_extra_configs_cover_every_level() {
        let mut ep = endpoint("/users", "GET");
        ep.backend.push(BackendConfig::default());
        let mut cfg = service(vec![ep, endpoint("/teams", "GET")]);
        // service + 2 endpoints + 3 backends
        assert_eq!(cfg.extra_configs_mut().len(), 6);
    }
}
