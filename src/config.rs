//! Configuration for the stub server.
//!
//! Defines routes, their candidate responses, and server settings. The same
//! route schema is accepted from the YAML config file and from the JSON
//! management API.

use crate::auth::Auth;
use crate::delay::Delay;
use crate::error::{Result, StubError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// HTTP methods a route may be restricted to.
pub const HTTP_METHODS: &[&str] = &[
    "GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH",
];

/// Main configuration for the stub server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StubServerConfig {
    /// Address to listen on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Path prefix of the management API
    #[serde(default = "default_internal_prefix")]
    pub internal_prefix: String,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Routes registered at startup, in priority order
    #[serde(default)]
    pub routes: Vec<RouteDefinition>,
}

impl Default for StubServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            internal_prefix: default_internal_prefix(),
            settings: GlobalSettings::default(),
            routes: Vec::new(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_internal_prefix() -> String {
    "/internal".to_string()
}

impl StubServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.internal_prefix.starts_with('/') || self.internal_prefix.len() < 2 {
            anyhow::bail!(
                "internal_prefix must start with '/' and not be empty: {:?}",
                self.internal_prefix
            );
        }
        if self.internal_prefix.ends_with('/') {
            anyhow::bail!("internal_prefix must not end with '/'");
        }
        let mut ids = HashSet::new();
        for (i, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| anyhow::anyhow!("Route {}: {}", i, e))?;
            if let Some(id) = &route.id {
                if !ids.insert(id.as_str()) {
                    anyhow::bail!("Route {}: duplicate route id \"{}\"", i, id);
                }
            }
        }
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched routes
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// How a route picks one of its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSelection {
    /// Round-robin over active responses
    #[default]
    Cycle,
    /// Weighted random draw among active responses
    Random,
    /// First active response in declaration order
    Greedy,
}

/// How the configured body pattern is compared to the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMatchingMethod {
    #[default]
    Exact,
    Regex,
}

/// A single route definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDefinition {
    /// Unique identifier, generated when omitted
    #[serde(default)]
    pub id: Option<String>,

    /// Regular expression that must match the whole request path
    pub path: String,

    /// HTTP method (absent = any)
    #[serde(default)]
    pub method: Option<String>,

    /// Pattern the request body must satisfy
    #[serde(default)]
    pub body: Option<String>,

    /// How `body` is compared
    #[serde(default)]
    pub body_matching_method: BodyMatchingMethod,

    /// Response selection strategy
    #[serde(default)]
    pub response_selection: ResponseSelection,

    /// Authentication required by this route
    #[serde(default)]
    pub auth: Option<Auth>,

    /// Candidate responses, in declaration order
    pub responses: Vec<ResponseDefinition>,
}

impl RouteDefinition {
    /// Validate the route definition.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.id {
            if id.is_empty() {
                return Err(StubError::invalid("route id cannot be empty"));
            }
        }

        regex::Regex::new(&self.path)
            .map_err(|e| StubError::invalid(format!("invalid path regex: {}", e)))?;

        if let Some(method) = &self.method {
            let upper = method.to_uppercase();
            if !HTTP_METHODS.contains(&upper.as_str()) {
                return Err(StubError::invalid(format!("unknown HTTP method: {}", method)));
            }
        }

        if let (Some(body), BodyMatchingMethod::Regex) = (&self.body, self.body_matching_method) {
            regex::Regex::new(body)
                .map_err(|e| StubError::invalid(format!("invalid body regex: {}", e)))?;
        }

        if let Some(auth) = &self.auth {
            auth.validate()?;
        }

        if self.responses.is_empty() {
            return Err(StubError::invalid("route must define at least one response"));
        }

        let mut ids = HashSet::new();
        for response in &self.responses {
            response.validate()?;
            if let Some(id) = &response.id {
                if !ids.insert(id.as_str()) {
                    return Err(StubError::DuplicateResponseId {
                        route: self.id.clone().unwrap_or_else(|| "<unnamed>".to_string()),
                        response: id.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Fill in missing route and response ids.
    pub fn assign_ids(&mut self) {
        if self.id.is_none() {
            self.id = Some(generate_id());
        }
        for response in &mut self.responses {
            if response.id.is_none() {
                response.id = Some(generate_id());
            }
        }
    }

    /// Method normalized to uppercase.
    pub fn normalized_method(&self) -> Option<String> {
        self.method.as_ref().map(|m| m.to_uppercase())
    }
}

pub(crate) fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A candidate response of a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// Identifier, unique within the route
    #[serde(default)]
    pub id: Option<String>,

    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers, emitted in this order
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: serde_json::Value,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<Delay>,

    /// How many times this response may be selected (absent = unlimited)
    #[serde(default)]
    pub repeat: Option<u32>,

    /// Relative weight for the `random` strategy
    #[serde(default)]
    pub weight: Option<f64>,
}

fn default_status() -> u16 {
    200
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> Result<()> {
        validate_status(self.status)?;
        if let Some(id) = &self.id {
            if id.is_empty() {
                return Err(StubError::invalid("response id cannot be empty"));
            }
        }
        if self.repeat == Some(0) {
            return Err(StubError::invalid("repeat must be a positive integer"));
        }
        if let Some(weight) = self.weight {
            if !(0.0..=1.0).contains(&weight) {
                return Err(StubError::invalid(format!(
                    "weight must be between 0 and 1, got {}",
                    weight
                )));
            }
        }
        if let Some(delay) = &self.delay {
            delay.validate()?;
        }
        Ok(())
    }
}

/// A fixed response, used where no pool is involved (e.g. auth failures).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticResponse {
    /// HTTP status code
    #[serde(default = "default_unauthorized_status")]
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: IndexMap<String, String>,

    /// Response body
    #[serde(default)]
    pub body: serde_json::Value,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<Delay>,
}

fn default_unauthorized_status() -> u16 {
    401
}

impl StaticResponse {
    /// Validate the response.
    pub fn validate(&self) -> Result<()> {
        validate_status(self.status)?;
        if let Some(delay) = &self.delay {
            delay.validate()?;
        }
        Ok(())
    }
}

fn validate_status(status: u16) -> Result<()> {
    if !(100..=599).contains(&status) {
        return Err(StubError::invalid(format!("invalid status code: {}", status)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_route(yaml: &str) -> RouteDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_simple_route() {
        let yaml = r#"
routes:
  - id: ping
    path: /ping
    method: GET
    responses:
      - status: 200
        body: pong
"#;
        let config: StubServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routes.len(), 1);
        let route = &config.routes[0];
        assert_eq!(route.id.as_deref(), Some("ping"));
        assert_eq!(route.response_selection, ResponseSelection::Cycle);
        assert_eq!(route.body_matching_method, BodyMatchingMethod::Exact);
        assert_eq!(route.responses[0].body, serde_json::json!("pong"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = StubServerConfig::default();
        assert_eq!(config.listen.port(), 5000);
        assert_eq!(config.internal_prefix, "/internal");
        assert!(config.settings.log_matches);

        let route = parse_route("path: /x\nresponses: [{}]");
        assert_eq!(route.responses[0].status, 200);
        assert!(route.responses[0].body.is_null());
        assert!(route.method.is_none());
    }

    #[test]
    fn test_headers_keep_order() {
        let route = parse_route(
            r#"
path: /h
responses:
  - headers:
      X-Zulu: "1"
      X-Alpha: "2"
      X-Mike: "3"
"#,
        );
        let names: Vec<_> = route.responses[0].headers.keys().cloned().collect();
        assert_eq!(names, vec!["X-Zulu", "X-Alpha", "X-Mike"]);
    }

    #[test]
    fn test_parse_delay_and_weights() {
        let route = parse_route(
            r#"
path: /slow
response_selection: random
responses:
  - id: a
    delay: 0.5
    weight: 0.8
  - id: b
    delay: [0.1, 0.3]
    repeat: 2
"#,
        );
        assert_eq!(route.response_selection, ResponseSelection::Random);
        assert_eq!(route.responses[0].delay, Some(Delay::Fixed(0.5)));
        assert_eq!(route.responses[1].delay, Some(Delay::Range(0.1, 0.3)));
        assert_eq!(route.responses[1].repeat, Some(2));
        assert!(route.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_responses() {
        let route = parse_route("path: /x\nresponses: []");
        assert!(matches!(
            route.validate(),
            Err(StubError::InvalidRouteConfig(_))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        for yaml in [
            "path: '(unclosed'\nresponses: [{}]",
            "path: /x\nmethod: FETCH\nresponses: [{}]",
            "path: /x\nbody: '[a-'\nbody_matching_method: regex\nresponses: [{}]",
            "path: /x\nresponses: [{status: 42}]",
            "path: /x\nresponses: [{repeat: 0}]",
            "path: /x\nresponses: [{weight: 1.5}]",
            "path: /x\nresponses: [{delay: [2, 1]}]",
            "path: /x\nresponses: [{delay: -1}]",
            "path: /x\nresponses: [{delay: 100000.0}]",
        ] {
            let route = parse_route(yaml);
            assert!(route.validate().is_err(), "accepted: {}", yaml);
        }
    }

    #[test]
    fn test_rejects_duplicate_response_ids() {
        let route = parse_route("id: r\npath: /x\nresponses: [{id: a}, {id: a}]");
        match route.validate() {
            Err(StubError::DuplicateResponseId { route, response }) => {
                assert_eq!(route, "r");
                assert_eq!(response, "a");
            }
            other => panic!("Expected DuplicateResponseId, got {:?}", other),
        }

        let unnamed = parse_route("path: /x\nresponses: [{id: a}, {id: a}]");
        match unnamed.validate() {
            Err(StubError::DuplicateResponseId { route, .. }) => assert_eq!(route, "<unnamed>"),
            other => panic!("Expected DuplicateResponseId, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let result: std::result::Result<RouteDefinition, _> =
            serde_yaml::from_str("path: /x\nresponses: [{}]\npriority: 3");
        assert!(result.is_err());
    }

    #[test]
    fn test_assign_ids() {
        let mut route = parse_route("path: /x\nresponses: [{id: keep}, {}]");
        route.assign_ids();
        assert!(route.id.is_some());
        assert_eq!(route.responses[0].id.as_deref(), Some("keep"));
        assert!(route.responses[1].id.is_some());
    }

    #[test]
    fn test_config_rejects_duplicate_route_ids() {
        let yaml = r#"
routes:
  - {id: same, path: /a, responses: [{}]}
  - {id: same, path: /b, responses: [{}]}
"#;
        let config: StubServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen: 0.0.0.0:8080\nroutes:\n  - path: /ok\n    responses: [{{status: 204}}]"
        )
        .unwrap();

        let config = StubServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.routes[0].responses[0].status, 204);
    }

    #[test]
    fn test_config_from_file_rejects_invalid_route() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "routes:\n  - path: /x\n    responses: []").unwrap();
        assert!(StubServerConfig::from_file(file.path()).is_err());
    }
}
