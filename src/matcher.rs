//! Request matching logic.
//!
//! Compiles a route's path, method and body predicates once, at creation
//! time, so that matching never fails at dispatch time.

use crate::config::{BodyMatchingMethod, RouteDefinition};
use crate::error::{Result, StubError};
use regex::Regex;

/// Compiled predicates of one route.
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    path: Regex,
    method: Option<String>,
    body: Option<BodyPattern>,
}

#[derive(Debug, Clone)]
enum BodyPattern {
    Exact(String),
    Regex(Regex),
}

impl RouteMatcher {
    /// Compile the matcher of a route definition.
    pub fn compile(route: &RouteDefinition) -> Result<Self> {
        let path = anchored(&route.path, true)
            .map_err(|e| StubError::invalid(format!("invalid path regex: {}", e)))?;

        let body = match (&route.body, route.body_matching_method) {
            (None, _) => None,
            (Some(body), BodyMatchingMethod::Exact) => Some(BodyPattern::Exact(body.clone())),
            (Some(body), BodyMatchingMethod::Regex) => Some(BodyPattern::Regex(
                anchored(body, false)
                    .map_err(|e| StubError::invalid(format!("invalid body regex: {}", e)))?,
            )),
        };

        Ok(Self {
            path,
            method: route.normalized_method(),
            body,
        })
    }

    /// Whether a request with the given path, method and body satisfies every predicate.
    pub fn matches(&self, path: &str, method: &str, body: &str) -> bool {
        self.matches_method(method) && self.matches_path(path) && self.matches_body(body)
    }

    fn matches_method(&self, method: &str) -> bool {
        match &self.method {
            Some(expected) => expected.eq_ignore_ascii_case(method),
            None => true,
        }
    }

    fn matches_path(&self, path: &str) -> bool {
        self.path.is_match(path)
    }

    fn matches_body(&self, body: &str) -> bool {
        match &self.body {
            None => true,
            Some(BodyPattern::Exact(expected)) => body == expected,
            Some(BodyPattern::Regex(regex)) => regex.is_match(body),
        }
    }
}

/// Compile `pattern` anchored at the start, and at the end when `full` is set.
fn anchored(pattern: &str, full: bool) -> std::result::Result<Regex, regex::Error> {
    if full {
        Regex::new(&format!("^(?:{})$", pattern))
    } else {
        Regex::new(&format!("^(?:{})", pattern))
    }
}
