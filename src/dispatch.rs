//! Request dispatch.
//!
//! Drives one inbound request through match, authentication, selection and
//! delay. Each step is a hard gate: the first failure decides the response.

use crate::config::{GlobalSettings, ResponseDefinition, StaticResponse};
use crate::delay::{self, Delay};
use crate::error::StubError;
use crate::request::IncomingRequest;
use crate::store::RouteStore;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A fully rendered HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct StubResponse {
    pub status: u16,
    /// Headers in emission order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubResponse {
    /// Render a configured status, header set and JSON body.
    ///
    /// String bodies are sent verbatim, `null` as an empty payload and
    /// anything else as serialized JSON. A `Content-Type` is added unless
    /// one is configured.
    pub fn render(status: u16, headers: &IndexMap<String, String>, body: &serde_json::Value) -> Self {
        let (payload, content_type) = match body {
            serde_json::Value::Null => (Vec::new(), None),
            serde_json::Value::String(s) => (s.clone().into_bytes(), Some("text/plain; charset=utf-8")),
            other => (other.to_string().into_bytes(), Some("application/json")),
        };

        let mut out: Vec<(String, String)> = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let has_content_type = out.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if let (Some(ct), false) = (content_type, has_content_type) {
            out.push(("Content-Type".to_string(), ct.to_string()));
        }

        Self {
            status,
            headers: out,
            body: payload,
        }
    }

    /// JSON error body in the management API format.
    pub fn error(status: u16, error: &str, message: &str) -> Self {
        let body = serde_json::json!({ "error": error, "message": message });
        Self::render(status, &IndexMap::new(), &body)
    }

    /// Bare 401 without a body.
    pub fn unauthorized() -> Self {
        Self {
            status: 401,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl From<&ResponseDefinition> for StubResponse {
    fn from(response: &ResponseDefinition) -> Self {
        Self::render(response.status, &response.headers, &response.body)
    }
}

impl From<&StaticResponse> for StubResponse {
    fn from(response: &StaticResponse) -> Self {
        Self::render(response.status, &response.headers, &response.body)
    }
}

/// Terminal state of a dispatched request.
#[derive(Debug)]
pub enum Dispatch {
    /// A response was selected from the route's pool.
    Emitted {
        route_id: String,
        response_id: Option<String>,
        response: StubResponse,
    },
    /// The request was turned away; `error` says why.
    Rejected {
        error: StubError,
        response: StubResponse,
    },
}

impl Dispatch {
    pub fn response(&self) -> &StubResponse {
        match self {
            Dispatch::Emitted { response, .. } | Dispatch::Rejected { response, .. } => response,
        }
    }

    pub fn into_stub_response(self) -> StubResponse {
        match self {
            Dispatch::Emitted { response, .. } | Dispatch::Rejected { response, .. } => response,
        }
    }

    pub fn error(&self) -> Option<&StubError> {
        match self {
            Dispatch::Emitted { .. } => None,
            Dispatch::Rejected { error, .. } => Some(error),
        }
    }
}

/// Request counters.
#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    matched: AtomicU64,
    unmatched: AtomicU64,
    unauthorized: AtomicU64,
    exhausted: AtomicU64,
}

/// Snapshot of the dispatch counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
    pub requests_unauthorized: u64,
    pub requests_exhausted: u64,
}

/// Matches inbound requests against the route store and emits responses.
pub struct Dispatcher {
    store: Arc<RouteStore>,
    settings: GlobalSettings,
    counters: Counters,
}

impl Dispatcher {
    pub fn new(store: Arc<RouteStore>, settings: GlobalSettings) -> Self {
        Self {
            store,
            settings,
            counters: Counters::default(),
        }
    }

    pub fn store(&self) -> &Arc<RouteStore> {
        &self.store
    }

    /// Dispatch one request.
    ///
    /// The pool lock is released before the delay starts. Dropping the
    /// returned future cancels the delay, but a response already selected
    /// stays consumed.
    pub async fn dispatch(&self, request: &IncomingRequest) -> Dispatch {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let body = request.body_text();

        let route = match self
            .store
            .find_match(&request.path, &request.method, &body)
            .await
        {
            Ok(route) => route,
            Err(error) => {
                self.counters.unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    warn!(method = %request.method, path = %request.path, "No matching route found");
                }
                return reject(404, "Not Found", error);
            }
        };

        if let Err(error) = route.authenticate(request) {
            self.counters.unauthorized.fetch_add(1, Ordering::Relaxed);
            warn!(route_id = %route.id(), reason = %error, "Request failed authentication");
            let configured = route.auth().and_then(|a| a.unauthorized_response());
            let response = match configured {
                Some(configured) => {
                    apply_delay(route.id(), configured.delay.as_ref()).await;
                    StubResponse::from(configured)
                }
                None => StubResponse::unauthorized(),
            };
            return Dispatch::Rejected { error, response };
        }

        let selected = match route.select().await {
            Ok(selected) => selected,
            Err(error) => {
                self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                warn!(route_id = %route.id(), "Route has no active responses left");
                return reject(500, "Pool Exhausted", error);
            }
        };

        self.counters.matched.fetch_add(1, Ordering::Relaxed);
        if self.settings.log_matches {
            info!(
                route_id = %route.id(),
                response_id = selected.id.as_deref().unwrap_or(""),
                method = %request.method,
                path = %request.path,
                "Request matched route"
            );
        }

        apply_delay(route.id(), selected.delay.as_ref()).await;

        Dispatch::Emitted {
            route_id: route.id().to_string(),
            response_id: selected.id.clone(),
            response: StubResponse::from(selected.as_ref()),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_total: self.counters.total.load(Ordering::Relaxed),
            requests_matched: self.counters.matched.load(Ordering::Relaxed),
            requests_unmatched: self.counters.unmatched.load(Ordering::Relaxed),
            requests_unauthorized: self.counters.unauthorized.load(Ordering::Relaxed),
            requests_exhausted: self.counters.exhausted.load(Ordering::Relaxed),
        }
    }
}

fn reject(status: u16, reason: &str, error: StubError) -> Dispatch {
    let response = StubResponse::error(status, reason, &error.to_string());
    Dispatch::Rejected { error, response }
}

async fn apply_delay(route_id: &str, configured: Option<&Delay>) {
    let duration = delay::compute_delay(configured);
    if !duration.is_zero() {
        debug!(route_id, delay_ms = duration.as_millis() as u64, "Applying delay");
    }
    delay::wait(duration).await;
}
