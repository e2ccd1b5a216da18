//! Route storage and first-match lookup.

use crate::auth::Auth;
use crate::config::{ResponseDefinition, RouteDefinition, StubServerConfig};
use crate::error::{Result, StubError};
use crate::matcher::RouteMatcher;
use crate::pool::{ResponsePool, ResponseState};
use crate::request::IncomingRequest;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// A registered route: compiled matcher, auth and response pool.
#[derive(Debug)]
pub struct Route {
    id: String,
    definition: RouteDefinition,
    matcher: RouteMatcher,
    /// Selection state, locked only around `select()`
    pool: Mutex<ResponsePool>,
    used_count: AtomicU64,
}

impl Route {
    /// Validate a definition and build a route from it, generating missing ids.
    pub fn new(definition: RouteDefinition) -> Result<Self> {
        let pool = |def: &RouteDefinition| {
            ResponsePool::new(def.response_selection, def.responses.clone())
        };
        Self::build(definition, pool)
    }

    /// Like [`Route::new`], with reproducible random selection.
    pub fn with_seed(definition: RouteDefinition, seed: u64) -> Result<Self> {
        let pool = |def: &RouteDefinition| {
            ResponsePool::with_seed(def.response_selection, def.responses.clone(), seed)
        };
        Self::build(definition, pool)
    }

    fn build(
        mut definition: RouteDefinition,
        pool: impl FnOnce(&RouteDefinition) -> ResponsePool,
    ) -> Result<Self> {
        definition.assign_ids();
        definition.validate()?;
        let matcher = RouteMatcher::compile(&definition)?;
        let id = definition.id.clone().unwrap_or_default();
        let pool = pool(&definition);

        Ok(Self {
            id,
            definition,
            matcher,
            pool: Mutex::new(pool),
            used_count: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn definition(&self) -> &RouteDefinition {
        &self.definition
    }

    pub fn auth(&self) -> Option<&Auth> {
        self.definition.auth.as_ref()
    }

    /// Whether the request satisfies path, method and body predicates.
    pub fn matches(&self, path: &str, method: &str, body: &str) -> bool {
        self.matcher.matches(path, method, body)
    }

    /// Check the request against the route's auth method, if any.
    pub fn authenticate(&self, request: &IncomingRequest) -> Result<()> {
        match self.auth() {
            Some(auth) => auth.authenticate(request),
            None => Ok(()),
        }
    }

    /// Select a response from the pool, consuming one unit of its budget.
    pub async fn select(&self) -> Result<Arc<ResponseDefinition>> {
        let selected = self.pool.lock().await.select();
        match selected {
            Some(response) => {
                self.used_count.fetch_add(1, Ordering::Relaxed);
                Ok(response)
            }
            None => Err(StubError::PoolExhausted(self.id.clone())),
        }
    }

    /// Number of successful selections so far.
    pub fn used_count(&self) -> u64 {
        self.used_count.load(Ordering::Relaxed)
    }

    /// Serializable view including consumption counters.
    pub async fn view(&self) -> RouteView {
        let states = self.pool.lock().await.states();
        let is_active = states.iter().any(|s| s.is_active);
        RouteView {
            definition: self.definition.clone(),
            used_count: self.used_count(),
            is_active,
            responses: states,
        }
    }
}

/// Route as reported by the management API.
#[derive(Debug, Clone, Serialize)]
pub struct RouteView {
    #[serde(flatten)]
    pub definition: RouteDefinition,
    pub used_count: u64,
    pub is_active: bool,
    /// Per-response consumption, in declaration order
    #[serde(rename = "response_states")]
    pub responses: Vec<ResponseState>,
}

/// Registered routes in registration order.
///
/// Lookups take a read lock and clone the matched [`Route`] handle, so no
/// store lock is held while a request is authenticated, selected or delayed.
#[derive(Debug, Default)]
pub struct RouteStore {
    routes: RwLock<Vec<Arc<Route>>>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store seeded with the routes of a configuration file.
    pub async fn from_config(config: &StubServerConfig) -> Result<Self> {
        let store = Self::new();
        store.reset(config.routes.clone()).await?;
        Ok(store)
    }

    /// Insert a route, or replace the route with the same id in place.
    ///
    /// A replaced route starts with a fresh pool.
    pub async fn create_or_replace(&self, definition: RouteDefinition) -> Result<Arc<Route>> {
        let route = Arc::new(Route::new(definition)?);
        self.insert(route.clone()).await;
        Ok(route)
    }

    /// Register an already built route (see [`Route::with_seed`]).
    pub async fn insert(&self, route: Arc<Route>) {
        let mut routes = self.routes.write().await;
        match routes.iter().position(|r| r.id() == route.id()) {
            Some(pos) => {
                info!(route_id = %route.id(), "Route replaced");
                routes[pos] = route;
            }
            None => {
                info!(route_id = %route.id(), "Route created");
                routes.push(route);
            }
        }
    }

    /// Replace an existing route; the definition's id must be absent or equal `id`.
    pub async fn replace(&self, id: &str, mut definition: RouteDefinition) -> Result<Arc<Route>> {
        if let Some(body_id) = &definition.id {
            if body_id != id {
                return Err(StubError::invalid(format!(
                    "route id \"{}\" doesn't match \"{}\"",
                    body_id, id
                )));
            }
        }
        definition.id = Some(id.to_string());
        let route = Arc::new(Route::new(definition)?);

        let mut routes = self.routes.write().await;
        let pos = routes
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StubError::RouteNotFound(id.to_string()))?;
        routes[pos] = route.clone();
        info!(route_id = %id, "Route replaced");
        Ok(route)
    }

    /// Remove a route.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut routes = self.routes.write().await;
        let pos = routes
            .iter()
            .position(|r| r.id() == id)
            .ok_or_else(|| StubError::RouteNotFound(id.to_string()))?;
        routes.remove(pos);
        info!(route_id = %id, "Route deleted");
        Ok(())
    }

    /// Replace all routes at once. Nothing changes if any definition is invalid.
    pub async fn reset(&self, definitions: Vec<RouteDefinition>) -> Result<()> {
        let mut fresh: Vec<Arc<Route>> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let route = Route::new(definition)?;
            if fresh.iter().any(|r| r.id() == route.id()) {
                return Err(StubError::invalid(format!(
                    "duplicate route id \"{}\"",
                    route.id()
                )));
            }
            fresh.push(Arc::new(route));
        }
        let count = fresh.len();
        *self.routes.write().await = fresh;
        info!(routes = count, "Routes reset");
        Ok(())
    }

    /// Remove every route.
    pub async fn clear(&self) {
        self.routes.write().await.clear();
        info!("Routes cleared");
    }

    pub async fn get(&self, id: &str) -> Result<Arc<Route>> {
        self.routes
            .read()
            .await
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| StubError::RouteNotFound(id.to_string()))
    }

    /// All routes in registration order.
    pub async fn list(&self) -> Vec<Arc<Route>> {
        self.routes.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    /// First route, in registration order, accepting the request.
    ///
    /// Routes with exhausted pools still match; exhaustion is reported by
    /// [`Route::select`].
    pub async fn find_match(&self, path: &str, method: &str, body: &str) -> Result<Arc<Route>> {
        let routes = self.routes.read().await;
        let found = routes.iter().find(|r| r.matches(path, method, body)).cloned();
        match found {
            Some(route) => {
                debug!(route_id = %route.id(), path, method, "Route matched");
                Ok(route)
            }
            None => Err(StubError::NoMatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(yaml: &str) -> RouteDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("id: broad\npath: '/api/.*'\nresponses: [{}]"))
            .await
            .unwrap();
        store
            .create_or_replace(def("id: exact\npath: /api/users\nresponses: [{}]"))
            .await
            .unwrap();

        let route = store.find_match("/api/users", "GET", "").await.unwrap();
        assert_eq!(route.id(), "broad");
    }

    #[tokio::test]
    async fn test_no_match() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("path: /ping\nmethod: GET\nresponses: [{}]"))
            .await
            .unwrap();

        assert!(matches!(
            store.find_match("/pong", "GET", "").await,
            Err(StubError::NoMatch)
        ));
        assert!(matches!(
            store.find_match("/ping", "POST", "").await,
            Err(StubError::NoMatch)
        ));
    }

    #[tokio::test]
    async fn test_generates_ids() {
        let store = RouteStore::new();
        let route = store
            .create_or_replace(def("path: /x\nresponses: [{}, {id: b}]"))
            .await
            .unwrap();

        assert!(!route.id().is_empty());
        let responses = &route.definition().responses;
        assert!(responses[0].id.is_some());
        assert_eq!(responses[1].id.as_deref(), Some("b"));
        assert!(store.get(route.id()).await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_keeps_position_and_resets_pool() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("id: one\npath: /x\nresponses: [{id: a, repeat: 1}]"))
            .await
            .unwrap();
        store
            .create_or_replace(def("id: two\npath: /x\nresponses: [{id: b}]"))
            .await
            .unwrap();

        let first = store.find_match("/x", "GET", "").await.unwrap();
        first.select().await.unwrap();
        assert!(first.select().await.is_err());

        store
            .create_or_replace(def("id: one\npath: /x\nresponses: [{id: a, repeat: 1}]"))
            .await
            .unwrap();

        let ids: Vec<String> = store.list().await.iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, vec!["one", "two"]);

        let fresh = store.find_match("/x", "GET", "").await.unwrap();
        assert_eq!(fresh.id(), "one");
        assert_eq!(fresh.used_count(), 0);
        assert!(fresh.select().await.is_ok());
    }

    #[tokio::test]
    async fn test_replace_requires_existing_route() {
        let store = RouteStore::new();
        let result = store.replace("missing", def("path: /x\nresponses: [{}]")).await;
        assert!(matches!(result, Err(StubError::RouteNotFound(id)) if id == "missing"));

        store
            .create_or_replace(def("id: r\npath: /x\nresponses: [{}]"))
            .await
            .unwrap();
        let renamed = store.replace("r", def("id: other\npath: /x\nresponses: [{}]")).await;
        assert!(matches!(renamed, Err(StubError::InvalidRouteConfig(_))));

        let route = store.replace("r", def("path: /y\nresponses: [{}]")).await.unwrap();
        assert_eq!(route.id(), "r");
        assert!(store.find_match("/y", "GET", "").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("id: r\npath: /x\nresponses: [{}]"))
            .await
            .unwrap();

        tokio_test::assert_ok!(store.delete("r").await);
        assert!(store.is_empty().await);
        let missing = tokio_test::assert_err!(store.delete("r").await);
        assert!(matches!(missing, StubError::RouteNotFound(_)));
        assert!(matches!(store.get("r").await, Err(StubError::RouteNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_route_is_not_stored() {
        let store = RouteStore::new();
        let result = store.create_or_replace(def("path: /x\nresponses: []")).await;
        assert!(matches!(result, Err(StubError::InvalidRouteConfig(_))));
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_duplicate_response_ids_name_the_generated_route_id() {
        let result = Route::new(def("path: /x\nresponses: [{id: a}, {id: a}]"));
        match result {
            Err(StubError::DuplicateResponseId { route, response }) => {
                assert!(!route.is_empty());
                assert_ne!(route, "<unnamed>");
                assert_eq!(response, "a");
            }
            other => panic!(
                "Expected DuplicateResponseId, got {:?}",
                other.map(|r| r.id().to_string())
            ),
        }
    }

    #[tokio::test]
    async fn test_reset_is_all_or_nothing() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("id: keep\npath: /x\nresponses: [{}]"))
            .await
            .unwrap();

        let bad = vec![
            def("id: a\npath: /a\nresponses: [{}]"),
            def("id: b\npath: /b\nresponses: []"),
        ];
        assert!(store.reset(bad).await.is_err());
        assert!(store.get("keep").await.is_ok());

        let dup = vec![
            def("id: a\npath: /a\nresponses: [{}]"),
            def("id: a\npath: /b\nresponses: [{}]"),
        ];
        assert!(store.reset(dup).await.is_err());

        let good = vec![def("id: a\npath: /a\nresponses: [{}]")];
        store.reset(good).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.get("keep").await.is_err());

        store.clear().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_exhausted_route_still_matches() {
        let store = RouteStore::new();
        store
            .create_or_replace(def("id: once\npath: /x\nresponses: [{repeat: 1}]"))
            .await
            .unwrap();
        store
            .create_or_replace(def("id: later\npath: /x\nresponses: [{}]"))
            .await
            .unwrap();

        let route = store.find_match("/x", "GET", "").await.unwrap();
        route.select().await.unwrap();

        let again = store.find_match("/x", "GET", "").await.unwrap();
        assert_eq!(again.id(), "once");
        assert!(matches!(
            again.select().await,
            Err(StubError::PoolExhausted(id)) if id == "once"
        ));
    }

    #[tokio::test]
    async fn test_view_reports_counters() {
        let store = RouteStore::new();
        let route = store
            .create_or_replace(def("id: r\npath: /x\nresponses: [{id: a, repeat: 1}, {id: b}]"))
            .await
            .unwrap();
        route.select().await.unwrap();

        let view = route.view().await;
        assert_eq!(view.used_count, 1);
        assert!(view.is_active);
        assert_eq!(view.responses[0].used_count, 1);
        assert!(!view.responses[0].is_active);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["id"], "r");
        assert_eq!(json["path"], "/x");
        assert_eq!(json["used_count"], 1);
        assert_eq!(json["response_states"][1]["id"], "b");
    }

    #[tokio::test]
    async fn test_seeded_routes_are_reproducible() {
        let yaml = "id: r\npath: /x\nresponse_selection: random\nresponses: [{id: a}, {id: b}, {id: c}]";
        let mut runs = Vec::new();
        for _ in 0..2 {
            let store = RouteStore::new();
            store.insert(Arc::new(Route::with_seed(def(yaml), 42).unwrap())).await;
            let route = store.get("r").await.unwrap();
            let mut picked = Vec::new();
            for _ in 0..20 {
                picked.push(route.select().await.unwrap().id.clone());
            }
            runs.push(picked);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[tokio::test]
    async fn test_concurrent_selection_respects_repeat() {
        let store = Arc::new(RouteStore::new());
        store
            .create_or_replace(def("id: r\npath: /x\nresponses: [{id: a, repeat: 50}]"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let route = store.find_match("/x", "GET", "").await.unwrap();
                route.select().await.is_ok()
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 50);
    }
}
