//! Error kinds surfaced by the stub engine.

use thiserror::Error;

/// Errors raised by route management and request dispatch.
#[derive(Debug, Error)]
pub enum StubError {
    /// A management operation referenced an unknown route id.
    #[error("Route \"{0}\" doesn't exist")]
    RouteNotFound(String),

    /// No registered route accepts the incoming request.
    #[error("No matching route found")]
    NoMatch,

    /// Every response of the matched route used up its repeat budget.
    #[error("Route \"{0}\" has no active responses left")]
    PoolExhausted(String),

    /// The request failed the route's authentication method.
    #[error("Authentication failed: {0}")]
    Unauthenticated(String),

    /// A route definition was rejected at creation time.
    #[error("Invalid route configuration: {0}")]
    InvalidRouteConfig(String),

    /// Two responses of one route share an id.
    #[error("Duplicate response id \"{response}\" in route \"{route}\"")]
    DuplicateResponseId { route: String, response: String },
}

impl StubError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StubError::InvalidRouteConfig(msg.into())
    }

    /// Whether the error stems from a rejected route definition.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            StubError::InvalidRouteConfig(_) | StubError::DuplicateResponseId { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StubError>;
