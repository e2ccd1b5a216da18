//! Zentinel Stub Server
//!
//! A configurable HTTP stub server. Operators register routes (path, method
//! and body matchers) together with a pool of candidate responses; incoming
//! traffic is matched to the first fitting route and answered with one
//! response picked from its pool.
//!
//! # Features
//!
//! - **Request Matching**: Full-match path regex, method, exact or regex body
//! - **Response Pools**: `cycle`, weighted `random` and `greedy` selection
//! - **Repeat Budgets**: Limit how many times each response may be served
//! - **Latency Simulation**: Fixed or uniformly random delays
//! - **Authentication**: Basic, cookie, HMAC, form and bearer token checks
//! - **Management API**: Create, replace, inspect and delete routes at runtime
//!
//! # Example Configuration
//!
//! ```yaml
//! routes:
//!   - id: ping
//!     path: /ping
//!     method: GET
//!     response_selection: cycle
//!     responses:
//!       - id: first
//!         repeat: 1
//!         body: "warming up"
//!       - status: 200
//!         body:
//!           message: pong
//!         delay: [0.1, 0.3]
//! ```

pub mod auth;
pub mod config;
pub mod delay;
pub mod dispatch;
pub mod error;
pub mod matcher;
pub mod pool;
pub mod request;
pub mod server;
pub mod store;

pub use config::StubServerConfig;
pub use dispatch::{Dispatch, Dispatcher, StubResponse};
pub use error::StubError;
pub use request::IncomingRequest;
pub use server::StubServer;
pub use store::RouteStore;
