//! HTTP server: wiring, handlers and lifecycle
//!
//! [`ServerBuilder`] assembles a [`ServerHost`] (store, rate limiting, cache
//! validation) and exposes it over REST behind the governance chain.

pub mod builder;
pub mod exposure;
pub mod handlers;
pub mod host;
pub mod router;
pub mod state;

pub use builder::ServerBuilder;
pub use exposure::RestExposure;
pub use host::ServerHost;
pub use router::{V1, V2, build_version_router};
pub use state::AppState;
