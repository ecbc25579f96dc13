//! External HTTP entry point: host/path routing, rate limiting, auth
//! presence checks, and backend dispatch.

pub mod auth;
pub mod error;
pub mod http;
pub mod matcher;
pub mod ratelimit;
pub mod router;
pub mod types;

pub use error::{IngressError, Result};
pub use ratelimit::{InMemoryRateLimiter, RateLimitStore, RateLimiter};
pub use router::{BackendDispatcher, IngressRouter, RoutedResponse};
pub use types::*;
