//! Backend-for-frontend web server library.
//!
//! Wraps every inbound browser request in a [`RequestContext`] that resolves
//! the session, forwards to the REST API and renders HTML or JSON.

pub mod config;
pub mod device;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod request;
pub mod security;
pub mod templates;

pub use config::schema::BffConfig;
pub use error::StartupError;
pub use http::{AppState, BffServer};
pub use lifecycle::Shutdown;
pub use request::RequestContext;
