//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, timeout, body limit)
//!     → middleware/access_log.rs (one log event per request)
//!     → routes.rs (handler builds a RequestContext)
//!     → cookies.rs (parse Cookie, render Set-Cookie)
//!     → Send to client
//! ```

pub mod cookies;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{AppState, BffServer, X_REQUEST_ID};
