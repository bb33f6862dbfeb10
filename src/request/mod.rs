//! Per-request forwarding, authentication and rendering.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → context.rs (RequestContext, cookies, entry refresh check)
//!     → auth.rs (access token, secondary id, refresh redirect)
//!     → csrf.rs (form token check, body stays buffered)
//!     → forward.rs (one upstream round trip per call)
//!     → interpret.rs (status → ErrorKind, body parsed once)
//!     → pagination.rs (cursor hrefs)
//!     → render.rs (template / JSON / passthrough / redirect)
//!     → timing.rs (Server-Timing header at write time)
//! ```
//!
//! # Design Decisions
//! - Core steps return `Flow`; the first error recorded sticks
//! - `write_*` consume the context, so nothing runs after a response
//! - Shared state (config, classifier, signer) is read-only

pub mod auth;
pub mod context;
pub mod csrf;
pub mod error;
pub mod forward;
pub mod interpret;
pub mod pagination;
pub mod render;
pub mod timing;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthState, RefreshDecision};
pub use context::RequestContext;
pub use error::{ErrorKind, Flow};
pub use forward::{ForwardError, Forwarder, Upstream};
pub use interpret::{Payload, UpstreamResponse};
pub use pagination::{scroll_hrefs, ScrollHrefs};
pub use timing::ServerTiming;
