//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Form render:
//!     → csrf.rs (issue token bound to action + client ip)
//! Form submit:
//!     → csrf.rs (verify signature, binding and expiry)
//! Upstream GET from a browser page:
//!     → fingerprint.rs (opaque X-App identity header)
//! ```
//!
//! # Design Decisions
//! - Signing material is built once at startup and shared read-only
//! - Fail closed: any token problem is a rejection

pub mod csrf;
pub mod fingerprint;

pub use csrf::{CsrfError, CsrfSigner, HmacCsrfSigner};
pub use fingerprint::FingerprintBuilder;
