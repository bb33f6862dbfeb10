//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handlers and the request pipeline produce:
//!     → logging.rs (structured tracing events, text or JSON)
//!     → metrics.rs (upstream round trips, rendered views)
//!
//! Consumers:
//!     → stdout log collection
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metrics recording is a no-op until an exporter is installed

pub mod logging;
pub mod metrics;
