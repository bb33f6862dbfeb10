//! `Server-Timing` accumulation.
//!
//! The request-wide `api` phase runs from context creation to header write;
//! named phases (one per upstream round trip) are appended in order.

use std::time::{Duration, Instant};

/// Header name emitted on every rendered or forwarded response.
pub const SERVER_TIMING: &str = "server-timing";

#[derive(Debug, Clone)]
pub struct ServerTiming {
    started: Instant,
    phases: Vec<(String, Duration)>,
}

impl ServerTiming {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phases: Vec::new(),
        }
    }

    pub fn record(&mut self, name: impl Into<String>, duration: Duration) {
        self.phases.push((name.into(), duration));
    }

    pub fn phases(&self) -> &[(String, Duration)] {
        &self.phases
    }

    /// Render the header value; `api` first, then phases in recording order.
    pub fn header_value(&self) -> String {
        std::iter::once(("api", self.started.elapsed()))
            .chain(self.phases.iter().map(|(name, d)| (name.as_str(), *d)))
            .map(|(name, d)| format!("{};dur={:.1}", name, d.as_secs_f64() * 1000.0))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ServerTiming {
    fn default() -> Self {
        Self::new()
    }
}
