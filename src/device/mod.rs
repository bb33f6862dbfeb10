//! Device and browser classification.
//!
//! # Data Flow
//! ```text
//! viewport-width cookie present and numeric?
//!     yes → width >= threshold
//!     no  → classifier.is_mobile(User-Agent) → !mobile
//! ```
//!
//! # Design Decisions
//! - Pattern tables are compiled once at startup and never mutated
//! - The classifier is a trait so deployments can swap datasets

pub mod patterns;

use regex::{Regex, RegexBuilder};

use crate::config::schema::DeviceConfig;

/// Decides whether a User-Agent belongs to a mobile device.
pub trait DeviceClassifier: Send + Sync + std::fmt::Debug {
    fn is_mobile(&self, user_agent: &str) -> bool;
}

/// Two-table classifier: a broad matcher over the whole agent string and a
/// matcher over its first four characters.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    full: Regex,
    prefix: Regex,
}

impl PatternClassifier {
    pub fn new(full_pattern: &str, prefix_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            full: RegexBuilder::new(full_pattern).case_insensitive(true).build()?,
            prefix: RegexBuilder::new(prefix_pattern).case_insensitive(true).build()?,
        })
    }

    pub fn from_config(config: &DeviceConfig) -> Result<Self, regex::Error> {
        Self::new(&config.full_pattern, &config.prefix_pattern)
    }
}

impl DeviceClassifier for PatternClassifier {
    fn is_mobile(&self, user_agent: &str) -> bool {
        if self.full.is_match(user_agent) {
            return true;
        }

        match user_agent.get(..4) {
            Some(head) => self.prefix.is_match(head),
            None => false,
        }
    }
}

/// Large-screen decision: an explicit viewport width wins over sniffing.
pub fn is_large_screen(
    viewport_width: Option<&str>,
    user_agent: &str,
    classifier: &dyn DeviceClassifier,
    threshold: u32,
) -> bool {
    if let Some(width) = viewport_width.and_then(|w| w.trim().parse::<u32>().ok()) {
        return width >= threshold;
    }

    !classifier.is_mobile(user_agent)
}
