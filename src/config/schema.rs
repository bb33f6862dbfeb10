//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the BFF.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::device::patterns::{DEFAULT_FULL_PATTERN, DEFAULT_PREFIX_PATTERN};

/// Root configuration for the web frontend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BffConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream REST API and image host.
    pub api: ApiConfig,

    /// Public protocol/domain this frontend is served under.
    pub web: SiteConfig,

    /// Protocol/domain of the auth service (refresh endpoint lives there).
    pub auth: SiteConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Cookie names.
    pub cookies: CookieNames,

    /// Large-screen detection.
    pub device: DeviceConfig,

    /// Fields mixed into the opaque browser fingerprint.
    pub fingerprint: FingerprintConfig,

    /// Template lookup.
    pub templates: TemplateConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    /// Exposes `__test` to templates.
    pub dev_mode: bool,
}

impl BffConfig {
    /// `proto://domain` of the public site.
    pub fn web_base(&self) -> String {
        self.web.base_url()
    }

    /// `proto://domain` of the auth service.
    pub fn auth_base(&self) -> String {
        self.auth.base_url()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Scheme used for every upstream call (plain "http").
    pub scheme: String,

    /// API host (e.g., "127.0.0.1:8000").
    pub host: String,

    /// Prefix prepended to every forwarded path.
    pub path_prefix: String,

    /// Host serving user images.
    pub image_host: String,

    /// Process-level token used for calls that allow anonymous access.
    pub app_token: String,

    /// Upstream path resolving the secondary id for an access token.
    pub secondary_id_path: String,

    /// Largest upstream body read into memory, in bytes.
    pub max_response_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1:8000".to_string(),
            path_prefix: "/api/v1".to_string(),
            image_host: "127.0.0.1:8001".to_string(),
            app_token: String::new(),
            secondary_id_path: "/account/uid2".to_string(),
            max_response_bytes: 16 * 1024 * 1024,
        }
    }
}

/// A public site: protocol plus domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    pub proto: String,
    pub domain: String,
}

impl SiteConfig {
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.proto, self.domain)
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            proto: "http".to_string(),
            domain: "localhost:8080".to_string(),
        }
    }
}

/// CSRF token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// HMAC key for token signatures.
    pub secret: String,

    /// Token lifetime in seconds.
    pub ttl_secs: u64,
}

/// Placeholder secret rejected by validation outside dev mode.
pub const PLACEHOLDER_CSRF_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            secret: PLACEHOLDER_CSRF_SECRET.to_string(),
            ttl_secs: 60 * 60 * 2,
        }
    }
}

/// Cookie names shared with the auth service and browser scripts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieNames {
    pub access_token: String,
    pub secondary_id: String,
    pub refresh_required: String,
    pub refresh_possible: String,
    pub refresh_token: String,
    pub device: String,
    pub uid: String,
    pub viewport_width: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            access_token: "at".to_string(),
            secondary_id: "uid2".to_string(),
            refresh_required: "trr".to_string(),
            refresh_possible: "trp".to_string(),
            refresh_token: "rt".to_string(),
            device: "dev".to_string(),
            uid: "uid".to_string(),
            viewport_width: "vpw".to_string(),
        }
    }
}

/// Device classification tables.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Viewport width (px) from which a screen counts as large.
    pub large_screen_width: u32,

    /// Matched against the whole User-Agent.
    pub full_pattern: String,

    /// Matched against the first four characters of the User-Agent.
    pub prefix_pattern: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            large_screen_width: 1199,
            full_pattern: DEFAULT_FULL_PATTERN.to_string(),
            prefix_pattern: DEFAULT_PREFIX_PATTERN.to_string(),
        }
    }
}

/// Browser fingerprint fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub headers: Vec<String>,
    pub cookies: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            headers: vec!["user-agent".to_string(), "accept-language".to_string()],
            cookies: vec!["dev".to_string(), "tzo".to_string()],
        }
    }
}

/// Template directory configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub dir: String,
    pub extension: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: "web/templates".to_string(),
            extension: "html".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total inbound request timeout in seconds.
    pub request_secs: u64,

    /// Single upstream round trip timeout in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            upstream_secs: 20,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
