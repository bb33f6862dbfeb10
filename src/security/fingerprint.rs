//! Opaque browser fingerprint.
//!
//! Sent upstream as `X-App` and written to the access log. The value is a
//! digest; none of the underlying header or cookie values leave the process.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::config::schema::FingerprintConfig;
use crate::http::cookies::CookieJar;

/// Builds fingerprints from a fixed list of header and cookie fields.
#[derive(Debug, Clone, Default)]
pub struct FingerprintBuilder {
    headers: Vec<String>,
    cookies: Vec<String>,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &FingerprintConfig) -> Self {
        config
            .headers
            .iter()
            .fold(Self::new(), |b, h| b.with_header(h))
            .with_cookies(&config.cookies)
    }

    pub fn with_header(mut self, name: &str) -> Self {
        self.headers.push(name.to_ascii_lowercase());
        self
    }

    pub fn with_cookies(mut self, names: &[String]) -> Self {
        self.cookies.extend(names.iter().cloned());
        self
    }

    pub fn build(&self, headers: &HeaderMap, jar: &CookieJar) -> String {
        let mut hasher = Sha256::new();

        for name in &self.headers {
            let value = headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        for name in &self.cookies {
            hasher.update(b"cookie:");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(jar.get(name).unwrap_or_default().as_bytes());
            hasher.update(b"\n");
        }

        let digest = hasher.finalize();
        URL_SAFE_NO_PAD.encode(&digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(ua: &str, cookie: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("user-agent", HeaderValue::from_str(ua).unwrap());
        h.insert("cookie", HeaderValue::from_str(cookie).unwrap());
        h
    }

    #[test]
    fn test_stable_and_sensitive_to_fields() {
        let builder = FingerprintBuilder::from_config(&FingerprintConfig::default());

        let a = headers("agent/1", "dev=abc; tzo=180");
        let b = headers("agent/1", "dev=abc; tzo=180; unrelated=1");
        let c = headers("agent/1", "dev=xyz; tzo=180");
        let d = headers("agent/2", "dev=abc; tzo=180");

        let fa = builder.build(&a, &CookieJar::from_headers(&a));
        assert_eq!(fa.len(), 22);
        assert_eq!(fa, builder.build(&b, &CookieJar::from_headers(&b)));
        assert_ne!(fa, builder.build(&c, &CookieJar::from_headers(&c)));
        assert_ne!(fa, builder.build(&d, &CookieJar::from_headers(&d)));
    }
}
