//! Cookie parsing and `Set-Cookie` rendering.

use std::collections::HashMap;
use std::fmt;

use axum::http::{header, HeaderMap};

/// Cookies sent by the client, first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    values: HashMap<String, String>,
}

impl CookieJar {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut values = HashMap::new();

        for raw in headers.get_all(header::COOKIE) {
            let Ok(raw) = raw.to_str() else { continue };
            for part in raw.split(';') {
                let Some((key, value)) = part.trim().split_once('=') else { continue };
                let key = key.trim();
                if key.is_empty() {
                    continue;
                }
                values
                    .entry(key.to_string())
                    .or_insert_with(|| value.trim().trim_matches('"').to_string());
            }
        }

        Self { values }
    }

    /// Cookie value, or `None` when absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
}

/// A `Set-Cookie` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub same_site_lax: bool,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            domain: None,
            max_age: None,
            http_only: false,
            same_site_lax: false,
        }
    }

    /// An already-expired cookie that makes the browser drop `name`.
    pub fn removal(name: impl Into<String>, domain: Option<String>) -> Self {
        Self {
            domain,
            max_age: Some(0),
            http_only: true,
            ..Self::new(name, "")
        }
    }

    pub fn max_age(mut self, secs: i64) -> Self {
        self.max_age = Some(secs);
        self
    }

    pub fn lax(mut self) -> Self {
        self.same_site_lax = true;
        self
    }
}

impl fmt::Display for SetCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={max_age}")?;
            if max_age <= 0 {
                write!(f, "; Expires=Thu, 01 Jan 1970 00:00:00 GMT")?;
            }
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        if self.same_site_lax {
            write!(f, "; SameSite=Lax")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("at=tok; uid2=\"u-1\";bad; =x; at=second"));
        headers.append(header::COOKIE, HeaderValue::from_static("vpw=1280"));

        let jar = CookieJar::from_headers(&headers);
        assert_eq!(jar.get("at"), Some("tok"));
        assert_eq!(jar.get("uid2"), Some("u-1"));
        assert_eq!(jar.get("vpw"), Some("1280"));
        assert!(!jar.contains("bad"));
        assert_eq!(jar.get("missing"), None);
    }

    #[test]
    fn test_render_set_cookie() {
        let cookie = SetCookie::new("uid2", "abc").max_age(60).lax();
        assert_eq!(cookie.to_string(), "uid2=abc; Path=/; Max-Age=60; SameSite=Lax");

        let gone = SetCookie::removal("at", Some("example.com".into()));
        assert_eq!(
            gone.to_string(),
            "at=; Path=/; Domain=example.com; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly"
        );
    }
}
