//! Session identity and the refresh-redirect decision.
//!
//! # State
//! ```text
//! NoKey ──(access-token cookie)──▶ HasKey
//!
//! refresh markers (orthogonal):
//!     trr absent           → NotNeeded
//!     trr, trp absent      → NotPossible (continue unauthenticated)
//!     trr + trp            → Refresh (redirect to <auth>/refresh?to=...)
//! ```
//!
//! The entry check only runs for first-party, non-AJAX GETs. After an
//! upstream 401 the decision is re-evaluated without that gate and falls
//! back to the local entry page when refreshing is impossible.

use url::form_urlencoded;

use super::context::RequestContext;
use super::error::{ErrorKind, Flow};
use crate::config::CookieNames;
use crate::http::cookies::{CookieJar, SetCookie};

/// Lifetime of the persisted secondary-id cookie.
pub const SECONDARY_ID_MAX_AGE: i64 = 60 * 60 * 24 * 365 * 5;

/// Local page that starts a fresh login.
pub const ENTRY_PAGE: &str = "/index.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    NotNeeded,
    NotPossible,
    Refresh,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    access_token: Option<String>,
    secondary_id: Option<String>,
    secondary_id_from_cookie: bool,
    secondary_id_looked_up: bool,
    refresh_required: bool,
    refresh_possible: bool,
}

impl AuthState {
    pub fn from_cookies(jar: &CookieJar, names: &CookieNames) -> Self {
        let present = |name: &str| jar.get(name).filter(|v| !v.is_empty());
        let secondary_id = present(&names.secondary_id).map(str::to_string);

        Self {
            access_token: present(&names.access_token).map(str::to_string),
            secondary_id_from_cookie: secondary_id.is_some(),
            secondary_id,
            secondary_id_looked_up: false,
            refresh_required: jar.contains(&names.refresh_required),
            refresh_possible: jar.contains(&names.refresh_possible),
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn has_key(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn secondary_id(&self) -> Option<&str> {
        self.secondary_id.as_deref()
    }

    pub(crate) fn set_secondary_id(&mut self, id: String) {
        self.secondary_id = Some(id);
    }

    /// A looked-up secondary id still has to be written as a cookie.
    pub fn needs_secondary_cookie(&self) -> bool {
        !self.secondary_id_from_cookie && self.secondary_id.is_some()
    }

    pub fn refresh_decision(&self) -> RefreshDecision {
        match (self.refresh_required, self.refresh_possible) {
            (false, _) => RefreshDecision::NotNeeded,
            (true, false) => RefreshDecision::NotPossible,
            (true, true) => RefreshDecision::Refresh,
        }
    }

    /// Token sent upstream: the user's, else the process app token.
    pub fn bearer<'a>(&'a self, app_token: &'a str) -> &'a str {
        self.access_token.as_deref().unwrap_or(app_token)
    }
}

impl RequestContext {
    pub fn has_user_key(&self) -> bool {
        self.auth.has_key()
    }

    /// Entry check. Returns `true` when a refresh redirect was decided.
    pub(crate) fn refresh_auth(&mut self) -> bool {
        if !self.is_get() || self.is_ajax() || !self.is_web_request() {
            return false;
        }
        if self.auth.refresh_decision() != RefreshDecision::Refresh {
            return false;
        }

        let location = self.refresh_url();
        tracing::debug!(location = %location, "Access token needs refresh");
        self.redirect_to = Some(location);
        self.fail(ErrorKind::Redirected);
        true
    }

    /// Schedule re-authentication after a 401 or a missing token.
    pub(crate) fn request_refresh_auth(&mut self) {
        let location = match self.auth.refresh_decision() {
            RefreshDecision::Refresh => self.refresh_url(),
            _ => format!(
                "{}{}?to={}",
                self.state.config.web_base(),
                ENTRY_PAGE,
                self.next_redirect()
            ),
        };
        self.redirect_to = Some(location);
    }

    /// Url-encoded return target: the `to` query parameter, else the
    /// current path and query.
    pub fn next_redirect(&self) -> String {
        let target = self
            .query_value("to")
            .filter(|to| !to.is_empty())
            .unwrap_or_else(|| self.request_target());
        form_urlencoded::byte_serialize(target.as_bytes()).collect()
    }

    fn refresh_url(&self) -> String {
        format!("{}/refresh?to={}", self.state.config.auth_base(), self.next_redirect())
    }

    /// Make sure an access token is available for an upstream call.
    pub(crate) async fn resolve_user_key(&mut self, allow_no_key: bool) -> Flow {
        self.proceed()?;

        if self.auth.has_key() {
            self.ensure_secondary_id().await;
            return Ok(());
        }
        if allow_no_key {
            return Ok(());
        }

        self.request_refresh_auth();
        self.fail(ErrorKind::AuthRequired);
        Err(ErrorKind::AuthRequired)
    }

    /// Derive the secondary id from the access token, once per request.
    async fn ensure_secondary_id(&mut self) {
        if self.auth.secondary_id.is_some() || self.auth.secondary_id_looked_up {
            return;
        }
        self.auth.secondary_id_looked_up = true;

        let Some(token) = self.auth.access_token().map(str::to_string) else {
            return;
        };

        let forwarder = self.state.forwarder.clone();
        let started = std::time::Instant::now();
        let result = forwarder
            .lookup_secondary_id(&token, &self.parts.headers)
            .await;
        self.timing.record("uid2", started.elapsed());

        match result {
            Ok(Some(id)) => self.auth.set_secondary_id(id),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "Secondary id lookup failed"),
        }
    }

    /// Persist a looked-up secondary id. Called on render.
    pub(crate) fn persist_secondary_id(&mut self) {
        if !self.auth.needs_secondary_cookie() {
            return;
        }
        let Some(id) = self.auth.secondary_id().map(str::to_string) else {
            return;
        };

        let name = self.state.config.cookies.secondary_id.clone();
        self.set_cookie(SetCookie::new(name, id).max_age(SECONDARY_ID_MAX_AGE).lax());
        self.auth.secondary_id_from_cookie = true;
    }

    /// Expire the session cookies on the web and auth domains.
    pub fn clear_cookie_token(&mut self) {
        let config = self.state.config.clone();
        let names = &config.cookies;
        let web = cookie_domain(&config.web.domain);
        let auth = cookie_domain(&config.auth.domain);

        for name in [&names.access_token, &names.refresh_required, &names.refresh_possible] {
            self.set_cookie(SetCookie::removal(name.as_str(), web.clone()));
        }
        self.set_cookie(SetCookie::removal(names.refresh_token.as_str(), auth));
    }
}

/// Cookie `Domain` attribute for a configured domain; ports are not allowed
/// there and local hosts get a host-only cookie.
fn cookie_domain(domain: &str) -> Option<String> {
    let host = domain.split(':').next().unwrap_or_default();
    if host.is_empty() || host == "localhost" || host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    Some(host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::testing::{context, request};
    use axum::http::header;

    fn state(cookies: &str) -> AuthState {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(header::COOKIE, cookies.parse().unwrap());
        AuthState::from_cookies(&CookieJar::from_headers(&headers), &CookieNames::default())
    }

    #[test]
    fn test_refresh_decision_table() {
        assert_eq!(state("").refresh_decision(), RefreshDecision::NotNeeded);
        assert_eq!(state("trp=1").refresh_decision(), RefreshDecision::NotNeeded);
        assert_eq!(state("trr=1").refresh_decision(), RefreshDecision::NotPossible);
        assert_eq!(state("trr=1; trp=1").refresh_decision(), RefreshDecision::Refresh);
    }

    #[test]
    fn test_keys_and_bearer() {
        let anonymous = state("uid2=");
        assert!(!anonymous.has_key());
        assert_eq!(anonymous.secondary_id(), None);
        assert_eq!(anonymous.bearer("app"), "app");

        let user = state("at=tok; uid2=u-1");
        assert!(user.has_key());
        assert_eq!(user.bearer("app"), "tok");
        assert!(!user.needs_secondary_cookie());
    }

    #[test]
    fn test_entry_refresh_redirects() {
        let ctx = context(request("GET", "/feed?x=1", &[("cookie", "trr=1; trp=1")]));
        assert_eq!(ctx.error(), Some(ErrorKind::Redirected));
        assert_eq!(
            ctx.redirect_to.as_deref(),
            Some("http://localhost:8080/refresh?to=%2Ffeed%3Fx%3D1")
        );
    }

    #[test]
    fn test_entry_refresh_honours_to_param() {
        let ctx = context(request("GET", "/login?to=/me", &[("cookie", "trr=1; trp=1")]));
        assert_eq!(
            ctx.redirect_to.as_deref(),
            Some("http://localhost:8080/refresh?to=%2Fme")
        );
    }

    #[test]
    fn test_entry_refresh_is_gated() {
        for ctx in [
            context(request("GET", "/feed", &[])),
            context(request("GET", "/feed", &[("cookie", "trr=1")])),
            context(request("POST", "/feed", &[("cookie", "trr=1; trp=1")])),
            context(request(
                "GET",
                "/feed",
                &[("cookie", "trr=1; trp=1"), ("x-requested-with", "XMLHttpRequest")],
            )),
            context(request("GET", "/feed", &[("cookie", "trr=1; trp=1"), ("host", "other.example")])),
        ] {
            assert_eq!(ctx.error(), None);
            assert!(ctx.redirect_to.is_none());
        }
    }

    #[test]
    fn test_post_401_falls_back_to_entry_page() {
        let mut ctx = context(request("POST", "/entries/1/comments", &[]));
        ctx.request_refresh_auth();
        assert_eq!(
            ctx.redirect_to.as_deref(),
            Some("http://localhost:8080/index.html?to=%2Fentries%2F1%2Fcomments")
        );

        let mut ctx = context(request("POST", "/x", &[("cookie", "trr=1; trp=1")]));
        ctx.request_refresh_auth();
        assert_eq!(
            ctx.redirect_to.as_deref(),
            Some("http://localhost:8080/refresh?to=%2Fx")
        );
    }

    #[tokio::test]
    async fn test_missing_key_aborts_call() {
        let mut ctx = context(request("GET", "/me", &[]));
        assert_eq!(ctx.resolve_user_key(false).await, Err(ErrorKind::AuthRequired));
        assert_eq!(ctx.error(), Some(ErrorKind::AuthRequired));
        assert!(ctx.redirect_to.as_deref().unwrap().contains("/index.html?to=%2Fme"));

        let mut ctx = context(request("GET", "/me", &[]));
        assert_eq!(ctx.resolve_user_key(true).await, Ok(()));
    }

    #[test]
    fn test_secondary_cookie_written_once() {
        let mut ctx = context(request("GET", "/feed", &[("cookie", "at=tok")]));
        ctx.auth.set_secondary_id("u-9".into());
        ctx.persist_secondary_id();
        ctx.persist_secondary_id();

        let cookies: Vec<_> = ctx.response_headers.get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 1);
        assert_eq!(
            cookies[0].to_str().unwrap(),
            "uid2=u-9; Path=/; Max-Age=157680000; SameSite=Lax"
        );
    }

    #[test]
    fn test_clear_cookie_token() {
        let mut ctx = context(request("GET", "/logout", &[]));
        ctx.clear_cookie_token();

        let cookies: Vec<_> = ctx
            .response_headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 4);
        for (cookie, name) in cookies.iter().zip(["at=", "trr=", "trp=", "rt="]) {
            assert!(cookie.starts_with(name));
            assert!(cookie.contains("Max-Age=0"));
        }
    }

    #[test]
    fn test_cookie_domain() {
        assert_eq!(cookie_domain("example.com:443"), Some("example.com".into()));
        assert_eq!(cookie_domain("localhost:8080"), None);
        assert_eq!(cookie_domain("127.0.0.1:8080"), None);
    }
}
