//! The per-request aggregate handlers operate on.
//!
//! # Responsibilities
//! - Own the inbound request, its cookies and (once buffered) its body
//! - Hold the sticky error state and the lazily parsed view model
//! - View-model, query and cookie helpers used by handlers
//!
//! A `RequestContext` is created by extraction, exclusively owned by one
//! handler invocation and consumed by one of the `write_*` methods.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequest, Request};
use axum::http::header::{self, HeaderValue};
use axum::http::request::Parts;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, Method, Uri};
use serde_json::{Map, Value};
use url::form_urlencoded;

use super::auth::AuthState;
use super::error::{ErrorKind, Flow};
use super::interpret::{Payload, UpstreamResponse};
use super::timing::ServerTiming;
use crate::device;
use crate::http::cookies::{CookieJar, SetCookie};
use crate::http::server::AppState;

/// Query keys never persisted by [`RequestContext::query_cookie`].
pub const VOLATILE_QUERY_KEYS: [&str; 7] =
    ["after", "before", "tag", "sort", "section", "query", "to"];

/// Lifetime of saved query state.
const QUERY_COOKIE_MAX_AGE: i64 = 60 * 60 * 24 * 90;

const REQUESTED_WITH: &str = "x-requested-with";
const ERROR_TYPE: &str = "x-error-type";

/// Inbound body, buffered on first need.
#[derive(Debug)]
pub(crate) enum InboundBody {
    Pending(Body),
    Buffered(Bytes),
}

pub struct RequestContext {
    pub(crate) state: AppState,
    pub(crate) parts: Parts,
    pub(crate) body: InboundBody,
    pub(crate) jar: CookieJar,
    pub(crate) auth: AuthState,
    pub(crate) error: Option<ErrorKind>,
    pub(crate) upstream: Option<UpstreamResponse>,
    pub(crate) payload: Payload,
    pub(crate) timing: ServerTiming,
    pub(crate) csrf_tokens: Vec<(String, String)>,
    pub(crate) redirect_to: Option<String>,
    pub(crate) response_headers: HeaderMap,
}

impl RequestContext {
    /// Wrap an inbound request. Runs the entry refresh check, which may
    /// leave the context already `Redirected`.
    pub fn new(state: AppState, request: Request) -> Self {
        let (parts, body) = request.into_parts();
        let jar = CookieJar::from_headers(&parts.headers);
        let auth = AuthState::from_cookies(&jar, &state.config.cookies);

        let mut ctx = Self {
            state,
            parts,
            body: InboundBody::Pending(body),
            jar,
            auth,
            error: None,
            upstream: None,
            payload: Payload::NotFetched,
            timing: ServerTiming::new(),
            csrf_tokens: Vec::new(),
            redirect_to: None,
            response_headers: HeaderMap::new(),
        };
        ctx.refresh_auth();
        ctx
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.error
    }

    /// Record `kind` unless an error is already set.
    pub(crate) fn fail(&mut self, kind: ErrorKind) {
        if self.error.is_none() {
            self.error = Some(kind);
        }
    }

    /// `Ok` while no error is set.
    pub(crate) fn proceed(&self) -> Flow {
        match self.error {
            Some(kind) => Err(kind),
            None => Ok(()),
        }
    }

    /// Forget a tolerated failure. A decided redirect stays.
    pub fn skip_error(&mut self) {
        if self.error != Some(ErrorKind::Redirected) {
            self.error = None;
        }
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.jar.get(name)
    }

    pub fn timing(&self) -> &ServerTiming {
        &self.timing
    }

    pub fn is_get(&self) -> bool {
        self.parts.method == Method::GET
    }

    pub fn is_ajax(&self) -> bool {
        self.header(REQUESTED_WITH)
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
    }

    /// Caller asked for JSON error bodies.
    pub fn expects_json_error(&self) -> bool {
        self.header(ERROR_TYPE)
            .is_some_and(|v| v.eq_ignore_ascii_case("json"))
    }

    /// Request addressed to the public web domain.
    pub fn is_web_request(&self) -> bool {
        let host = self
            .header(header::HOST.as_str())
            .or_else(|| self.parts.uri.authority().map(|a| a.as_str()));
        host.is_some_and(|h| h.eq_ignore_ascii_case(&self.state.config.web.domain))
    }

    /// `X-Forwarded-For` when present, else the socket peer.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            return forwarded.trim().to_string();
        }
        self.parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default()
    }

    pub fn is_large_screen(&self) -> bool {
        device::is_large_screen(
            self.cookie(&self.state.config.cookies.viewport_width),
            self.header(header::USER_AGENT.as_str()).unwrap_or_default(),
            self.state.classifier.as_ref(),
            self.state.config.device.large_screen_width,
        )
    }

    /// Path plus query of the inbound request.
    pub fn request_target(&self) -> String {
        self.parts
            .uri
            .path_and_query()
            .map(PathAndQuery::to_string)
            .unwrap_or_else(|| self.parts.uri.path().to_string())
    }

    /// Queue a `Set-Cookie` for whatever response this request produces.
    pub fn set_cookie(&mut self, cookie: SetCookie) {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                self.response_headers.append(header::SET_COOKIE, value);
            }
            Err(err) => {
                tracing::warn!(cookie = %cookie.name, error = %err, "Dropping unrepresentable cookie");
            }
        }
    }

    /// Insert into the view model regardless of the error state.
    pub(crate) async fn put(&mut self, key: &str, value: Value) {
        self.data().await.insert(key.to_string(), value);
    }

    /// Set a view-model field; no-op once an error is set.
    pub async fn set_data(&mut self, key: &str, value: impl Into<Value>) {
        if self.error.is_some() {
            return;
        }
        self.put(key, value.into()).await;
    }

    /// Drop one view-model field; no-op once an error is set.
    pub async fn remove_data(&mut self, key: &str) {
        if self.error.is_some() {
            return;
        }
        self.data().await.remove(key);
    }

    /// Throw away the whole view model, upstream body included; no-op once
    /// an error is set.
    pub fn clear_data(&mut self) {
        if self.error.is_some() {
            return;
        }
        self.payload = Payload::Parsed(Map::new());
    }

    /// Copy query parameter `key` into `__<key>`, or `default` if absent.
    pub async fn set_data_from_query(&mut self, key: &str, default: &str) {
        let value = self
            .query_value(key)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string());
        self.set_data(&format!("__{key}"), value).await;
    }

    /// A field of the url-encoded request body, `""` when absent.
    pub async fn form_string(&mut self, key: &str) -> String {
        if self.error.is_some() {
            return String::new();
        }
        let Ok(body) = self.buffer_body().await else {
            return String::new();
        };
        form_value(&body, key).unwrap_or_default()
    }

    /// Replace the request body with url-encoded `args`.
    pub fn set_request_data<K, V>(&mut self, args: &[(K, V)])
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in args {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
        let encoded = Bytes::from(serializer.finish());

        self.parts.headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        self.body = InboundBody::Buffered(encoded);
    }

    /// Buffer the inbound body so it can be read and forwarded later.
    pub(crate) async fn buffer_body(&mut self) -> Flow<Bytes> {
        let pending = match std::mem::replace(&mut self.body, InboundBody::Buffered(Bytes::new())) {
            InboundBody::Buffered(bytes) => {
                self.body = InboundBody::Buffered(bytes.clone());
                return Ok(bytes);
            }
            InboundBody::Pending(body) => body,
        };

        match axum::body::to_bytes(pending, self.state.config.security.max_body_size).await {
            Ok(bytes) => {
                self.body = InboundBody::Buffered(bytes.clone());
                Ok(bytes)
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to read request body");
                self.put("code", Value::from(413)).await;
                self.put("message", Value::from("Request body is too large.")).await;
                self.fail(ErrorKind::Client);
                Err(ErrorKind::Client)
            }
        }
    }

    /// Decoded query pairs in request order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.parts
            .uri
            .query()
            .map(parse_query)
            .unwrap_or_default()
    }

    pub fn query_value(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Set `key` in the request query, returning its previous value.
    pub fn set_query(&mut self, key: &str, value: &str) -> Option<String> {
        let mut grouped = group_pairs(self.query_pairs());
        let old = grouped
            .insert(key.to_string(), vec![value.to_string()])
            .and_then(|values| values.into_iter().next());
        self.replace_query(&encode_grouped(&grouped));
        old
    }

    /// [`query_cookie_named`](Self::query_cookie_named) keyed by the last
    /// path segment.
    pub fn query_cookie(&mut self) {
        let name = last_segment(self.parts.uri.path()).to_string();
        self.query_cookie_named(&name, "");
    }

    /// Merge query state saved in cookie `name` (or `default_query`) with
    /// the current query, current values winning. The request is rewritten
    /// to the merged query; the merge minus volatile keys is saved back.
    pub fn query_cookie_named(&mut self, name: &str, default_query: &str) {
        let saved = self.cookie(name).map(str::to_string);
        let mut merged = group_pairs(parse_query(saved.as_deref().unwrap_or(default_query)));
        merged.extend(group_pairs(self.query_pairs()));
        self.replace_query(&encode_grouped(&merged));

        merged.retain(|key, _| !VOLATILE_QUERY_KEYS.contains(&key.as_str()));
        let persisted = encode_grouped(&merged);
        if saved.as_deref() != Some(persisted.as_str()) {
            self.set_cookie(
                SetCookie::new(name, persisted)
                    .max_age(QUERY_COOKIE_MAX_AGE)
                    .lax(),
            );
        }
    }

    fn replace_query(&mut self, query: &str) {
        let path = self.parts.uri.path();
        let target = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };

        let mut uri_parts = self.parts.uri.clone().into_parts();
        match PathAndQuery::try_from(target) {
            Ok(path_and_query) => uri_parts.path_and_query = Some(path_and_query),
            Err(err) => {
                tracing::warn!(error = %err, "Rewritten query is not a valid URI");
                return;
            }
        }
        match Uri::from_parts(uri_parts) {
            Ok(uri) => self.parts.uri = uri,
            Err(err) => tracing::warn!(error = %err, "Rewritten query is not a valid URI"),
        }
    }
}

impl FromRequest<AppState> for RequestContext {
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self::new(state.clone(), request))
    }
}

pub(crate) fn parse_query(query: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(query.as_bytes()).into_owned().collect()
}

/// Pairs grouped by key; keys sorted, values in original order.
fn group_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key).or_default().push(value);
    }
    grouped
}

fn encode_grouped(grouped: &BTreeMap<String, Vec<String>>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in grouped {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Encode pairs sorted by key, keeping value order within a key.
pub(crate) fn encode_query(pairs: Vec<(String, String)>) -> String {
    encode_grouped(&group_pairs(pairs))
}

pub(crate) fn form_value(body: &[u8], key: &str) -> Option<String> {
    form_urlencoded::parse(body)
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

pub(crate) fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}
