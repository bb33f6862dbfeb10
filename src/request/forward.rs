//! Upstream forwarding.
//!
//! # Responsibilities
//! - Rewrite scheme, host and path to the configured upstream
//! - Replace inbound headers with a fixed allow-list
//! - Inject `Authorization` and, for browser page loads, identity headers
//! - Perform exactly one round trip per call, timed under a named span
//!
//! # Design Decisions
//! - No retries: a failed round trip is an immediate server error
//! - Network error text is logged, never surfaced to the client

use std::str::FromStr;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderValue, InvalidHeaderValue};
use axum::http::uri::{Authority, InvalidUri, Scheme};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use thiserror::Error;

use super::context::RequestContext;
use super::error::{ErrorKind, Flow};
use super::interpret::{decode_object, scalar_text, UpstreamResponse};
use crate::config::schema::{ApiConfig, TimeoutConfig};
use crate::observability::metrics;

/// Inbound headers copied onto upstream calls. `Content-Length` is derived
/// from the body actually sent.
pub const FORWARDED_HEADERS: [&str; 5] = [
    "accept",
    "content-type",
    "referer",
    "user-agent",
    "x-forwarded-for",
];

pub const X_DEV: &str = "x-dev";
pub const X_UID: &str = "x-uid";
pub const X_UID2: &str = "x-uid2";
pub const X_APP: &str = "x-app";
pub const X_LARGE_SCREEN: &str = "x-large-screen";

/// Field of the secondary-id lookup response.
const SECONDARY_ID_FIELD: &str = "uid2";

/// Generic message stored in the view model when the upstream is unreachable.
pub const SERVER_ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid upstream request: {0}")]
    Build(#[from] axum::http::Error),
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("failed to read upstream body: {0}")]
    Body(#[from] axum::Error),
    #[error("failed to decode upstream body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Which configured host a call goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Api,
    Images,
}

impl Upstream {
    pub fn label(self) -> &'static str {
        match self {
            Upstream::Api => "api",
            Upstream::Images => "images",
        }
    }
}

/// Headers describing the browser, sent on first-party page loads only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityHeaders {
    pub device: Option<String>,
    pub uid: Option<String>,
    pub secondary_id: Option<String>,
    pub fingerprint: String,
    pub large_screen: bool,
}

impl IdentityHeaders {
    fn apply(&self, headers: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        if let Some(device) = &self.device {
            headers.insert(X_DEV, HeaderValue::from_str(device)?);
        }
        if let Some(uid) = &self.uid {
            headers.insert(X_UID, HeaderValue::from_str(uid)?);
        }
        if let Some(secondary_id) = &self.secondary_id {
            headers.insert(X_UID2, HeaderValue::from_str(secondary_id)?);
        }
        headers.insert(X_APP, HeaderValue::from_str(&self.fingerprint)?);
        headers.insert(
            X_LARGE_SCREEN,
            HeaderValue::from_static(if self.large_screen { "true" } else { "false" }),
        );
        Ok(())
    }
}

/// One outbound call, described relative to the upstream path prefix.
#[derive(Debug)]
pub struct Outbound<'a> {
    pub upstream: Upstream,
    pub method: Method,
    /// Path below the prefix; a `?query` here replaces `query`.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub inbound: &'a HeaderMap,
    pub token: &'a str,
    pub identity: Option<&'a IdentityHeaders>,
    pub body: Bytes,
}

/// Shared upstream client plus the fixed upstream coordinates.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    scheme: Scheme,
    api_host: Authority,
    image_host: Authority,
    path_prefix: String,
    app_token: String,
    secondary_id_path: String,
    upstream_timeout: Duration,
    max_response_bytes: usize,
}

impl Forwarder {
    pub fn new(api: &ApiConfig, timeouts: &TimeoutConfig) -> Result<Self, InvalidUri> {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            client,
            scheme: Scheme::from_str(&api.scheme)?,
            api_host: Authority::from_str(&api.host)?,
            image_host: Authority::from_str(&api.image_host)?,
            path_prefix: api.path_prefix.trim_end_matches('/').to_string(),
            app_token: api.app_token.clone(),
            secondary_id_path: api.secondary_id_path.clone(),
            upstream_timeout: Duration::from_secs(timeouts.upstream_secs),
            max_response_bytes: api.max_response_bytes,
        })
    }

    pub fn app_token(&self) -> &str {
        &self.app_token
    }

    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    fn authority(&self, upstream: Upstream) -> &Authority {
        match upstream {
            Upstream::Api => &self.api_host,
            Upstream::Images => &self.image_host,
        }
    }

    /// Build the upstream request. Nothing from the inbound header set leaks
    /// through except [`FORWARDED_HEADERS`].
    pub fn build_request(&self, outbound: Outbound<'_>) -> Result<Request<Body>, ForwardError> {
        let (path, query) = match outbound.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (outbound.path, outbound.query),
        };

        let mut target = format!("{}{}", self.path_prefix, path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }

        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority(outbound.upstream).clone())
            .path_and_query(target)
            .build()?;

        let body_len = outbound.body.len();
        let mut request = Request::builder()
            .method(outbound.method)
            .uri(uri)
            .body(Body::from(outbound.body))?;

        let headers = request.headers_mut();
        for name in FORWARDED_HEADERS {
            if let Some(value) = outbound.inbound.get(name) {
                headers.insert(name, value.clone());
            }
        }
        if body_len > 0 {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body_len));
        }

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", outbound.token))?;
        bearer.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, bearer);

        if let Some(identity) = outbound.identity {
            identity.apply(headers)?;
        }

        Ok(request)
    }

    /// A single round trip bounded by the upstream timeout.
    pub async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, ForwardError> {
        match tokio::time::timeout(self.upstream_timeout, self.client.request(request)).await {
            Ok(result) => Ok(result?.map(Body::new)),
            Err(_) => Err(ForwardError::Timeout(self.upstream_timeout)),
        }
    }

    /// Ask the API which secondary id belongs to `token`.
    pub async fn lookup_secondary_id(
        &self,
        token: &str,
        inbound: &HeaderMap,
    ) -> Result<Option<String>, ForwardError> {
        let request = self.build_request(Outbound {
            upstream: Upstream::Api,
            method: Method::GET,
            path: &self.secondary_id_path,
            query: None,
            inbound,
            token,
            identity: None,
            body: Bytes::new(),
        })?;

        let response = self.round_trip(request).await?;
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "Secondary id lookup rejected");
            return Ok(None);
        }

        let mut upstream = UpstreamResponse::new(response);
        let bytes = upstream.read(self.max_response_bytes).await?;
        let view = decode_object(&bytes)?;
        Ok(view.get(SECONDARY_ID_FIELD).and_then(scalar_text))
    }
}

impl RequestContext {
    /// Forward the inbound request, same method and path, to the API.
    pub async fn forward(&mut self) -> Flow {
        let path = self.parts.uri.path().to_string();
        let method = self.parts.method.clone();
        self.method_forward_to(method, &path, false).await
    }

    /// Like [`forward`](Self::forward), falling back to the app token.
    pub async fn forward_no_key(&mut self) -> Flow {
        let path = self.parts.uri.path().to_string();
        let method = self.parts.method.clone();
        self.method_forward_to(method, &path, true).await
    }

    pub async fn forward_to(&mut self, path: &str) -> Flow {
        let method = self.parts.method.clone();
        self.method_forward_to(method, path, false).await
    }

    pub async fn forward_to_no_key(&mut self, path: &str) -> Flow {
        let method = self.parts.method.clone();
        self.method_forward_to(method, path, true).await
    }

    pub async fn method_forward_to(&mut self, method: Method, path: &str, allow_no_key: bool) -> Flow {
        self.round_trip(Upstream::Api, method, path, allow_no_key, "main", true)
            .await
    }

    /// Forward the inbound request to the image host. Needs the user's key.
    pub async fn forward_images(&mut self) -> Flow {
        let path = self.parts.uri.path().to_string();
        let method = self.parts.method.clone();
        self.round_trip(Upstream::Images, method, &path, false, "images", false)
            .await
    }

    /// GET `path` and store its object under `data[key]`, keeping the
    /// current payload.
    pub async fn set_field(&mut self, key: &str, path: &str) -> Flow {
        self.fetch_field(key, path, false).await
    }

    pub async fn set_field_no_key(&mut self, key: &str, path: &str) -> Flow {
        self.fetch_field(key, path, true).await
    }

    /// Current user profile under `data["me"]`.
    pub async fn set_me(&mut self) -> Flow {
        self.set_field("me", "/me").await
    }

    async fn fetch_field(&mut self, key: &str, path: &str, allow_no_key: bool) -> Flow {
        self.proceed()?;
        self.data().await;
        self.proceed()?;

        self.round_trip(Upstream::Api, Method::GET, path, allow_no_key, key, false)
            .await?;

        match self.read_upstream_object().await {
            Ok(field) => {
                self.payload
                    .view_mut()
                    .insert(key.to_string(), Value::Object(field));
                Ok(())
            }
            Err(kind) => {
                self.fail(kind);
                Err(kind)
            }
        }
    }

    /// Identity headers for this request, if it is a first-party page load.
    pub(crate) fn identity_headers(&self) -> Option<IdentityHeaders> {
        if !self.is_get() || self.is_ajax() || !self.is_web_request() {
            return None;
        }

        let names = &self.state.config.cookies;
        Some(IdentityHeaders {
            device: self.cookie(&names.device).map(str::to_string),
            uid: self.cookie(&names.uid).map(str::to_string),
            secondary_id: self.auth.secondary_id().map(str::to_string),
            fingerprint: self.state.fingerprint.build(&self.parts.headers, &self.jar),
            large_screen: self.is_large_screen(),
        })
    }

    async fn round_trip(
        &mut self,
        upstream: Upstream,
        method: Method,
        path: &str,
        allow_no_key: bool,
        span: &str,
        with_body: bool,
    ) -> Flow {
        self.resolve_user_key(allow_no_key).await?;

        let body = if with_body {
            self.buffer_body().await?
        } else {
            Bytes::new()
        };
        let identity = self.identity_headers();
        let token = self.auth.bearer(self.state.forwarder.app_token()).to_string();
        let query = self.parts.uri.query().map(str::to_string);

        let forwarder = self.state.forwarder.clone();
        let request = forwarder.build_request(Outbound {
            upstream,
            method: method.clone(),
            path,
            query: query.as_deref(),
            inbound: &self.parts.headers,
            token: &token,
            identity: identity.as_ref(),
            body,
        });

        let started = Instant::now();
        let result = match request {
            Ok(request) => forwarder.round_trip(request).await,
            Err(err) => Err(err),
        };
        let elapsed = started.elapsed();
        self.timing.record(span, elapsed);

        match result {
            Ok(response) => {
                metrics::record_upstream(upstream.label(), &method, response.status().as_u16(), elapsed);
                tracing::debug!(
                    method = %method,
                    path = %path,
                    upstream = upstream.label(),
                    status = %response.status(),
                    "Upstream responded"
                );
                self.upstream = Some(UpstreamResponse::new(response));
                self.interpret_status();
                self.proceed()
            }
            Err(err) => {
                metrics::record_upstream_failure(upstream.label(), &method);
                tracing::error!(
                    method = %method,
                    path = %path,
                    upstream = upstream.label(),
                    error = %err,
                    "Upstream request failed"
                );
                self.upstream = None;
                self.put("code", Value::from(500)).await;
                self.put("message", Value::from(SERVER_ERROR_MESSAGE)).await;
                self.fail(ErrorKind::Transport);
                Err(ErrorKind::Transport)
            }
        }
    }
}
