//! Upstream response interpretation.
//!
//! # Responsibilities
//! - Hold the upstream response and read its body at most once
//! - Decode the body into a JSON object (precision-preserving)
//! - Classify upstream status codes into [`ErrorKind`]s
//! - Resolve the numeric code shown on error views

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Response, StatusCode};
use serde_json::{Map, Value};

use super::context::RequestContext;
use super::error::ErrorKind;

/// The most recent upstream response of a request.
#[derive(Debug)]
pub struct UpstreamResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Body>,
    raw: Option<Bytes>,
}

impl UpstreamResponse {
    pub fn new(response: Response<Body>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body: Some(body),
            raw: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Read the whole body; later calls return the cached bytes.
    pub async fn read(&mut self, limit: usize) -> Result<Bytes, axum::Error> {
        if let Some(raw) = &self.raw {
            return Ok(raw.clone());
        }

        let body = self.body.take().unwrap_or_else(Body::empty);
        let bytes = axum::body::to_bytes(body, limit).await?;
        self.raw = Some(bytes.clone());
        Ok(bytes)
    }

    /// Status, headers and body, streaming the body if it was never read.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, Body) {
        let body = match (self.raw, self.body) {
            (Some(raw), _) => Body::from(raw),
            (None, Some(body)) => body,
            (None, None) => Body::empty(),
        };
        (self.status, self.headers, body)
    }
}

/// What the view model currently is.
#[derive(Debug, Default)]
pub enum Payload {
    /// The upstream body has not been looked at yet.
    #[default]
    NotFetched,
    Parsed(Map<String, Value>),
    /// Reading or decoding failed; the map still accepts fields.
    Failed(Map<String, Value>),
}

impl Payload {
    pub fn is_fetched(&self) -> bool {
        !matches!(self, Payload::NotFetched)
    }

    pub fn view(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::NotFetched => None,
            Payload::Parsed(map) | Payload::Failed(map) => Some(map),
        }
    }

    /// Mutable view model, creating an empty one when nothing was fetched.
    pub fn view_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            Payload::Parsed(map) | Payload::Failed(map) => map,
            Payload::NotFetched => {
                *self = Payload::Parsed(Map::new());
                self.view_mut()
            }
        }
    }

    pub fn into_view(self) -> Map<String, Value> {
        match self {
            Payload::NotFetched => Map::new(),
            Payload::Parsed(map) | Payload::Failed(map) => map,
        }
    }
}

/// Decode an upstream body. An empty body is an empty object.
pub fn decode_object(bytes: &[u8]) -> Result<Map<String, Value>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(bytes)
}

/// Upstream status → error kind; `None` for anything below 400.
pub fn classify_status(status: StatusCode) -> Option<ErrorKind> {
    match status.as_u16() {
        401 => Some(ErrorKind::AuthRequired),
        400..=499 => Some(ErrorKind::Client),
        500.. => Some(ErrorKind::Server),
        _ => None,
    }
}

/// Code for an error view: body `code`, else upstream status (when >= 400),
/// else 500.
pub fn resolve_error_code(view: &Map<String, Value>, status: Option<StatusCode>) -> Value {
    if let Some(code) = view.get("code").filter(|c| !c.is_null()) {
        return code.clone();
    }

    match status {
        Some(status) if status.as_u16() >= 400 => Value::from(status.as_u16()),
        _ => Value::from(500),
    }
}

/// Text of a string or number value; cursors and ids arrive as either.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RequestContext {
    /// The view model. The first call reads and decodes the upstream body;
    /// every later call returns the same map.
    pub async fn data(&mut self) -> &mut Map<String, Value> {
        if !self.payload.is_fetched() {
            self.payload = match self.read_upstream_object().await {
                Ok(view) => Payload::Parsed(view),
                Err(kind) => {
                    self.fail(kind);
                    Payload::Failed(Map::new())
                }
            };
        }
        self.payload.view_mut()
    }

    /// Upstream status, or 200 when nothing was forwarded.
    pub fn status_code(&self) -> StatusCode {
        self.upstream
            .as_ref()
            .map(UpstreamResponse::status)
            .unwrap_or(StatusCode::OK)
    }

    pub(crate) async fn read_upstream_object(&mut self) -> Result<Map<String, Value>, ErrorKind> {
        let limit = self.state.forwarder.max_response_bytes();
        let Some(upstream) = self.upstream.as_mut() else {
            return Ok(Map::new());
        };

        let bytes = upstream.read(limit).await.map_err(|err| {
            tracing::error!(error = %err, "Failed to read upstream body");
            ErrorKind::Transport
        })?;

        decode_object(&bytes).map_err(|err| {
            tracing::error!(
                error = %err,
                payload = %String::from_utf8_lossy(&bytes),
                "Failed to decode upstream body"
            );
            ErrorKind::Decode
        })
    }

    /// Map the upstream status onto the error state.
    pub(crate) fn interpret_status(&mut self) {
        let Some(kind) = classify_status(self.status_code()) else {
            return;
        };

        if let Some(prior) = self.error {
            tracing::warn!(prior = %prior, status = %self.status_code(), "Upstream error after earlier failure");
        }
        if kind == ErrorKind::AuthRequired {
            self.request_refresh_auth();
        }
        self.fail(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &'static str) -> UpstreamResponse {
        UpstreamResponse::new(
            Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_body_read_once_and_cached() {
        let mut upstream = response(200, r#"{"a":1}"#);
        let first = upstream.read(1024).await.unwrap();
        let second = upstream.read(1024).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&first[..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_read_respects_limit() {
        let mut upstream = response(200, "0123456789");
        assert!(upstream.read(4).await.is_err());
    }

    #[test]
    fn test_decode_preserves_big_numbers() {
        let view = decode_object(br#"{"id":123456789012345678901234567890,"f":0.1000000000000000055511}"#)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&view).unwrap(),
            r#"{"id":123456789012345678901234567890,"f":0.1000000000000000055511}"#
        );
    }

    #[test]
    fn test_decode_empty_and_garbage() {
        assert!(decode_object(b"").unwrap().is_empty());
        assert!(decode_object(b"  \n").unwrap().is_empty());
        assert!(decode_object(b"<html>").is_err());
        assert!(decode_object(b"[1,2]").is_err());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), None);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), None);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Some(ErrorKind::AuthRequired));
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Some(ErrorKind::Client));
        assert_eq!(classify_status(StatusCode::FORBIDDEN), Some(ErrorKind::Client));
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Some(ErrorKind::Server));
    }

    #[test]
    fn test_error_code_precedence() {
        let mut view = Map::new();
        assert_eq!(resolve_error_code(&view, Some(StatusCode::NOT_FOUND)), json!(404));
        assert_eq!(resolve_error_code(&view, Some(StatusCode::OK)), json!(500));
        assert_eq!(resolve_error_code(&view, None), json!(500));

        view.insert("code".into(), json!(4042));
        assert_eq!(resolve_error_code(&view, Some(StatusCode::NOT_FOUND)), json!(4042));
    }

    #[test]
    fn test_payload_view_mut_creates_map() {
        let mut payload = Payload::default();
        assert!(!payload.is_fetched());
        payload.view_mut().insert("k".into(), json!(1));
        assert!(payload.is_fetched());
        assert_eq!(payload.into_view().get("k"), Some(&json!(1)));
    }
}
