//! Fixtures for context tests.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use serde_json::{Map, Value};

use super::interpret::UpstreamResponse;
use super::RequestContext;
use crate::config::BffConfig;
use crate::http::server::AppState;
use crate::templates::{TemplateEngine, TemplateError};

/// Renders `<name>\n<view model json>`.
pub(crate) struct EchoTemplates;

impl TemplateEngine for EchoTemplates {
    fn render(&self, name: &str, view: &Map<String, Value>) -> Result<Vec<u8>, TemplateError> {
        Ok(format!("{name}\n{}", serde_json::to_string(view)?).into_bytes())
    }
}

pub(crate) fn state() -> AppState {
    let config = BffConfig {
        dev_mode: true,
        ..BffConfig::default()
    };
    AppState::new(config, Arc::new(EchoTemplates)).unwrap()
}

/// A first-party request unless `headers` overrides `host`.
pub(crate) fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> Request {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost:8080")
        .body(Body::empty())
        .unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    request
}

pub(crate) fn context(request: Request) -> RequestContext {
    RequestContext::new(state(), request)
}

pub(crate) fn upstream(status: u16, body: &str) -> UpstreamResponse {
    UpstreamResponse::new(
        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
}

pub(crate) async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Split an [`EchoTemplates`] page into view name and view model.
pub(crate) fn view_of(page: &str) -> (String, Value) {
    let (name, json) = page.split_once('\n').unwrap();
    (name.to_string(), serde_json::from_str(json).unwrap())
}
