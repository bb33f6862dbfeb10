//! Response rendering.
//!
//! # View selection
//! ```text
//! error state      view            status
//! none             requested       upstream status (200 without upstream)
//! client           "error"         upstream status
//! server/transport "server_error"  500
//! csrf             "error"         419
//! auth/redirected  303 to the pending target, no body
//! ```
//!
//! Error views fall back to JSON when the caller sent `X-Error-Type: JSON`
//! or the request is not for the web domain.

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;

use super::auth::ENTRY_PAGE;
use super::csrf::csrf_status;
use super::error::ErrorKind;
use super::interpret::{resolve_error_code, UpstreamResponse};
use super::timing::SERVER_TIMING;
use super::RequestContext;
use crate::observability::metrics;

pub const ERROR_VIEW: &str = "error";
pub const SERVER_ERROR_VIEW: &str = "server_error";

const HTML: &str = "text/html; charset=utf-8";
const JSON: &str = "application/json";
const REFERRER_POLICY: &str = "strict-origin";
const NO_STORE: &str = "no-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChoice<'a> {
    Redirect,
    Render {
        view: &'a str,
        status: Option<StatusCode>,
    },
}

/// Pick the view for the current error state.
pub fn choose_view(error: Option<ErrorKind>, requested: &str) -> ViewChoice<'_> {
    match error.map(ErrorKind::coarsen) {
        None => ViewChoice::Render {
            view: requested,
            status: None,
        },
        Some(ErrorKind::Client) => ViewChoice::Render {
            view: ERROR_VIEW,
            status: None,
        },
        Some(ErrorKind::Csrf) => ViewChoice::Render {
            view: ERROR_VIEW,
            status: Some(csrf_status()),
        },
        Some(ErrorKind::AuthRequired | ErrorKind::Redirected) => ViewChoice::Redirect,
        Some(_) => ViewChoice::Render {
            view: SERVER_ERROR_VIEW,
            status: Some(StatusCode::INTERNAL_SERVER_ERROR),
        },
    }
}

impl RequestContext {
    /// Render `name`, or the view the error state calls for.
    pub async fn write_template(mut self, name: &str) -> Response {
        self.data().await;

        let (view, forced) = match choose_view(self.error, name) {
            ViewChoice::Redirect => return self.redirect_response(),
            ViewChoice::Render { view, status } => (view.to_string(), status),
        };

        let failed = self.error.is_some();
        if failed {
            self.fill_error_code();
        }
        let status = self.view_status(forced);

        if failed && (self.expects_json_error() || !self.is_web_request()) {
            return self.json_response(status);
        }

        self.inject_view_fields();
        self.persist_secondary_id();

        let view_model = std::mem::take(&mut self.payload).into_view();
        match self.state.templates.render(&view, &view_model) {
            Ok(html) => {
                metrics::record_render(&view, status.as_u16());
                self.finish(status, HTML, Body::from(html))
            }
            Err(err) => {
                tracing::error!(template = %view, error = %err, "Failed to render template");
                metrics::record_render(&view, 500);
                self.finish(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain; charset=utf-8",
                    Body::from("Internal Server Error"),
                )
            }
        }
    }

    /// The view model as JSON, status mirrored from upstream.
    pub async fn write_json(mut self) -> Response {
        self.data().await;

        let forced = match choose_view(self.error, "") {
            ViewChoice::Redirect => return self.redirect_response(),
            ViewChoice::Render { status, .. } => status,
        };
        if self.error.is_some() {
            self.fill_error_code();
        }

        let status = self.view_status(forced);
        self.json_response(status)
    }

    /// Upstream status, headers and body, untouched.
    pub async fn write_response(mut self) -> Response {
        if self.error.is_some_and(ErrorKind::is_redirect) {
            return self.redirect_response();
        }
        let Some(upstream) = self.upstream.take() else {
            return self.write_json().await;
        };

        let (status, upstream_headers, body) = upstream.into_parts();
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = upstream_headers;

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        self.apply_common_headers(headers);
        response
    }

    /// 303 to `path` on the web site.
    pub async fn redirect(self, path: &str) -> Response {
        let url = format!("{}{}", self.state.config.web_base(), path);
        self.redirect_to_url(url).await
    }

    /// 303 to `path` on the auth service.
    pub async fn redirect_to_auth(self, path: &str) -> Response {
        let url = format!("{}{}", self.state.config.auth_base(), path);
        self.redirect_to_url(url).await
    }

    /// 303 to the local `to` query target, else to `default`.
    pub async fn redirect_query(self, default: &str) -> Response {
        let target = self
            .query_value("to")
            .filter(|to| to.starts_with('/') && !to.starts_with("//"))
            .unwrap_or_else(|| default.to_string());
        self.redirect(&target).await
    }

    async fn redirect_to_url(mut self, url: String) -> Response {
        match self.error {
            Some(kind) if !kind.is_redirect() => return self.write_template(ERROR_VIEW).await,
            Some(_) => {}
            None => {
                self.redirect_to = Some(url);
                self.fail(ErrorKind::Redirected);
            }
        }
        self.redirect_response()
    }

    fn redirect_response(self) -> Response {
        let location = self
            .redirect_to
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.state.config.web_base(), ENTRY_PAGE));

        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::SEE_OTHER;

        let headers = response.headers_mut();
        match HeaderValue::from_str(&location) {
            Ok(value) => {
                headers.insert(header::LOCATION, value);
            }
            Err(err) => tracing::error!(location = %location, error = %err, "Invalid redirect target"),
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        self.apply_common_headers(headers);
        response
    }

    fn json_response(mut self, status: StatusCode) -> Response {
        let view_model = std::mem::take(&mut self.payload).into_view();
        match serde_json::to_vec(&view_model) {
            Ok(body) => self.finish(status, JSON, Body::from(body)),
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode view model");
                self.finish(StatusCode::INTERNAL_SERVER_ERROR, JSON, Body::from("{}"))
            }
        }
    }

    fn finish(self, status: StatusCode, content_type: &'static str, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::REFERRER_POLICY, HeaderValue::from_static(REFERRER_POLICY));
        self.apply_common_headers(headers);
        response
    }

    /// `Server-Timing` plus any queued cookies.
    fn apply_common_headers(&self, headers: &mut HeaderMap) {
        if let Ok(timing) = HeaderValue::from_str(&self.timing.header_value()) {
            headers.insert(SERVER_TIMING, timing);
        }
        for (name, value) in &self.response_headers {
            headers.append(name, value.clone());
        }
    }

    fn fill_error_code(&mut self) {
        let status = self.upstream.as_ref().map(UpstreamResponse::status);
        let view = self.payload.view_mut();
        let code = resolve_error_code(view, status);
        view.insert("code".to_string(), code);
    }

    fn view_status(&self, forced: Option<StatusCode>) -> StatusCode {
        if let Some(status) = forced {
            return status;
        }
        let status = self.status_code();
        if self.error.is_some() && !(status.is_client_error() || status.is_server_error()) {
            // client error raised locally, not by the upstream
            return StatusCode::BAD_REQUEST;
        }
        status
    }

    fn inject_view_fields(&mut self) {
        let config = self.state.config.clone();
        let mut fields = vec![
            ("__large_screen".to_string(), Value::from(self.is_large_screen())),
            ("__proto".to_string(), Value::from(config.web.proto.clone())),
            ("__domain".to_string(), Value::from(config.web.domain.clone())),
            ("__to_url".to_string(), Value::from(self.next_redirect())),
            ("__logged_in".to_string(), Value::from(self.has_user_key())),
            ("__auth_url".to_string(), Value::from(config.auth_base())),
        ];
        if config.dev_mode {
            fields.push(("__test".to_string(), Value::from(true)));
        }
        fields.extend(
            std::mem::take(&mut self.csrf_tokens)
                .into_iter()
                .map(|(key, token)| (key, Value::from(token))),
        );

        self.payload.view_mut().extend(fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::testing::{body_string, context, request, upstream, view_of};
    use serde_json::json;

    #[test]
    fn test_choose_view() {
        let render = |view, status| ViewChoice::Render { view, status };
        assert_eq!(choose_view(None, "feed"), render("feed", None));
        assert_eq!(choose_view(Some(ErrorKind::Client), "feed"), render("error", None));
        assert_eq!(
            choose_view(Some(ErrorKind::Csrf), "feed"),
            render("error", Some(StatusCode::from_u16(419).unwrap()))
        );
        for kind in [ErrorKind::Server, ErrorKind::Transport, ErrorKind::Decode] {
            assert_eq!(
                choose_view(Some(kind), "feed"),
                render("server_error", Some(StatusCode::INTERNAL_SERVER_ERROR))
            );
        }
        assert_eq!(choose_view(Some(ErrorKind::AuthRequired), "feed"), ViewChoice::Redirect);
        assert_eq!(choose_view(Some(ErrorKind::Redirected), "feed"), ViewChoice::Redirect);
    }

    #[tokio::test]
    async fn test_renders_requested_view_with_common_fields() {
        let mut ctx = context(request("GET", "/entries/7", &[("cookie", "at=tok")]));
        ctx.upstream = Some(upstream(200, r#"{"id":7}"#));
        ctx.set_csrf_token("/entries/7/comments");

        let response = ctx.write_template("entry").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(response.headers()["content-type"], "text/html; charset=utf-8");
        assert_eq!(response.headers()["referrer-policy"], "strict-origin");
        assert!(response.headers()["server-timing"].to_str().unwrap().starts_with("api;dur="));

        let (view, model) = view_of(&body_string(response).await);
        assert_eq!(view, "entry");
        assert_eq!(model["id"], json!(7));
        assert_eq!(model["__logged_in"], json!(true));
        assert_eq!(model["__domain"], json!("localhost:8080"));
        assert_eq!(model["__auth_url"], json!("http://localhost:8080"));
        assert_eq!(model["__to_url"], json!("%2Fentries%2F7"));
        assert_eq!(model["__test"], json!(true));
        assert!(model["__csrf_comments"].as_str().is_some_and(|t| !t.is_empty()));
    }

    #[tokio::test]
    async fn test_client_error_code_from_status() {
        let mut ctx = context(request("GET", "/entries/7", &[]));
        ctx.upstream = Some(upstream(404, r#"{"message":"x"}"#));
        ctx.interpret_status();

        let response = ctx.write_template("entry").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let (view, model) = view_of(&body_string(response).await);
        assert_eq!(view, "error");
        assert_eq!(model["code"], json!(404));
        assert_eq!(model["message"], json!("x"));
    }

    #[tokio::test]
    async fn test_client_error_code_from_body() {
        let mut ctx = context(request("GET", "/entries/7", &[]));
        ctx.upstream = Some(upstream(404, r#"{"code":4042}"#));
        ctx.interpret_status();

        let (view, model) = view_of(&body_string(ctx.write_template("entry").await).await);
        assert_eq!(view, "error");
        assert_eq!(model["code"], json!(4042));
    }

    #[tokio::test]
    async fn test_server_error_forces_500() {
        let mut ctx = context(request("GET", "/feed", &[]));
        ctx.upstream = Some(upstream(503, ""));
        ctx.interpret_status();

        let response = ctx.write_template("feed").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let (view, model) = view_of(&body_string(response).await);
        assert_eq!(view, "server_error");
        assert_eq!(model["code"], json!(503));
    }

    #[tokio::test]
    async fn test_decode_error_is_server_error() {
        let mut ctx = context(request("GET", "/feed", &[]));
        ctx.upstream = Some(upstream(200, "<html>oops</html>"));

        let response = ctx.write_template("feed").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_string(response).await;
        assert!(!body.contains("oops"));
        let (view, model) = view_of(&body);
        assert_eq!(view, "server_error");
        assert_eq!(model["code"], json!(500));
    }

    #[tokio::test]
    async fn test_error_falls_back_to_json() {
        let mut ctx = context(request("GET", "/entries/7", &[("x-error-type", "JSON")]));
        ctx.upstream = Some(upstream(403, r#"{"message":"no"}"#));
        ctx.interpret_status();

        let response = ctx.write_template("entry").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()["content-type"], "application/json");
        let model: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(model, json!({"message": "no", "code": 403}));

        let mut ctx = context(request("GET", "/entries/7", &[("host", "api.example.com")]));
        ctx.upstream = Some(upstream(404, "{}"));
        ctx.interpret_status();
        let response = ctx.write_template("entry").await;
        assert_eq!(response.headers()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_auth_required_redirects_without_body() {
        let mut ctx = context(request("GET", "/me", &[("cookie", "at=old; trr=1; trp=1"), ("x-requested-with", "XMLHttpRequest")]));
        ctx.upstream = Some(upstream(401, r#"{"message":"expired"}"#));
        ctx.interpret_status();

        let response = ctx.write_template("me").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()["location"],
            "http://localhost:8080/refresh?to=%2Fme"
        );
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_entry_refresh_suppresses_rendering() {
        let ctx = context(request("GET", "/feed?after=10", &[("cookie", "trr=1; trp=1")]));
        let response = ctx.write_template("feed").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()["location"],
            "http://localhost:8080/refresh?to=%2Ffeed%3Fafter%3D10"
        );
        assert!(body_string(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_json_mirrors_status() {
        let mut ctx = context(request("GET", "/api/entries", &[]));
        ctx.upstream = Some(upstream(201, r#"{"id":12345678901234567890}"#));
        ctx.interpret_status();

        let response = ctx.write_json().await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert_eq!(body_string(response).await, r#"{"id":12345678901234567890}"#);
    }

    #[tokio::test]
    async fn test_write_response_passthrough() {
        let mut ctx = context(request("GET", "/images/a.png", &[]));
        ctx.upstream = Some(UpstreamResponse::new(
            Response::builder()
                .header("content-type", "image/png")
                .header("etag", "\"v1\"")
                .body(Body::from("PNG"))
                .unwrap(),
        ));

        let response = ctx.write_response().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert_eq!(response.headers()["etag"], "\"v1\"");
        assert_eq!(response.headers()["cache-control"], "no-store");
        assert!(response.headers().contains_key("server-timing"));
        assert_eq!(body_string(response).await, "PNG");
    }

    #[tokio::test]
    async fn test_redirect_helpers() {
        let ctx = context(request("GET", "/login?to=/me", &[]));
        let response = ctx.redirect_query("/feed").await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], "http://localhost:8080/me");

        let ctx = context(request("GET", "/login?to=//evil.example", &[]));
        let response = ctx.redirect_query("/feed").await;
        assert_eq!(response.headers()["location"], "http://localhost:8080/feed");

        let ctx = context(request("GET", "/x", &[]));
        let response = ctx.redirect_to_auth("/logout").await;
        assert_eq!(response.headers()["location"], "http://localhost:8080/logout");
    }

    #[tokio::test]
    async fn test_redirect_with_error_renders_error() {
        let mut ctx = context(request("GET", "/x", &[]));
        ctx.upstream = Some(upstream(404, "{}"));
        ctx.interpret_status();

        let response = ctx.redirect("/feed").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let (view, _) = view_of(&body_string(response).await);
        assert_eq!(view, "error");
    }

    #[tokio::test]
    async fn test_secondary_id_cookie_on_render() {
        let mut ctx = context(request("GET", "/feed", &[("cookie", "at=tok")]));
        ctx.auth.set_secondary_id("u-1".into());

        let response = ctx.write_template("feed").await;
        let cookie = response.headers()["set-cookie"].to_str().unwrap();
        assert!(cookie.starts_with("uid2=u-1; "));
    }
}
