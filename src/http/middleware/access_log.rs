//! Access log middleware.
//! One `info` event per request; the access token is reported by presence only.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::HttpBody,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::http::cookies::CookieJar;
use crate::http::server::AppState;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn content_length(headers: &HeaderMap) -> u64 {
    header_str(headers, header::CONTENT_LENGTH.as_str())
        .parse()
        .unwrap_or(0)
}

/// Bytes in the reply body; `Content-Length` when the body cannot tell.
fn reply_size(response: &Response) -> u64 {
    response
        .body()
        .size_hint()
        .exact()
        .unwrap_or_else(|| content_length(response.headers()))
}

pub async fn access_log_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();

    let headers = request.headers();
    let jar = CookieJar::from_headers(headers);
    let method = request.method().clone();
    let url = request.uri().to_string();
    let referrer = header_str(headers, header::REFERER.as_str()).to_string();
    let user_agent = header_str(headers, header::USER_AGENT.as_str()).to_string();
    let browser = state.fingerprint.build(headers, &jar);
    let device = jar
        .get(&state.config.cookies.device)
        .unwrap_or_default()
        .to_string();
    let has_token = jar.contains(&state.config.cookies.access_token);
    let request_size = content_length(headers);
    let ip = match header_str(headers, "x-forwarded-for") {
        "" => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_default(),
        forwarded => forwarded.to_string(),
    };

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        url = %url,
        referrer = %referrer,
        browser = %browser,
        user_agent = %user_agent,
        device = %device,
        has_token,
        ip = %ip,
        request_size,
        reply_size = reply_size(&response),
        status = response.status().as_u16(),
        duration_us = started.elapsed().as_micros() as u64,
        "http"
    );

    response
}
