//! Page and API handlers.
//!
//! Handlers stay thin: forward, adjust the view model, write. Everything
//! else lives on [`RequestContext`].

use axum::extract::Path;
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;

use crate::http::server::AppState;
use crate::request::auth::ENTRY_PAGE;
use crate::request::RequestContext;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/", get(index))
        .route("/feed", get(feed))
        .route("/entries/{id}", get(entry))
        .route("/entries/{id}/comments", post(post_comment))
        .route("/me", get(me))
        .route("/images/{*path}", get(image))
        .route("/logout", get(logout))
        .route("/api/{*path}", any(api))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn index(ctx: RequestContext) -> Response {
    if ctx.has_user_key() {
        ctx.redirect("/feed").await
    } else {
        ctx.redirect(ENTRY_PAGE).await
    }
}

async fn feed(mut ctx: RequestContext) -> Response {
    ctx.query_cookie();
    if ctx.forward_to("/entries/feed").await.is_ok() {
        ctx.set_scroll_hrefs().await;
    }
    ctx.write_template("feed").await
}

async fn entry(Path(id): Path<u64>, mut ctx: RequestContext) -> Response {
    if ctx.forward_to(&format!("/entries/{id}")).await.is_ok() {
        ctx.set_csrf_token(&format!("/entries/{id}/comments"));
    }
    ctx.write_template("entry").await
}

async fn post_comment(Path(id): Path<u64>, mut ctx: RequestContext) -> Response {
    if ctx.check_csrf_token().await.is_ok() {
        let _ = ctx.forward_to(&format!("/entries/{id}/comments")).await;
    }
    ctx.write_json().await
}

async fn me(mut ctx: RequestContext) -> Response {
    let _ = ctx.set_me().await;
    ctx.write_template("me").await
}

async fn image(mut ctx: RequestContext) -> Response {
    let _ = ctx.forward_images().await;
    ctx.write_response().await
}

async fn logout(mut ctx: RequestContext) -> Response {
    ctx.clear_cookie_token();
    ctx.redirect(ENTRY_PAGE).await
}

/// JSON passthrough for browser scripts: `/api/<path>` → `<prefix>/<path>`.
async fn api(mut ctx: RequestContext) -> Response {
    let path = ctx
        .uri()
        .path()
        .strip_prefix("/api")
        .unwrap_or("/")
        .to_string();
    let _ = ctx.forward_to(&path).await;
    ctx.write_json().await
}
