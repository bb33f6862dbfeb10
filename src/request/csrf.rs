//! Form anti-forgery guard.
//!
//! Tokens are issued per (action, client ip) while rendering and checked on
//! submission. The body is buffered before the token is read and stays
//! buffered, so a later forward sends the exact bytes the client sent.

use axum::http::StatusCode;
use serde_json::Value;

use super::context::{form_value, last_segment, RequestContext};
use super::error::{ErrorKind, Flow};

/// Form field carrying the token.
pub const CSRF_FIELD: &str = "csrf";

/// Status and view code of a rejected submission.
pub const CSRF_STATUS: u16 = 419;

pub const CSRF_MESSAGE: &str = "The form has expired. Reload the page and try again.";

impl RequestContext {
    /// Issue a token for `action` (a form's target path); it is rendered
    /// under `__csrf_<last path segment>`.
    pub fn set_csrf_token(&mut self, action: &str) {
        let token = self.state.csrf.issue(action, &self.client_ip());
        let key = format!("__csrf_{}", last_segment(action));
        self.csrf_tokens.push((key, token));
    }

    /// Verify the submitted token against this request's path and client.
    pub async fn check_csrf_token(&mut self) -> Flow {
        self.proceed()?;

        let body = self.buffer_body().await?;
        let token = form_value(&body, CSRF_FIELD).unwrap_or_default();
        let action = self.parts.uri.path().to_string();
        let client = self.client_ip();

        match self.state.csrf.verify(&token, &action, &client) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(action = %action, client = %client, reason = %err, "CSRF check failed");
                self.put("code", Value::from(CSRF_STATUS)).await;
                self.put("message", Value::from(CSRF_MESSAGE)).await;
                self.fail(ErrorKind::Csrf);
                Err(ErrorKind::Csrf)
            }
        }
    }
}

/// HTTP status of a rejected submission.
pub fn csrf_status() -> StatusCode {
    StatusCode::from_u16(CSRF_STATUS).unwrap_or(StatusCode::FORBIDDEN)
}
