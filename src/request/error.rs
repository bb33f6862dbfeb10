//! Per-request error taxonomy.

use thiserror::Error;

/// What went wrong (or what already happened) while serving a request.
///
/// The first kind recorded on a [`RequestContext`](super::RequestContext)
/// sticks; later operations short-circuit with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    #[error("transport error")]
    Transport,
    #[error("decode error")]
    Decode,
    #[error("client error")]
    Client,
    #[error("server error")]
    Server,
    #[error("csrf error")]
    Csrf,
    #[error("authorization required")]
    AuthRequired,
    /// A redirect has been decided; not a failure.
    #[error("redirected")]
    Redirected,
}

impl ErrorKind {
    /// Collapse internal failures into what the client is allowed to see.
    pub fn coarsen(self) -> Self {
        match self {
            ErrorKind::Transport | ErrorKind::Decode => ErrorKind::Server,
            other => other,
        }
    }

    /// `true` for kinds answered with a redirect and never a body.
    pub fn is_redirect(self) -> bool {
        matches!(self, ErrorKind::AuthRequired | ErrorKind::Redirected)
    }
}

/// Result of a step in the request pipeline.
pub type Flow<T = ()> = Result<T, ErrorKind>;
