use thiserror::Error;

/// Errors surfaced by a [`crate::reader::ResponseFactory`] when opening or
/// reading a connection, and by [`crate::reader::StreamReader`] itself.
#[derive(Debug, Error, Clone)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("resource not found (404)")]
    NotFound,

    #[error("bad request (400)")]
    BadRequest,

    #[error("line was not valid JSON: {0}")]
    Json(String),

    #[error("reader is already streaming")]
    AlreadyStreaming,

    #[error("exceeded {0} reconnect attempts")]
    MaxRetriesExceeded(u32),
}

impl StreamError {
    /// Worth retrying with backoff — a dropped connection, a timeout, some
    /// other transport hiccup (SPEC_FULL.md §4.B, step "classify").
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Transport(_) | StreamError::Timeout)
    }

    /// The resource the stream was opened against is gone or was never
    /// valid; whether that's fatal depends on `ignore_errors_if_removed`
    /// and whether the stream had ever started successfully.
    pub fn is_not_found_or_bad_request(&self) -> bool {
        matches!(self, StreamError::NotFound | StreamError::BadRequest)
    }
}
