use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("request has no target host")]
    MissingHost,

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProxyError {
    /// Every failure to reach or read from the upstream is a bad gateway.
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_GATEWAY
    }
}

/// Only the canonical reason phrase reaches the client.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, status.canonical_reason().unwrap_or_default()).into_response()
    }
}
