use std::path::PathBuf;

use thiserror::Error;

/// Errors producing a bearer token for the Library API.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(
        "No OAuth token found at {0}; authorize the app once and place the resulting token.json there"
    )]
    MissingToken(PathBuf),

    #[error("Invalid authentication token: {0}")]
    InvalidToken(String),

    #[error("Token refresh failed (HTTP {status}): {message}")]
    Refresh { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
