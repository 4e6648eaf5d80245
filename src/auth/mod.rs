//! Bearer tokens for the Library API.
//!
//! Interactive consent is not handled here: the provider expects a token file
//! produced by a one-time authorization and keeps it fresh from then on.

pub mod error;
pub mod oauth;

pub use self::error::AuthError;
pub use self::oauth::OAuthTokenProvider;

/// Source of bearer tokens.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    /// A token valid for at least the next request.
    async fn token(&self) -> Result<String, AuthError>;

    /// Forget the cached access token after the service rejected it, so the
    /// next [`token`](Self::token) call refreshes.
    async fn invalidate(&self);
}
