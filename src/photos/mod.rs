//! Google Photos Library API.
//!
//! [`PhotosApi`] is the seam the upload engine talks to; every method is one
//! quota-charged request. [`GooglePhotosClient`] is the HTTP implementation.

pub mod client;
pub mod error;
#[cfg(test)]
pub mod fake;

use std::path::Path;

pub use self::client::GooglePhotosClient;
pub use self::error::{ApiError, FailureClass};

/// An album created by this application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAlbum {
    pub id: String,
    pub title: String,
}

/// One page of the album listing.
#[derive(Debug, Clone, Default)]
pub struct AlbumPage {
    pub albums: Vec<RemoteAlbum>,
    pub next_page_token: Option<String>,
}

#[async_trait::async_trait]
pub trait PhotosApi: Send + Sync {
    /// Upload raw file bytes, returning an upload token.
    async fn upload_bytes(&self, path: &Path, mime_type: &str) -> Result<String, ApiError>;

    /// Turn an upload token into a library item, returning its id.
    async fn create_media_item(
        &self,
        upload_token: &str,
        file_name: &str,
    ) -> Result<String, ApiError>;

    async fn create_album(&self, title: &str) -> Result<String, ApiError>;

    /// One page of the albums created by this application.
    async fn list_albums(&self, page_token: Option<&str>) -> Result<AlbumPage, ApiError>;

    async fn add_media_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<(), ApiError>;
}
