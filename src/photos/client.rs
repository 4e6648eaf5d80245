use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;

use super::{AlbumPage, ApiError, PhotosApi, RemoteAlbum};
use crate::auth::AuthProvider;

const API_BASE: &str = "https://photoslibrary.googleapis.com/v1";
const ALBUM_PAGE_SIZE: u32 = 50;
const CONNECT_TIMEOUT_SECS: u64 = 30;
/// JSON calls only; byte uploads of large videos are not bounded.
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<NewMediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItemResult {
    #[serde(default)]
    status: Option<ItemStatus>,
    #[serde(default)]
    media_item: Option<MediaItem>,
}

#[derive(Debug, Deserialize)]
struct ItemStatus {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumResource {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAlbumsResponse {
    #[serde(default)]
    albums: Vec<AlbumResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchAddRequest<'a> {
    media_item_ids: &'a [String],
}

/// Library API client authenticating every request through an
/// [`AuthProvider`].
pub struct GooglePhotosClient {
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    base_url: String,
}

impl GooglePhotosClient {
    pub fn new(auth: Arc<dyn AuthProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .user_agent(concat!("gphotos-backup/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            auth,
            base_url: API_BASE.to_string(),
        })
    }

    async fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        let token = self.auth.token().await?;
        Ok(builder.header(AUTHORIZATION, format!("Bearer {}", token)))
    }

    /// Send and map non-success statuses to [`ApiError`]. A 401 invalidates
    /// the cached token so the retry uses a fresh one.
    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let response = self.authorized(builder).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.auth.invalidate().await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_response(status.as_u16(), &body))
    }

    fn json_request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }
}

#[async_trait::async_trait]
impl PhotosApi for GooglePhotosClient {
    async fn upload_bytes(&self, path: &Path, mime_type: &str) -> Result<String, ApiError> {
        let io_err = |source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::debug!(path = %path.display(), size, "Uploading bytes");
        let builder = self
            .http
            .post(format!("{}/uploads", self.base_url))
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .header("X-Goog-Upload-Content-Type", mime_type)
            .header("X-Goog-Upload-File-Name", urlencoding::encode(&file_name).into_owned())
            .header("X-Goog-Upload-Protocol", HeaderValue::from_static("raw"))
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));

        let token = self.send(builder).await?.text().await?;
        let token = token.trim();
        if token.is_empty() {
            return Err(ApiError::Malformed("empty upload token".into()));
        }
        Ok(token.to_string())
    }

    async fn create_media_item(
        &self,
        upload_token: &str,
        file_name: &str,
    ) -> Result<String, ApiError> {
        let body = json!({
            "newMediaItems": [{
                "description": file_name,
                "simpleMediaItem": {
                    "uploadToken": upload_token,
                    "fileName": file_name,
                }
            }]
        });
        let builder = self
            .json_request(reqwest::Method::POST, "mediaItems:batchCreate")
            .json(&body);
        let response: BatchCreateResponse = self.send(builder).await?.json().await?;

        let result = response
            .new_media_item_results
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Malformed("batchCreate returned no results".into()))?;
        if let Some(item) = result.media_item {
            return Ok(item.id);
        }
        let message = result
            .status
            .map(|s| match (s.code, s.message) {
                (Some(code), Some(msg)) => format!("{} (code {})", msg, code),
                (_, Some(msg)) => msg,
                (Some(code), None) => format!("status code {}", code),
                (None, None) => "unknown error".to_string(),
            })
            .unwrap_or_else(|| "no media item in result".to_string());
        Err(ApiError::Rejected(message))
    }

    async fn create_album(&self, title: &str) -> Result<String, ApiError> {
        let builder = self
            .json_request(reqwest::Method::POST, "albums")
            .json(&json!({ "album": { "title": title } }));
        let album: AlbumResource = self.send(builder).await?.json().await?;
        tracing::debug!(album_id = %album.id, "Created album '{}'", title);
        Ok(album.id)
    }

    async fn list_albums(&self, page_token: Option<&str>) -> Result<AlbumPage, ApiError> {
        let mut query = vec![
            ("pageSize", ALBUM_PAGE_SIZE.to_string()),
            ("excludeNonAppCreatedData", "true".to_string()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let builder = self
            .json_request(reqwest::Method::GET, "albums")
            .query(&query);

        let response = match self.send(builder).await {
            Ok(r) => r,
            Err(ApiError::Http { status: 403, .. }) => {
                tracing::debug!("Album listing returned 403, treating as no app-created albums");
                return Ok(AlbumPage::default());
            }
            Err(e) => return Err(e),
        };
        let page: ListAlbumsResponse = response.json().await?;
        Ok(AlbumPage {
            albums: page
                .albums
                .into_iter()
                .map(|a| RemoteAlbum {
                    id: a.id,
                    title: a.title,
                })
                .collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn add_media_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<(), ApiError> {
        let builder = self
            .json_request(
                reqwest::Method::POST,
                &format!("albums/{}:batchAddMediaItems", album_id),
            )
            .json(&BatchAddRequest { media_item_ids });
        self.send(builder).await?;
        Ok(())
    }
}
