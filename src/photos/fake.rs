//! Scripted in-memory [`PhotosApi`] for engine tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use super::{AlbumPage, ApiError, PhotosApi, RemoteAlbum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    UploadBytes,
    CreateMediaItem,
    CreateAlbum,
    ListAlbums,
    AddToAlbum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UploadBytes(PathBuf),
    CreateMediaItem(String),
    CreateAlbum(String),
    ListAlbums(Option<String>),
    AddToAlbum(String, Vec<String>),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::UploadBytes(_) => Op::UploadBytes,
            Call::CreateMediaItem(_) => Op::CreateMediaItem,
            Call::CreateAlbum(_) => Op::CreateAlbum,
            Call::ListAlbums(_) => Op::ListAlbums,
            Call::AddToAlbum(..) => Op::AddToAlbum,
        }
    }
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    failures: HashMap<Op, VecDeque<ApiError>>,
    remote_albums: Vec<RemoteAlbum>,
    next_id: u64,
    cancel_after_uploads: Option<(usize, CancellationToken)>,
}

#[derive(Default)]
pub struct FakePhotosApi {
    inner: Mutex<Inner>,
}

impl FakePhotosApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-existing app-created albums returned by `list_albums`, one page.
    pub fn with_remote_albums(titles: &[&str]) -> Self {
        let fake = Self::new();
        {
            let mut inner = fake.inner.lock().unwrap();
            for (i, title) in titles.iter().enumerate() {
                inner.remote_albums.push(RemoteAlbum {
                    id: format!("remote-{i}"),
                    title: title.to_string(),
                });
            }
        }
        fake
    }

    /// Queue an error returned by the next call of `op`.
    pub fn fail_next(&self, op: Op, error: ApiError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Cancel `token` once `n` media items have been created.
    pub fn cancel_after_uploads(&self, n: usize, token: CancellationToken) {
        self.inner.lock().unwrap().cancel_after_uploads = Some((n, token));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op() == op).count()
    }

    fn record(&self, call: Call) -> Result<String, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        let op = call.op();
        inner.calls.push(call);
        if let Some(err) = inner.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        inner.next_id += 1;
        Ok(format!("id-{}", inner.next_id))
    }
}

#[async_trait::async_trait]
impl PhotosApi for FakePhotosApi {
    async fn upload_bytes(&self, path: &Path, _mime_type: &str) -> Result<String, ApiError> {
        self.record(Call::UploadBytes(path.to_path_buf()))
            .map(|id| format!("token-{id}"))
    }

    async fn create_media_item(
        &self,
        _upload_token: &str,
        file_name: &str,
    ) -> Result<String, ApiError> {
        let id = self.record(Call::CreateMediaItem(file_name.to_string()))?;
        let inner = self.inner.lock().unwrap();
        if let Some((n, token)) = &inner.cancel_after_uploads {
            let created = inner
                .calls
                .iter()
                .filter(|c| c.op() == Op::CreateMediaItem)
                .count();
            if created >= *n {
                token.cancel();
            }
        }
        Ok(format!("media-{id}"))
    }

    async fn create_album(&self, title: &str) -> Result<String, ApiError> {
        let id = self.record(Call::CreateAlbum(title.to_string()))?;
        let album_id = format!("album-{id}");
        self.inner.lock().unwrap().remote_albums.push(RemoteAlbum {
            id: album_id.clone(),
            title: title.to_string(),
        });
        Ok(album_id)
    }

    async fn list_albums(&self, page_token: Option<&str>) -> Result<AlbumPage, ApiError> {
        self.record(Call::ListAlbums(page_token.map(str::to_string)))?;
        Ok(AlbumPage {
            albums: self.inner.lock().unwrap().remote_albums.clone(),
            next_page_token: None,
        })
    }

    async fn add_media_to_album(
        &self,
        album_id: &str,
        media_item_ids: &[String],
    ) -> Result<(), ApiError> {
        self.record(Call::AddToAlbum(
            album_id.to_string(),
            media_item_ids.to_vec(),
        ))
        .map(|_| ())
    }
}
