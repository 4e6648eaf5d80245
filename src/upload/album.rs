//! Album naming and resolution of album names to remote album ids.

use std::collections::HashMap;
use std::path::{Component, Path};

use super::Remote;
use crate::quota::{CREATE_ALBUM_COST, LIST_ALBUMS_PAGE_COST};
use crate::retry::CallError;
use crate::state::BackupState;
use crate::types::{AlbumNaming, ExistingAlbumPolicy};

const MAX_ALBUM_NAME_LENGTH: usize = 500;
const INVALID_ALBUM_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const ROOT_ALBUM_NAME: &str = "Root";

/// Make a name acceptable as an album title: invalid characters become
/// spaces, whitespace runs collapse, length is capped.
pub fn sanitize_album_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if INVALID_ALBUM_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ALBUM_NAME_LENGTH {
        collapsed
            .chars()
            .take(MAX_ALBUM_NAME_LENGTH)
            .collect::<String>()
            .trim()
            .to_string()
    } else {
        collapsed
    }
}

fn name_or_root(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| ROOT_ALBUM_NAME.to_string())
}

fn join_relative(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Album key for `directory` under `naming`, already sanitized.
///
/// ```text
/// base = pics, directory = pics/south-america/brazil
///   relative -> south-america-brazil
///   full     -> pics-south-america-brazil
///   leaf     -> brazil
/// ```
pub fn album_key(directory: &Path, base: &Path, naming: AlbumNaming) -> String {
    let rel = directory.strip_prefix(base).unwrap_or(directory);
    let at_base = rel.as_os_str().is_empty();
    let raw = match naming {
        AlbumNaming::Leaf => name_or_root(directory),
        AlbumNaming::Relative if at_base => name_or_root(base),
        AlbumNaming::Relative => join_relative(rel),
        AlbumNaming::Full if at_base => name_or_root(base),
        AlbumNaming::Full => format!("{}-{}", name_or_root(base), join_relative(rel)),
    };
    sanitize_album_name(&raw)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Known album: cached, or an existing remote album under merge.
    Reuse(String),
    Created(String),
    /// An album with this name already exists remotely and the skip policy
    /// is active; the directory waits for a later run.
    Deferred,
}

/// Resolves album keys, consulting the state cache first and the remote
/// listing (loaded at most once per run) only when a policy needs it.
pub struct AlbumResolver {
    policy: ExistingAlbumPolicy,
    remote: Option<HashMap<String, String>>,
}

impl AlbumResolver {
    pub fn new(policy: ExistingAlbumPolicy) -> Self {
        Self {
            policy,
            remote: None,
        }
    }

    pub async fn resolve(
        &mut self,
        remote: &Remote<'_>,
        state: &mut BackupState,
        key: &str,
    ) -> Result<Resolution, CallError> {
        if let Some(id) = state.album_id(key) {
            return Ok(Resolution::Reuse(id.to_string()));
        }

        match self.policy {
            ExistingAlbumPolicy::Skip => {
                if self.find_remote(remote, state, key).await?.is_some() {
                    tracing::info!("Album '{}' already exists, deferring directory", key);
                    return Ok(Resolution::Deferred);
                }
            }
            ExistingAlbumPolicy::Merge => {
                if let Some(id) = self.find_remote(remote, state, key).await? {
                    tracing::info!("Merging into existing album '{}'", key);
                    state.add_created_album(key.to_string(), id.clone());
                    return Ok(Resolution::Reuse(id));
                }
            }
            ExistingAlbumPolicy::Create => {}
        }

        let api = remote.api;
        let id = remote
            .call(state, CREATE_ALBUM_COST, "create album", || api.create_album(key))
            .await?;
        state.add_created_album(key.to_string(), id.clone());
        if let Some(cache) = self.remote.as_mut() {
            cache.entry(key.to_string()).or_insert_with(|| id.clone());
        }
        tracing::info!(album_id = %id, "Created album '{}'", key);
        Ok(Resolution::Created(id))
    }

    async fn find_remote(
        &mut self,
        remote: &Remote<'_>,
        state: &mut BackupState,
        key: &str,
    ) -> Result<Option<String>, CallError> {
        if self.remote.is_none() {
            let api = remote.api;
            let mut albums = HashMap::new();
            let mut page_token: Option<String> = None;
            loop {
                let token = page_token.take();
                let page = remote
                    .call(state, LIST_ALBUMS_PAGE_COST, "list albums", || {
                        api.list_albums(token.as_deref())
                    })
                    .await?;
                for album in page.albums {
                    albums.entry(album.title).or_insert(album.id);
                }
                match page.next_page_token {
                    Some(next) => page_token = Some(next),
                    None => break,
                }
            }
            tracing::info!("Found {} existing app-created albums", albums.len());
            self.remote = Some(albums);
        }
        Ok(self.remote.as_ref().and_then(|m| m.get(key).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::photos::fake::{FakePhotosApi, Op};
    use crate::quota::{QuotaLimits, QuotaTracker};
    use crate::retry::RetryConfig;

    fn retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    #[test]
    fn test_album_key_strategies() {
        let base = Path::new("/data/pics");
        let dir = Path::new("/data/pics/south-america/brazil");
        assert_eq!(
            album_key(dir, base, AlbumNaming::Relative),
            "south-america-brazil"
        );
        assert_eq!(
            album_key(dir, base, AlbumNaming::Full),
            "pics-south-america-brazil"
        );
        assert_eq!(album_key(dir, base, AlbumNaming::Leaf), "brazil");
    }

    #[test]
    fn test_album_key_at_base() {
        let base = Path::new("/data/pics");
        assert_eq!(album_key(base, base, AlbumNaming::Relative), "pics");
        assert_eq!(album_key(base, base, AlbumNaming::Full), "pics");
        assert_eq!(album_key(Path::new("/"), Path::new("/"), AlbumNaming::Relative), "Root");
    }

    #[test]
    fn test_sanitize_album_name() {
        assert_eq!(sanitize_album_name("a:b|c"), "a b c");
        assert_eq!(sanitize_album_name("  trips   2024 ??"), "trips 2024");
        let long = "x".repeat(600);
        assert_eq!(sanitize_album_name(&long).len(), 500);
    }

    struct Fixture {
        quota: QuotaTracker,
        retry: RetryConfig,
        state: BackupState,
    }

    fn fixture() -> Fixture {
        let quota = QuotaTracker::new(QuotaLimits::default());
        let state = BackupState::new(PathBuf::from("/pics"), quota.today());
        Fixture {
            quota,
            retry: retry(),
            state,
        }
    }

    #[tokio::test]
    async fn test_cached_album_is_reused_without_calls() {
        let mut f = fixture();
        f.state.add_created_album("trip".into(), "ALB".into());
        let api = FakePhotosApi::new();
        let remote = Remote::new(&api, &f.retry, &f.quota);
        let mut resolver = AlbumResolver::new(ExistingAlbumPolicy::Merge);

        let r = resolver.resolve(&remote, &mut f.state, "trip").await.unwrap();
        assert_eq!(r, Resolution::Reuse("ALB".into()));
        assert!(api.calls().is_empty());
        assert_eq!(f.state.session.requests_count, 0);
    }

    #[tokio::test]
    async fn test_create_policy_never_lists() {
        let mut f = fixture();
        let api = FakePhotosApi::with_remote_albums(&["trip"]);
        let remote = Remote::new(&api, &f.retry, &f.quota);
        let mut resolver = AlbumResolver::new(ExistingAlbumPolicy::Create);

        let r = resolver.resolve(&remote, &mut f.state, "trip").await.unwrap();
        assert!(matches!(r, Resolution::Created(_)));
        assert_eq!(api.count(Op::ListAlbums), 0);
        assert_eq!(api.count(Op::CreateAlbum), 1);
        assert_eq!(f.state.created_albums.len(), 1);
        assert_eq!(f.state.session.requests_count, 1);

        // Second resolution of the same key hits the cache.
        let again = resolver.resolve(&remote, &mut f.state, "trip").await.unwrap();
        assert!(matches!(again, Resolution::Reuse(_)));
        assert_eq!(api.count(Op::CreateAlbum), 1);
    }

    #[tokio::test]
    async fn test_merge_policy_reuses_remote_album() {
        let mut f = fixture();
        let api = FakePhotosApi::with_remote_albums(&["trip", "other"]);
        let remote = Remote::new(&api, &f.retry, &f.quota);
        let mut resolver = AlbumResolver::new(ExistingAlbumPolicy::Merge);

        let r = resolver.resolve(&remote, &mut f.state, "trip").await.unwrap();
        assert_eq!(r, Resolution::Reuse("remote-0".into()));
        assert_eq!(f.state.album_id("trip"), Some("remote-0"));

        let new = resolver.resolve(&remote, &mut f.state, "fresh").await.unwrap();
        assert!(matches!(new, Resolution::Created(_)));
        // Listing happens once per run.
        assert_eq!(api.count(Op::ListAlbums), 1);
        assert_eq!(f.state.session.requests_count, 2);
    }

    #[tokio::test]
    async fn test_skip_policy_defers_existing() {
        let mut f = fixture();
        let api = FakePhotosApi::with_remote_albums(&["trip"]);
        let remote = Remote::new(&api, &f.retry, &f.quota);
        let mut resolver = AlbumResolver::new(ExistingAlbumPolicy::Skip);

        let r = resolver.resolve(&remote, &mut f.state, "trip").await.unwrap();
        assert_eq!(r, Resolution::Deferred);
        assert_eq!(api.count(Op::CreateAlbum), 0);
        assert!(f.state.created_albums.is_empty());
    }
}
