use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{Duration, Instant};

/// How long a registered handle stays downloadable.
pub const HANDLE_TTL: Duration = Duration::from_secs(5 * 60);

/// Delay between a finished download response and deletion of the backing
/// file, so in-flight network writes can drain.
pub const SERVE_GRACE: Duration = Duration::from_secs(1);

const TOKEN_BYTES: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no temporary file is registered for this token")]
    NotFound,

    #[error("the download link has expired")]
    Expired,
}

struct Handle {
    path: PathBuf,
    filename: String,
    expires_at: Instant,
}

/// Result of a successful registration.
pub struct RegisteredHandle {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of resolving a live token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub filename: String,
}

/// In-memory map from unguessable tokens to scratch files.
///
/// Handles are process-local and die with the process. Every mutation path
/// that drops a map entry also attempts to unlink the backing file; unlink
/// failures are logged and swallowed so they never block a request.
pub struct TempFileStore {
    handles: DashMap<String, Handle>,
    ttl: Duration,
    grace: Duration,
}

impl TempFileStore {
    pub fn new() -> Self {
        Self::with_lifecycle(HANDLE_TTL, SERVE_GRACE)
    }

    /// Construct a store with explicit lifecycle windows. Production code
    /// uses [`TempFileStore::new`]; tests shrink the windows.
    pub fn with_lifecycle(ttl: Duration, grace: Duration) -> Self {
        Self {
            handles: DashMap::new(),
            ttl,
            grace,
        }
    }

    /// Register a scratch file and hand out a fresh token for it.
    ///
    /// Sweeps expired handles first, so the map cannot accumulate stale
    /// entries faster than uploads come in. The caller must have already
    /// written `path`; the store owns it from here until the handle dies.
    pub async fn register(&self, path: PathBuf, filename: String) -> RegisteredHandle {
        self.sweep_expired().await;

        let token = new_token();
        let expires_at = Instant::now() + self.ttl;
        tracing::debug!(
            token = %token_prefix(&token),
            filename = %filename,
            "registered temp file handle"
        );

        self.handles.insert(
            token.clone(),
            Handle {
                path,
                filename,
                expires_at,
            },
        );

        RegisteredHandle {
            token,
            expires_at: Utc::now() + chrono::Duration::seconds(self.ttl.as_secs() as i64),
        }
    }

    /// Look up a token. Live handles are returned without being removed;
    /// removal happens later via [`TempFileStore::consume_after_serve`] so a
    /// slow client can still finish reading. Expired handles are purged on
    /// first encounter, which is why a second lookup reports `NotFound`
    /// rather than `Expired`.
    pub async fn resolve(&self, token: &str) -> Result<ResolvedFile, ResolveError> {
        let expired_path = {
            let Some(handle) = self.handles.get(token) else {
                return Err(ResolveError::NotFound);
            };

            if Instant::now() < handle.expires_at {
                return Ok(ResolvedFile {
                    path: handle.path.clone(),
                    filename: handle.filename.clone(),
                });
            }

            handle.path.clone()
        };

        self.handles.remove(token);
        tracing::debug!(token = %token_prefix(token), "purged expired handle at lookup");
        remove_backing_file(&expired_path).await;

        Err(ResolveError::Expired)
    }

    /// Schedule removal of a handle after its bytes have been served.
    ///
    /// Fire-and-forget: the download response does not wait on this. The
    /// grace delay tolerates in-flight socket writes. Idempotent under races
    /// with the expiry sweep or a duplicate call.
    pub fn consume_after_serve(self: &Arc<Self>, token: &str) {
        let store = Arc::clone(self);
        let token = token.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(store.grace).await;

            if let Some((_, handle)) = store.handles.remove(&token) {
                tracing::debug!(token = %token_prefix(&token), "consumed handle after serve");
                remove_backing_file(&handle.path).await;
            }
        });
    }

    /// Drop every handle past its expiry and unlink its backing file.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut stale: Vec<(String, PathBuf)> = Vec::new();

        self.handles.retain(|token, handle| {
            if now >= handle.expires_at {
                stale.push((token.clone(), handle.path.clone()));
                false
            } else {
                true
            }
        });

        for (token, path) in stale {
            tracing::debug!(token = %token_prefix(&token), "swept expired handle");
            remove_backing_file(&path).await;
        }
    }

    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 256 random bits, hex-encoded. Well above the entropy needed to make
/// guessing a live token infeasible.
fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn token_prefix(token: &str) -> &str {
    &token[..token.len().min(8)]
}

async fn remove_backing_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to delete scratch file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Sleeps past the grace window, then polls for the spawned deletion
    /// task to finish its filesystem work.
    async fn settle_cleanup(path: &Path) {
        tokio::time::sleep(SERVE_GRACE * 2).await;
        for _ in 0..100 {
            if !path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn register_then_resolve_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir, "x123.pdf", b"%PDF-1.4");
        let store = TempFileStore::new();

        let handle = store.register(path.clone(), "a.pdf".to_string()).await;
        let resolved = store.resolve(&handle.token).await.unwrap();

        assert_eq!(resolved.path, path);
        assert_eq!(resolved.filename, "a.pdf");
    }

    #[tokio::test]
    async fn tokens_are_unique_per_registration() {
        let dir = TempDir::new().unwrap();
        let first = scratch_file(&dir, "one.txt", b"one");
        let second = scratch_file(&dir, "two.txt", b"two");
        let store = TempFileStore::new();

        let a = store.register(first.clone(), "one.txt".to_string()).await;
        let b = store.register(second.clone(), "two.txt".to_string()).await;

        assert_ne!(a.token, b.token);
        assert_eq!(store.resolve(&a.token).await.unwrap().path, first);
        assert_eq!(store.resolve(&b.token).await.unwrap().path, second);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_handle_reports_expired_then_not_found() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir, "stale.txt", b"stale");
        let store = TempFileStore::new();

        let handle = store.register(path.clone(), "stale.txt".to_string()).await;
        tokio::time::advance(HANDLE_TTL + Duration::from_secs(1)).await;

        assert_eq!(
            store.resolve(&handle.token).await.unwrap_err(),
            ResolveError::Expired
        );
        // Purged on first encounter, so a retry no longer knows the token.
        assert_eq!(
            store.resolve(&handle.token).await.unwrap_err(),
            ResolveError::NotFound
        );
        settle_cleanup(&path).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let store = TempFileStore::new();
        assert_eq!(
            store.resolve("nonexistent").await.unwrap_err(),
            ResolveError::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn consume_after_serve_removes_handle_and_file() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir, "served.txt", b"served");
        let store = Arc::new(TempFileStore::new());

        let handle = store.register(path.clone(), "served.txt".to_string()).await;
        store.resolve(&handle.token).await.unwrap();
        store.consume_after_serve(&handle.token);

        settle_cleanup(&path).await;
        assert!(!path.exists());
        assert_eq!(
            store.resolve(&handle.token).await.unwrap_err(),
            ResolveError::NotFound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn register_sweeps_stale_entries() {
        let dir = TempDir::new().unwrap();
        let stale_path = scratch_file(&dir, "old.txt", b"old");
        let fresh_path = scratch_file(&dir, "new.txt", b"new");
        let store = TempFileStore::new();

        let stale = store.register(stale_path.clone(), "old.txt".to_string()).await;
        tokio::time::advance(HANDLE_TTL + Duration::from_secs(1)).await;

        let fresh = store.register(fresh_path, "new.txt".to_string()).await;

        // The stale slot was removed by the sweep, not by its own lookup.
        assert_eq!(
            store.resolve(&stale.token).await.unwrap_err(),
            ResolveError::NotFound
        );
        assert!(!stale_path.exists());
        assert!(store.resolve(&fresh.token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn consume_after_serve_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = scratch_file(&dir, "twice.txt", b"twice");
        let store = Arc::new(TempFileStore::new());

        let handle = store.register(path.clone(), "twice.txt".to_string()).await;
        store.consume_after_serve(&handle.token);
        store.consume_after_serve(&handle.token);

        settle_cleanup(&path).await;
        assert!(!path.exists());
        assert_eq!(store.live_handles(), 0);
    }

    #[tokio::test]
    async fn delete_failure_still_drops_the_entry() {
        let store = TempFileStore::new();
        // Backing file never existed; removal must not surface an error.
        let handle = store
            .register(PathBuf::from("/nonexistent/gone.bin"), "gone.bin".to_string())
            .await;

        let resolved = store.resolve(&handle.token).await.unwrap();
        assert_eq!(resolved.path, PathBuf::from("/nonexistent/gone.bin"));
    }

    #[test]
    fn tokens_carry_enough_entropy() {
        let token = new_token();
        assert_eq!(token.len(), TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
