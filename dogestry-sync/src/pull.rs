//! Pull path: resolve a reference to an id, work out what each daemon is

// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! missing, download every missing layer once, and write the tag file into
//! a scratch layout ready for repackaging (spec §4.5).

use crate::ancestry::{walk, Control};
use crate::daemon::{DaemonAdapter, DaemonError};
use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressSink, SyncEvent};
use crate::scratch::write_scratch_tag;
use dogestry_core::{ImageId, ImageRef};
use dogestry_store::ObjectStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const DOWNLOAD_FILES: [&str; 3] = ["json", "layer.tar", "VERSION"];
const MAX_ATTEMPTS: usize = 3;
const PULL_WORKERS: usize = 25;

#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub head: ImageId,
    pub downloaded: usize,
}

/// Resolves `image_ref` to an id via the tag file, falling back to a
/// prefix search over `images/` when no tag file matches (spec §9: the
/// daemon and the store may disagree on which ref is current).
pub async fn resolve_image_id(store: &dyn ObjectStore, image_ref: &ImageRef) -> SyncResult<ImageId> {
    let tag_key = format!("repositories/{}/{}", image_ref.repository, image_ref.tag);
    match store.get(&tag_key).await {
        Ok(bytes) => Ok(ImageId::new(String::from_utf8_lossy(&bytes).trim().to_string())),
        Err(e) if e.is_not_found() => resolve_by_prefix(store, &image_ref.repository).await,
        Err(e) => Err(e.into()),
    }
}

async fn resolve_by_prefix(store: &dyn ObjectStore, prefix: &str) -> SyncResult<ImageId> {
    let listed = store.list("images/").await?;
    let mut candidates = HashSet::new();
    for item in listed {
        if let Some(rest) = item.key.strip_prefix("images/") {
            if let Some((id, _tail)) = rest.split_once('/') {
                if id.starts_with(prefix) {
                    candidates.insert(id.to_string());
                }
            }
        }
    }

    match candidates.len() {
        1 => Ok(ImageId::new(candidates.into_iter().next().unwrap())),
        0 => Err(SyncError::Store(dogestry_store::StoreError::NotFound(prefix.to_string()))),
        _ => Err(SyncError::Store(dogestry_store::StoreError::NotFound(format!(
            "ambiguous prefix: {prefix}"
        )))),
    }
}

/// The full linear ancestor chain of `head`, head-first, via the shared
/// DAG walker.
async fn collect_ancestors(store: &dyn ObjectStore, head: &ImageId) -> SyncResult<Vec<ImageId>> {
    let mut ids = Vec::new();
    walk(store, head, |id, _meta| {
        ids.push(id.stripped().to_string());
        Control::Continue
    })
    .await?;
    Ok(ids.into_iter().map(ImageId::new).collect())
}

/// Which ancestors of `head` a single daemon is missing, stopping as soon
/// as one is found present (its own ancestors are implied present too).
async fn daemon_missing_set(
    store: &dyn ObjectStore,
    daemon: &dyn DaemonAdapter,
    head: &ImageId,
) -> SyncResult<Vec<ImageId>> {
    let ancestors = collect_ancestors(store, head).await?;
    let mut missing = Vec::new();
    for id in ancestors {
        if daemon.inspect_image(&id).await.map_err(daemon_err)? {
            break;
        }
        missing.push(id);
    }
    Ok(missing)
}

/// Union of every configured daemon's missing ancestors, keyed by id, each
/// mapped to the indices of the daemons that need it.
pub async fn build_download_map(
    store: &dyn ObjectStore,
    daemons: &[Arc<dyn DaemonAdapter>],
    head: &ImageId,
) -> SyncResult<HashMap<String, Vec<usize>>> {
    let mut map: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, daemon) in daemons.iter().enumerate() {
        let missing = daemon_missing_set(store, daemon.as_ref(), head).await?;
        for id in missing {
            map.entry(id.stripped().to_string()).or_default().push(idx);
        }
    }
    Ok(map)
}

async fn download_one(store: &dyn ObjectStore, key: &str, dest: &Path) -> SyncResult<()> {
    let bytes = store.get(key).await?;
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes).await?;

    let sum_key = format!("{key}.sum");
    match store.get(&sum_key).await {
        Ok(sum_bytes) => {
            let expected = String::from_utf8_lossy(&sum_bytes).trim().to_string();
            if !expected.is_empty() {
                let actual = dogestry_core::sha1_file(dest)?;
                if actual != expected {
                    return Err(SyncError::IntegrityMismatch {
                        key: key.to_string(),
                        expected,
                        actual,
                    });
                }
            }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Retries a single file's download against transient store errors (spec
/// §4.5 step 8); non-transient errors and exhausted retries propagate as-is
/// and the file, if partially written, is left in place for inspection.
async fn download_one_with_retry(store: &dyn ObjectStore, key: &str, dest: &Path) -> SyncResult<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match download_one(store, key, dest).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                warn!(key, attempt, "transient download error, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One job per id (spec §5 "Concurrency policy": download parallelism is
/// per-id, not per-file), each job serializing its own ~3 files.
async fn download_all(
    store: &dyn ObjectStore,
    scratch_dir: &Path,
    download_map: &HashMap<String, Vec<usize>>,
    events: Option<&ProgressSink>,
) -> SyncResult<usize> {
    let total = download_map.len();
    if total == 0 {
        return Ok(0);
    }

    let worker_count = total.min(PULL_WORKERS);
    let downloaded = AtomicUsize::new(0);

    stream::iter(download_map.keys().map(Ok::<_, SyncError>))
        .try_for_each_concurrent(worker_count, |id| {
            let downloaded = &downloaded;
            async move {
                debug!(%id, "downloading job");
                for file in DOWNLOAD_FILES {
                    let key = format!("images/{id}/{file}");
                    let dest = scratch_dir.join("images").join(id).join(file);
                    download_one_with_retry(store, &key, &dest).await?;
                }
                let n = downloaded.fetch_add(1, Ordering::SeqCst) + 1;
                emit(events, format!("downloaded {id} ({n}/{total})"));
                Ok(())
            }
        })
        .await?;

    Ok(downloaded.load(Ordering::SeqCst))
}

/// Resolves `image_ref`, computes what each daemon needs, downloads every
/// missing layer exactly once into `scratch_dir`, and writes the tag file.
/// Repackaging the scratch layout and loading it into each daemon is the
/// caller's responsibility (shared with the `upload` path, which loads an
/// already-assembled layout without going through the store at all).
pub async fn pull(
    store: &dyn ObjectStore,
    daemons: &[Arc<dyn DaemonAdapter>],
    image_ref: &ImageRef,
    scratch_dir: &Path,
    events: Option<&ProgressSink>,
) -> SyncResult<PullOutcome> {
    info!(%image_ref, "starting pull");
    let head = resolve_image_id(store, image_ref).await?;
    emit(events, format!("resolved {image_ref} to {}", head.short()));

    let download_map = build_download_map(store, daemons, &head).await?;
    emit(events, format!("{} layer(s) to download", download_map.len()));

    let downloaded = download_all(store, scratch_dir, &download_map, events).await?;

    write_scratch_tag(scratch_dir, image_ref, &head)?;
    info!(%image_ref, downloaded, "pull complete");

    Ok(PullOutcome { head, downloaded })
}

fn daemon_err(e: DaemonError) -> SyncError {
    SyncError::Daemon(e.to_string())
}

fn emit(events: Option<&ProgressSink>, message: String) {
    if let Some(sink) = events {
        sink.emit(SyncEvent::Progress(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dogestry_store::LocalFsStore;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::io::AsyncRead;

    async fn put(store: &LocalFsStore, key: &str, body: &[u8]) {
        store
            .put_stream(key, Box::new(std::io::Cursor::new(body.to_vec())), body.len() as u64)
            .await
            .unwrap();
    }

    async fn put_metadata(store: &LocalFsStore, id: &str, parent: Option<&str>) {
        let mut obj = serde_json::Map::new();
        if let Some(p) = parent {
            obj.insert("Parent".to_string(), serde_json::Value::String(p.to_string()));
        }
        let body = serde_json::to_vec(&obj).unwrap();
        put(store, &format!("images/{id}/json"), &body).await;
        put(store, &format!("images/{id}/layer.tar"), b"layer").await;
        put(store, &format!("images/{id}/VERSION"), b"1.0").await;
    }

    struct FakeDaemon {
        present: HashSet<String>,
    }

    #[async_trait]
    impl DaemonAdapter for FakeDaemon {
        async fn resolve_head(&self, _image_ref: &ImageRef) -> crate::daemon::DaemonResult<ImageId> {
            unimplemented!()
        }
        async fn image_history(&self, _id: &ImageId) -> crate::daemon::DaemonResult<Vec<ImageId>> {
            unimplemented!()
        }
        async fn inspect_image(&self, id: &ImageId) -> crate::daemon::DaemonResult<bool> {
            Ok(self.present.contains(id.stripped()))
        }
        async fn export_image(
            &self,
            _id: &ImageId,
        ) -> crate::daemon::DaemonResult<Box<dyn AsyncRead + Send + Unpin>> {
            unimplemented!()
        }
        async fn load_image(
            &self,
            _reader: Box<dyn AsyncRead + Send + Unpin>,
        ) -> crate::daemon::DaemonResult<()> {
            Ok(())
        }
        fn describe(&self) -> String {
            "fake".to_string()
        }
    }

    #[tokio::test]
    async fn resolve_by_tag_file_takes_precedence_over_prefix() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put(&store, "repositories/lib/foo/latest", b"aaaa").await;
        put_metadata(&store, "aaaaX", None).await;

        let image_ref = ImageRef::new("lib/foo", "latest");
        let id = resolve_image_id(&store, &image_ref).await.unwrap();
        assert_eq!(id.stripped(), "aaaa");
    }

    #[tokio::test]
    async fn resolve_falls_back_to_unique_prefix() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "1234abcd5678", None).await;

        let image_ref = ImageRef::new("1234abcd", "latest");
        let id = resolve_image_id(&store, &image_ref).await.unwrap();
        assert_eq!(id.stripped(), "1234abcd5678");
    }

    #[tokio::test]
    async fn resolve_prefix_with_no_match_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "1234abcd5678", None).await;

        let image_ref = ImageRef::new("ffff", "latest");
        let err = resolve_image_id(&store, &image_ref).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(dogestry_store::StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn download_map_stops_at_first_present_ancestor() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "c", Some("b")).await;
        put_metadata(&store, "b", Some("a")).await;
        put_metadata(&store, "a", None).await;

        let daemon: Arc<dyn DaemonAdapter> = Arc::new(FakeDaemon {
            present: ["b".to_string()].into_iter().collect(),
        });
        let map = build_download_map(&store, &[daemon], &ImageId::new("c")).await.unwrap();

        assert_eq!(map.len(), 1);
        assert!(map.contains_key("c"));
    }

    #[tokio::test]
    async fn pull_downloads_missing_layers_and_writes_tag() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "c", Some("b")).await;
        put_metadata(&store, "b", None).await;

        let scratch = tempdir().unwrap();
        let daemon: Arc<dyn DaemonAdapter> = Arc::new(FakeDaemon {
            present: HashSet::new(),
        });
        let image_ref = ImageRef::new("lib/foo", "latest");

        let outcome = pull(&store, &[daemon], &image_ref, scratch.path(), None).await.unwrap();

        assert_eq!(outcome.downloaded, 2);
        assert!(scratch.path().join("images/c/json").exists());
        assert!(scratch.path().join("images/b/json").exists());
        assert_eq!(
            std::fs::read_to_string(scratch.path().join("repositories/lib/foo/latest")).unwrap(),
            "c"
        );
    }

    #[tokio::test]
    async fn integrity_mismatch_is_reported_without_retrying() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put(&store, "images/x/json", b"{}").await;
        put(&store, "images/x/json.sum", b"deadbeef").await;

        let scratch = tempdir().unwrap();
        let dest = scratch.path().join("images/x/json");
        let err = download_one(&store, "images/x/json", &dest).await.unwrap_err();
        assert!(matches!(err, SyncError::IntegrityMismatch { .. }));
        // Mismatched file is left in place for inspection, not cleaned up.
        assert!(dest.exists());
    }

    struct FlakyStore {
        inner: LocalFsStore,
        fail_first_n: Mutex<usize>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn list(&self, prefix: &str) -> dogestry_store::StoreResult<Vec<dogestry_store::ListedKey>> {
            self.inner.list(prefix).await
        }
        async fn exists(&self, key: &str) -> dogestry_store::StoreResult<bool> {
            self.inner.exists(key).await
        }
        async fn get(&self, key: &str) -> dogestry_store::StoreResult<bytes::Bytes> {
            let should_fail = {
                let mut remaining = self.fail_first_n.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    true
                } else {
                    false
                }
            };
            if should_fail {
                return Err(dogestry_store::StoreError::TransportTransient("flaky".to_string()));
            }
            self.inner.get(key).await
        }
        async fn get_range(
            &self,
            key: &str,
            range: std::ops::Range<u64>,
        ) -> dogestry_store::StoreResult<bytes::Bytes> {
            self.inner.get_range(key, range).await
        }
        async fn put_stream(
            &self,
            key: &str,
            reader: Box<dyn AsyncRead + Send + Unpin>,
            len: u64,
        ) -> dogestry_store::StoreResult<()> {
            self.inner.put_stream(key, reader, len).await
        }
        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[tokio::test]
    async fn retries_succeed_within_attempt_budget() {
        let dir = tempdir().unwrap();
        let inner = LocalFsStore::new(dir.path());
        put(&inner, "images/x/json", b"{}").await;
        let store = FlakyStore {
            inner,
            fail_first_n: Mutex::new(2),
        };

        let scratch = tempdir().unwrap();
        let dest = scratch.path().join("images/x/json");
        download_one_with_retry(&store, "images/x/json", &dest).await.unwrap();
        assert!(dest.exists());
    }

    #[tokio::test]
    async fn retries_exhausted_propagates_transport_error() {
        let dir = tempdir().unwrap();
        let inner = LocalFsStore::new(dir.path());
        put(&inner, "images/x/json", b"{}").await;
        let store = FlakyStore {
            inner,
            fail_first_n: Mutex::new(MAX_ATTEMPTS),
        };

        let scratch = tempdir().unwrap();
        let dest = scratch.path().join("images/x/json");
        let err = download_one_with_retry(&store, "images/x/json", &dest).await.unwrap_err();
        assert!(err.is_transient());
    }
}
