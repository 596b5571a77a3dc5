//! Push path: daemon -> layout codec -> scratch dir -> diff vs store ->

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

//! parallel upload (spec §4.5).

use crate::daemon::{DaemonAdapter, DaemonError};
use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressSink, SyncEvent};
use crate::scratch::write_scratch_tag;
use dogestry_core::{ImageId, ImageRef, MemoryReader};
use dogestry_store::{local_keys, repo_keys, KeySet, LocalFsStore, ObjectStore};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const PUSH_WORKERS: usize = 25;

#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub uploaded: usize,
    pub nothing_to_push: bool,
}

pub async fn push(
    daemon: &dyn DaemonAdapter,
    store: &dyn ObjectStore,
    image_ref: &ImageRef,
    scratch_dir: &Path,
    events: Option<&ProgressSink>,
) -> SyncResult<PushOutcome> {
    info!(%image_ref, "starting push");
    let head = daemon
        .resolve_head(image_ref)
        .await
        .map_err(daemon_err)?;
    let history = daemon.image_history(&head).await.map_err(daemon_err)?;

    let mut missing = HashSet::new();
    for id in &history {
        let key = format!("images/{}/json", id.stripped());
        if !store.exists(&key).await? {
            missing.insert(id.stripped().to_string());
        }
    }

    emit(
        events,
        format!("{} of {} layer(s) missing on remote", missing.len(), history.len()),
    );

    if missing.is_empty() {
        write_remote_tag(store, image_ref, &head).await?;
        return Ok(PushOutcome {
            uploaded: 0,
            nothing_to_push: true,
        });
    }

    let tar_path = scratch_dir.join(".export.tar");
    {
        let mut reader = daemon.export_image(&head).await.map_err(daemon_err)?;
        let mut file = tokio::fs::File::create(&tar_path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
    }

    decode_into_scratch(&tar_path, scratch_dir, missing).await?;
    tokio::fs::remove_file(&tar_path).await.ok();

    write_scratch_tag(scratch_dir, image_ref, &head)?;

    let scratch_store = LocalFsStore::new(scratch_dir);
    let local = build_local_keys(scratch_dir).await?;
    let remote = repo_keys(store, "").await?;
    let to_push = local.difference(&scratch_store, &remote, store).await?;

    emit(events, format!("{} key(s) to push", to_push.len()));

    let uploaded = upload_all(store, &scratch_store, &to_push, events).await?;
    info!(%image_ref, uploaded, "push complete");

    Ok(PushOutcome {
        uploaded,
        nothing_to_push: false,
    })
}

async fn decode_into_scratch(
    tar_path: &Path,
    scratch_dir: &Path,
    retain_ids: HashSet<String>,
) -> SyncResult<()> {
    let tar_path = tar_path.to_path_buf();
    let scratch_dir = scratch_dir.to_path_buf();
    spawn_blocking(move || {
        let file = std::fs::File::open(&tar_path)?;
        dogestry_layout::decode_image_tar(file, &scratch_dir, Some(&retain_ids))
            .map_err(SyncError::from)
    })
    .await
}

async fn build_local_keys(scratch_dir: &Path) -> SyncResult<KeySet> {
    let root = scratch_dir.to_path_buf();
    spawn_blocking(move || local_keys(&root).map_err(SyncError::from)).await
}

async fn spawn_blocking<F, T>(f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?
}

async fn write_remote_tag(
    store: &dyn ObjectStore,
    image_ref: &ImageRef,
    id: &ImageId,
) -> SyncResult<()> {
    let key = format!("repositories/{}/{}", image_ref.repository, image_ref.tag);
    let bytes = id.stripped().as_bytes().to_vec();
    let len = bytes.len() as u64;
    store
        .put_stream(&key, Box::new(MemoryReader::new(bytes)), len)
        .await?;
    Ok(())
}

async fn upload_all(
    store: &dyn ObjectStore,
    scratch_store: &LocalFsStore,
    to_push: &KeySet,
    events: Option<&ProgressSink>,
) -> SyncResult<usize> {
    let mut jobs = Vec::new();
    for (key, def) in to_push.iter() {
        if let Some(path) = &def.local_path {
            let digest = def.digest(scratch_store).await?;
            jobs.push((key.clone(), path.clone(), digest));
        }
    }

    if jobs.is_empty() {
        return Ok(0);
    }

    let worker_count = jobs.len().min(PUSH_WORKERS);
    let uploaded = std::sync::atomic::AtomicUsize::new(0);

    stream::iter(jobs.into_iter().map(Ok::<_, SyncError>))
        .try_for_each_concurrent(worker_count, |(key, path, digest)| {
            let uploaded = &uploaded;
            async move {
                debug!(%key, "uploading job");
                upload_one(store, &key, &path, &digest).await?;
                let n = uploaded.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                emit(events, format!("uploaded {key} ({n} so far)"));
                Ok(())
            }
        })
        .await?;

    Ok(uploaded.load(std::sync::atomic::Ordering::SeqCst))
}

async fn upload_one(store: &dyn ObjectStore, key: &str, path: &Path, digest: &str) -> SyncResult<()> {
    let size = tokio::fs::metadata(path).await?.len();
    let file = tokio::fs::File::open(path).await?;
    store.put_stream(key, Box::new(file), size).await?;

    let sum_key = format!("{key}.sum");
    let sum_bytes = digest.as_bytes().to_vec();
    let sum_len = sum_bytes.len() as u64;
    store
        .put_stream(&sum_key, Box::new(MemoryReader::new(sum_bytes)), sum_len)
        .await?;
    Ok(())
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
    use dogestry_layout::header::write_entry;
    use dogestry_store::KeyDef;
    use tempfile::tempdir;
    use tokio::io::AsyncRead;

    fn build_export_tar(id: &str, parent: Option<&str>) -> Vec<u8> {
        let mut buf = Vec::new();
        let json = match parent {
            Some(p) => format!(r#"{{"Parent":"{p}"}}"#),
            None => "{}".to_string(),
        };
        write_entry(&mut buf, &format!("{id}/json"), json.as_bytes()).unwrap();
        write_entry(&mut buf, &format!("{id}/layer.tar"), b"layer-bytes").unwrap();
        write_entry(&mut buf, &format!("{id}/VERSION"), b"1.0").unwrap();
        dogestry_layout::header::write_end_markers(&mut buf).unwrap();
        buf
    }

    struct FakeDaemon {
        head: ImageId,
        history: Vec<ImageId>,
        tar: Vec<u8>,
    }

    #[async_trait]
    impl DaemonAdapter for FakeDaemon {
        async fn resolve_head(&self, _image_ref: &ImageRef) -> crate::daemon::DaemonResult<ImageId> {
            Ok(ImageId::new(self.head.stripped().to_string()))
        }
        async fn image_history(&self, _id: &ImageId) -> crate::daemon::DaemonResult<Vec<ImageId>> {
            Ok(self
                .history
                .iter()
                .map(|id| ImageId::new(id.stripped().to_string()))
                .collect())
        }
        async fn inspect_image(&self, _id: &ImageId) -> crate::daemon::DaemonResult<bool> {
            Ok(true)
        }
        async fn export_image(
            &self,
            _id: &ImageId,
        ) -> crate::daemon::DaemonResult<Box<dyn AsyncRead + Send + Unpin>> {
            Ok(Box::new(MemoryReader::new(self.tar.clone())))
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
    async fn push_uploads_missing_layers_and_tag() {
        let store_dir = tempdir().unwrap();
        let scratch_dir = tempdir().unwrap();
        let store = LocalFsStore::new(store_dir.path());

        let daemon = FakeDaemon {
            head: ImageId::new("abc"),
            history: vec![ImageId::new("abc")],
            tar: build_export_tar("abc", None),
        };
        let image_ref = ImageRef::new("lib/foo", "latest");

        let outcome = push(&daemon, &store, &image_ref, scratch_dir.path(), None).await.unwrap();

        assert!(!outcome.nothing_to_push);
        assert!(store.exists("images/abc/json").await.unwrap());
        assert!(store.exists("images/abc/json.sum").await.unwrap());
        assert!(store.exists("repositories/lib/foo/latest").await.unwrap());
    }

    #[tokio::test]
    async fn push_with_nothing_missing_only_rewrites_tag() {
        let store_dir = tempdir().unwrap();
        let scratch_dir = tempdir().unwrap();
        let store = LocalFsStore::new(store_dir.path());
        store
            .put_stream(
                "images/abc/json",
                Box::new(std::io::Cursor::new(b"{}".to_vec())),
                2,
            )
            .await
            .unwrap();

        let daemon = FakeDaemon {
            head: ImageId::new("abc"),
            history: vec![ImageId::new("abc")],
            tar: Vec::new(),
        };
        let image_ref = ImageRef::new("lib/foo", "latest");

        let outcome = push(&daemon, &store, &image_ref, scratch_dir.path(), None).await.unwrap();

        assert!(outcome.nothing_to_push);
        assert_eq!(outcome.uploaded, 0);
        assert!(store.exists("repositories/lib/foo/latest").await.unwrap());
    }

    #[tokio::test]
    async fn push_is_idempotent_on_second_run() {
        let store_dir = tempdir().unwrap();
        let scratch_a = tempdir().unwrap();
        let scratch_b = tempdir().unwrap();
        let store = LocalFsStore::new(store_dir.path());

        let daemon = FakeDaemon {
            head: ImageId::new("abc"),
            history: vec![ImageId::new("abc")],
            tar: build_export_tar("abc", None),
        };
        let image_ref = ImageRef::new("lib/foo", "latest");

        push(&daemon, &store, &image_ref, scratch_a.path(), None).await.unwrap();
        let second = push(&daemon, &store, &image_ref, scratch_b.path(), None).await.unwrap();

        // Layer blobs are already present; only the tag key is re-included.
        assert!(second.nothing_to_push);
    }

    #[tokio::test]
    async fn upload_all_runs_jobs_concurrently_with_worker_cap() {
        let store_dir = tempdir().unwrap();
        let scratch_dir = tempdir().unwrap();
        let store = LocalFsStore::new(store_dir.path());
        let scratch_store = LocalFsStore::new(scratch_dir.path());

        let mut keyset = KeySet::new();
        for i in 0..5 {
            let path = scratch_dir.path().join(format!("blob{i}"));
            std::fs::write(&path, format!("content-{i}")).unwrap();
            let digest = dogestry_core::sha1_file(&path).unwrap();
            keyset.insert(KeyDef::local(format!("blob{i}"), digest, path));
        }

        let uploaded = upload_all(&store, &scratch_store, &keyset, None).await.unwrap();
        assert_eq!(uploaded, 5);
        for i in 0..5 {
            assert!(store.exists(&format!("blob{i}")).await.unwrap());
            assert!(store.exists(&format!("blob{i}.sum")).await.unwrap());
        }
    }
}
