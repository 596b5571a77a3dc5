//! A filesystem-backed `ObjectStore`. Used as the store side of `download`

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

//! (which writes straight to a local layout directory) and as the S3
//! stand-in for every test in this workspace, grounded on `remote/local.go`'s
//! directory-as-bucket remote.

use crate::error::{StoreError, StoreResult};
use crate::object_store::{ListedKey, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> LocalFsStore {
        LocalFsStore { root: root.into() }
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalFsStore {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ListedKey>> {
        let base = self.resolve(prefix);
        let mut out = Vec::new();
        if !base.exists() {
            return Ok(out);
        }
        walk(&self.root, &base, &mut out)?;
        Ok(out)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.resolve(key).is_file())
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.resolve(key);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| map_io(key, e))?;
        Ok(Bytes::from(bytes))
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let path = self.resolve(key);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(key, e))?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let len = (range.end - range.start) as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        _size: u64,
    ) -> StoreResult<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

fn map_io(key: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(e)
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<ListedKey>) -> StoreResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let meta = entry.metadata()?;
        let key = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push(ListedKey {
            key,
            size: meta.len(),
            etag: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        let data = b"abcdefg".to_vec();
        store
            .put_stream(
                "repo/images/deadbeef/layer.tar",
                Box::new(std::io::Cursor::new(data.clone())),
                data.len() as u64,
            )
            .await
            .unwrap();

        let fetched = store.get("repo/images/deadbeef/layer.tar").await.unwrap();
        assert_eq!(fetched.to_vec(), data);
        assert!(store.exists("repo/images/deadbeef/layer.tar").await.unwrap());
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn get_range_reads_slice() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        store
            .put_stream(
                "k",
                Box::new(std::io::Cursor::new(b"0123456789".to_vec())),
                10,
            )
            .await
            .unwrap();
        let slice = store.get_range("k", 2..5).await.unwrap();
        assert_eq!(slice.to_vec(), b"234".to_vec());
    }

    #[tokio::test]
    async fn list_is_recursive_and_relative() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        store
            .put_stream("a/b/c", Box::new(std::io::Cursor::new(b"x".to_vec())), 1)
            .await
            .unwrap();
        let listed = store.list("").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "a/b/c");
    }
}
