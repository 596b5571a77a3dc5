//! The keyspace model: `KeyDef`/`KeySet` and the free functions

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

//! (`repo_keys`, `local_keys`) that build them by composing the narrow
//! `ObjectStore` capability set, per the "no backend-specific walk logic"
//! rule (spec §9 REDESIGN FLAGS).

use crate::error::{StoreError, StoreResult};
use crate::object_store::ObjectStore;
use dogestry_core::sha1_file;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub size: u64,
    pub etag: Option<String>,
}

/// One logical object in the store.
pub struct KeyDef {
    pub key: String,
    pub blob: Option<BlobDescriptor>,
    pub sum_key: Option<String>,
    /// Local files only: the absolute path backing this key, so the sync
    /// engine doesn't have to re-derive it from `root.join(key)`.
    pub local_path: Option<PathBuf>,
    digest_cache: OnceCell<String>,
}

impl KeyDef {
    fn remote(key: String) -> KeyDef {
        KeyDef {
            key,
            blob: None,
            sum_key: None,
            local_path: None,
            digest_cache: OnceCell::new(),
        }
    }

    pub fn local(key: String, digest: String, path: PathBuf) -> KeyDef {
        KeyDef {
            key,
            blob: None,
            sum_key: None,
            local_path: Some(path),
            digest_cache: OnceCell::new_with(Some(digest)),
        }
    }

    /// Resolve the content digest, memoising a successful fetch but
    /// leaving the cache empty on failure so a later call retries —
    /// unlike the legacy implementation this is grounded on, which
    /// cached a failed fetch as "no sum" forever (spec §9).
    pub async fn digest(&self, store: &dyn ObjectStore) -> StoreResult<String> {
        if let Some(cached) = self.digest_cache.get() {
            return Ok(cached.clone());
        }
        match &self.sum_key {
            None => Ok(String::new()),
            Some(sum_key) => {
                let value = self
                    .digest_cache
                    .get_or_try_init(|| async {
                        match store.get(sum_key).await {
                            Ok(bytes) => {
                                Ok(String::from_utf8_lossy(&bytes).trim().to_string())
                            }
                            Err(StoreError::NotFound(_)) => Ok(String::new()),
                            Err(e) => Err(e),
                        }
                    })
                    .await?;
                Ok(value.clone())
            }
        }
    }

    fn clone_shallow(&self) -> KeyDef {
        KeyDef {
            key: self.key.clone(),
            blob: self.blob.clone(),
            sum_key: self.sum_key.clone(),
            local_path: self.local_path.clone(),
            digest_cache: match self.digest_cache.get() {
                Some(v) => OnceCell::new_with(Some(v.clone())),
                None => OnceCell::new(),
            },
        }
    }
}

/// A mapping from logical key to `KeyDef`; order is irrelevant.
#[derive(Default)]
pub struct KeySet {
    entries: HashMap<String, KeyDef>,
}

impl KeySet {
    pub fn new() -> KeySet {
        KeySet {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, def: KeyDef) {
        self.entries.insert(def.key.clone(), def);
    }

    pub fn get(&self, key: &str) -> Option<&KeyDef> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyDef)> {
        self.entries.iter()
    }

    fn entry_mut(&mut self, key: &str) -> &mut KeyDef {
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| KeyDef::remote(key.to_string()))
    }

    /// Returns the subset of `self` whose entries are absent from `other`
    /// or whose digests differ; an empty digest on the `other` side always
    /// forces inclusion (spec §4.2, testable property 2).
    pub async fn difference(
        &self,
        self_store: &dyn ObjectStore,
        other: &KeySet,
        other_store: &dyn ObjectStore,
    ) -> StoreResult<KeySet> {
        let mut result = KeySet::new();
        for (key, def) in self.entries.iter() {
            let include = match other.entries.get(key) {
                None => true,
                Some(other_def) => {
                    let self_digest = def.digest(self_store).await?;
                    let other_digest = other_def.digest(other_store).await?;
                    other_digest.is_empty() || other_digest != self_digest
                }
            };
            if include {
                result.insert(def.clone_shallow());
            }
        }
        Ok(result)
    }
}

/// Scan `prefix` in `store` and return a `KeySet`: every listed path ending
/// in `.sum` populates the `sum_key` of its synonymous logical key; every
/// other path becomes that key's `blob`.
pub async fn repo_keys(store: &dyn ObjectStore, prefix: &str) -> StoreResult<KeySet> {
    let listed = store.list(prefix).await?;
    let mut set = KeySet::new();

    for item in listed {
        if item.key.is_empty() {
            continue;
        }
        if let Some(plain) = item.key.strip_suffix(".sum") {
            set.entry_mut(plain).sum_key = Some(item.key.clone());
        } else {
            set.entry_mut(&item.key).blob = Some(BlobDescriptor {
                size: item.size,
                etag: item.etag,
            });
        }
    }

    Ok(set)
}

/// Walk `root` and return a `KeySet` with digests computed eagerly;
/// directories are skipped, keys are the path relative to `root` with
/// forward slashes.
pub fn local_keys(root: &Path) -> std::io::Result<KeySet> {
    let mut set = KeySet::new();
    walk_dir(root, root, &mut set)?;
    Ok(set)
}

fn walk_dir(root: &Path, dir: &Path, set: &mut KeySet) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_dir(root, &path, set)?;
            continue;
        }

        let digest = sha1_file(&path)?;
        let key = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        set.insert(KeyDef::local(key, digest, path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_fs::LocalFsStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn local_keys_digest_matches_sha1() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let keys = local_keys(dir.path()).unwrap();
        let def = keys.get("a.txt").unwrap();
        let store = LocalFsStore::new(dir.path());
        let digest = def.digest(&store).await.unwrap();
        assert_eq!(digest, dogestry_core::sha1_file(dir.path().join("a.txt")).unwrap());
    }

    #[tokio::test]
    async fn difference_includes_missing_and_mismatched() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());

        let mut a = KeySet::new();
        a.insert(KeyDef::local("x".into(), "aaa".into(), PathBuf::new()));
        a.insert(KeyDef::local("y".into(), "bbb".into(), PathBuf::new()));

        let mut b = KeySet::new();
        b.insert(KeyDef::local("x".into(), "aaa".into(), PathBuf::new()));

        let diff = a.difference(&store, &b, &store).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert!(diff.contains("y"));
    }

    #[tokio::test]
    async fn difference_empty_right_digest_forces_inclusion() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());

        let mut a = KeySet::new();
        a.insert(KeyDef::local("x".into(), "aaa".into(), PathBuf::new()));

        let mut b = KeySet::new();
        // no sum_key, no cached digest => digest resolves to "" (unknown)
        b.insert(KeyDef::remote("x".into()));

        let diff = a.difference(&store, &b, &store).await.unwrap();
        assert_eq!(diff.len(), 1);
    }
}
