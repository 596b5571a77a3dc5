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

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;
use tokio::io::AsyncRead;

/// One entry returned by `List`. Pagination is hidden from the caller —
/// every implementation iterates until it has drained the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedKey {
    pub key: String,
    pub size: u64,
    /// Store-side identity tag, ignored for correctness; surfaced only for
    /// diagnostics (`remote` command output, logs).
    pub etag: Option<String>,
}

/// The narrow capability set every backend (S3, local filesystem) exposes.
/// All walk/resolve/diff logic in `dogestry-sync` is built from these five
/// operations and never branches on which backend it is talking to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every key under `prefix`, fully paginated.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ListedKey>>;

    /// Whether `key` exists, without fetching its content.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Fetch the full content of `key`. Returns `StoreError::NotFound` if
    /// absent.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Fetch a byte range of `key`.
    async fn get_range(&self, key: &str, range: Range<u64>) -> StoreResult<Bytes>;

    /// Upload `size` bytes read from `reader` to `key`, applying
    /// server-side-private ACLs. Backends MAY use multipart upload
    /// internally for large objects.
    async fn put_stream(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
    ) -> StoreResult<()>;

    /// One-item listing used to confirm the store is reachable and
    /// authorized; returns a descriptive error otherwise.
    async fn validate(&self) -> StoreResult<()> {
        self.list("").await.map(|_| ())
    }

    /// Human description of the store, for `remote` and diagnostics.
    fn describe(&self) -> String;
}
