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

pub mod error;
pub mod keyspace;
pub mod local_fs;
pub mod object_store;
pub mod s3;

pub use error::{StoreError, StoreResult};
pub use keyspace::{local_keys, repo_keys, BlobDescriptor, KeyDef, KeySet};
pub use local_fs::LocalFsStore;
pub use object_store::{ListedKey, ObjectStore};
pub use s3::S3Store;

/// Construct the `ObjectStore` named by a remote URL: `s3://...` dispatches
/// to the S3 backend, everything else is treated as a local filesystem path
/// (bare paths and `file://` URLs alike), matching the CLI's acceptance of
/// both forms for `--url`.
pub async fn open(url: &str) -> StoreResult<Box<dyn ObjectStore>> {
    if url.starts_with("s3://") {
        Ok(Box::new(S3Store::connect(url).await?))
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        Ok(Box::new(LocalFsStore::new(path)))
    }
}
