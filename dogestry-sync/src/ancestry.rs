//! DAG walk over an image's `Parent` chain (spec §4.4).

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


use crate::metadata::{fetch_metadata, ImageMetadata};
use crate::error::SyncError;
use dogestry_core::ImageId;
use dogestry_store::ObjectStore;
use std::collections::HashSet;

/// Returned by the visitor to steer the walk.
pub enum Control {
    Continue,
    StopOk,
    Error(SyncError),
}

/// Visits `head` and every ancestor reachable via `Parent`, calling
/// `visitor(id, metadata)` for each, where `metadata` is `None` exactly
/// when the store's `images/<id>/json` lookup returned `NotFound`. A
/// `NotFound` still invokes the visitor once before the walk terminates.
/// Cycle detection is not required by the spec; a bounded visited-set is
/// kept anyway as defence in depth against malformed/cyclic ancestor data.
pub async fn walk<F>(
    store: &dyn ObjectStore,
    head: &ImageId,
    mut visitor: F,
) -> Result<(), SyncError>
where
    F: FnMut(&ImageId, Option<&ImageMetadata>) -> Control,
{
    let mut current = Some(ImageId::new(head.stripped().to_string()));
    let mut visited = HashSet::new();

    while let Some(id) = current {
        if !visited.insert(id.stripped().to_string()) {
            break;
        }

        match fetch_metadata(store, &id).await {
            Ok(meta) => {
                let next = meta.parent_id();
                match visitor(&id, Some(&meta)) {
                    Control::Continue => current = next,
                    Control::StopOk => return Ok(()),
                    Control::Error(e) => return Err(e),
                }
            }
            Err(e @ SyncError::Store(_))
                if matches!(&e, SyncError::Store(inner) if inner.is_not_found()) =>
            {
                match visitor(&id, None) {
                    Control::Error(custom) => return Err(custom),
                    _ => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dogestry_store::LocalFsStore;
    use tempfile::tempdir;

    async fn put_metadata(store: &LocalFsStore, id: &str, parent: Option<&str>) {
        let mut obj = serde_json::Map::new();
        if let Some(p) = parent {
            obj.insert("Parent".to_string(), serde_json::Value::String(p.to_string()));
        }
        let body = serde_json::to_vec(&obj).unwrap();
        store
            .put_stream(
                &format!("images/{id}/json"),
                Box::new(std::io::Cursor::new(body.clone())),
                body.len() as u64,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn walk_visits_each_ancestor_once() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "c", Some("b")).await;
        put_metadata(&store, "b", Some("a")).await;
        put_metadata(&store, "a", None).await;

        let mut seen = Vec::new();
        walk(&store, &ImageId::new("c"), |id, _meta| {
            seen.push(id.stripped().to_string());
            Control::Continue
        })
        .await
        .unwrap();

        assert_eq!(seen, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn stop_ok_truncates_and_succeeds() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        put_metadata(&store, "c", Some("b")).await;
        put_metadata(&store, "b", Some("a")).await;
        put_metadata(&store, "a", None).await;

        let mut seen = Vec::new();
        let result = walk(&store, &ImageId::new("c"), |id, _meta| {
            seen.push(id.stripped().to_string());
            if id.stripped() == "b" {
                Control::StopOk
            } else {
                Control::Continue
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(seen, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn not_found_invokes_visitor_once_then_terminates() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());

        let mut calls = 0;
        let result = walk(&store, &ImageId::new("missing"), |_id, meta| {
            calls += 1;
            assert!(meta.is_none());
            Control::Continue
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
