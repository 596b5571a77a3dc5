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

use crate::error::{SyncError, SyncResult};
use dogestry_core::ImageId;
use dogestry_store::ObjectStore;
use serde::{Deserialize, Serialize};

/// Mirrors the daemon's image record. Only `parent` is meaningful to the
/// ancestry walk; every other field is opaque and round-trips unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    #[serde(default, rename = "Parent", skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImageMetadata {
    pub fn parent_id(&self) -> Option<ImageId> {
        self.parent
            .as_ref()
            .filter(|p| !p.is_empty())
            .map(|p| ImageId::new(p.clone()))
    }
}

/// Fetch and decode `images/<id>/json` from the store.
pub async fn fetch_metadata(store: &dyn ObjectStore, id: &ImageId) -> SyncResult<ImageMetadata> {
    let key = format!("images/{}/json", id.stripped());
    let bytes = store.get(&key).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| SyncError::Layout(dogestry_layout::LayoutError::BadArchive(e.to_string())))
}
