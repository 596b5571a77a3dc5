//! The daemon is an external collaborator (spec §1 scope notes): this

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

//! crate only defines the capability surface the sync engine needs against
//! it. A concrete implementation lives in `dogestry-daemon`.

use async_trait::async_trait;
use dogestry_core::{ImageId, ImageRef};
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("daemon unavailable: {0}")]
    Unavailable(String),

    #[error("image not found on daemon: {0}")]
    NotFound(String),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[async_trait]
pub trait DaemonAdapter: Send + Sync {
    /// Resolve a repo:tag to the daemon's notion of its head image id.
    async fn resolve_head(&self, image_ref: &ImageRef) -> DaemonResult<ImageId>;

    /// Full ancestor history, head-first, including `id` itself.
    async fn image_history(&self, id: &ImageId) -> DaemonResult<Vec<ImageId>>;

    /// Whether `id` already exists on this daemon.
    async fn inspect_image(&self, id: &ImageId) -> DaemonResult<bool>;

    /// Stream `id`'s image tar out of the daemon.
    async fn export_image(&self, id: &ImageId) -> DaemonResult<Box<dyn AsyncRead + Send + Unpin>>;

    /// Stream an image tar into the daemon.
    async fn load_image(&self, reader: Box<dyn AsyncRead + Send + Unpin>) -> DaemonResult<()>;

    /// Human-readable endpoint description, for status aggregation.
    fn describe(&self) -> String;
}
