//! Loads an already-assembled layout into N daemons concurrently and

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

//! aggregates per-host status (spec §4.6).

use dogestry_sync::DaemonAdapter;
use futures::future::join_all;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HostStatus {
    Ok,
    Failed { error: String },
}

/// Re-encodes `layout_dir` once per daemon and streams it into `LoadImage`
/// in parallel; one worker per daemon, matching the orchestrator's fixed
/// pool-size-equals-host-count policy (spec §5).
pub async fn send_tar(
    layout_dir: &Path,
    daemons: &[Arc<dyn DaemonAdapter>],
) -> Vec<(String, HostStatus)> {
    info!(hosts = daemons.len(), "dispatching tar load to daemons");
    let jobs = daemons.iter().map(|daemon| {
        let layout_dir = layout_dir.to_path_buf();
        let daemon = Arc::clone(daemon);
        async move {
            let label = daemon.describe();
            debug!(host = %label, "loading image into daemon");
            let status = match load_one(&layout_dir, daemon.as_ref()).await {
                Ok(()) => HostStatus::Ok,
                Err(e) => {
                    warn!(host = %label, error = %e, "daemon failed to load image");
                    HostStatus::Failed { error: e.to_string() }
                }
            };
            (label, status)
        }
    });

    join_all(jobs).await
}

async fn load_one(layout_dir: &Path, daemon: &dyn DaemonAdapter) -> anyhow::Result<()> {
    let layout_dir = layout_dir.to_path_buf();
    let tar_path = layout_dir.join(".import.tar");
    let encode_path = tar_path.clone();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::create(&encode_path)?;
        dogestry_layout::encode_layout(&layout_dir, &mut file)
    })
    .await??;

    let file = tokio::fs::File::open(&tar_path).await?;
    daemon.load_image(Box::new(file)).await?;
    tokio::fs::remove_file(&tar_path).await.ok();
    Ok(())
}

/// Serialises a batch of host outcomes into the per-host JSON object the
/// CLI and the helper HTTP service both print.
pub fn to_json(results: &[(String, HostStatus)]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = results
        .iter()
        .map(|(host, status)| (host.clone(), serde_json::to_value(status).unwrap()))
        .collect();
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dogestry_core::{ImageId, ImageRef};
    use tempfile::tempdir;
    use tokio::io::AsyncRead;

    struct RecordingDaemon {
        name: String,
        fail: bool,
    }

    #[async_trait]
    impl DaemonAdapter for RecordingDaemon {
        async fn resolve_head(&self, _image_ref: &ImageRef) -> dogestry_sync::DaemonResult<ImageId> {
            unimplemented!()
        }
        async fn image_history(&self, _id: &ImageId) -> dogestry_sync::DaemonResult<Vec<ImageId>> {
            unimplemented!()
        }
        async fn inspect_image(&self, _id: &ImageId) -> dogestry_sync::DaemonResult<bool> {
            unimplemented!()
        }
        async fn export_image(
            &self,
            _id: &ImageId,
        ) -> dogestry_sync::DaemonResult<Box<dyn AsyncRead + Send + Unpin>> {
            unimplemented!()
        }
        async fn load_image(
            &self,
            _reader: Box<dyn AsyncRead + Send + Unpin>,
        ) -> dogestry_sync::DaemonResult<()> {
            if self.fail {
                Err(dogestry_sync::DaemonError::Unavailable("boom".to_string()))
            } else {
                Ok(())
            }
        }
        fn describe(&self) -> String {
            self.name.clone()
        }
    }

    #[tokio::test]
    async fn aggregates_mixed_outcomes_per_host() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("images/a")).unwrap();
        std::fs::write(dir.path().join("images/a/json"), b"{}").unwrap();

        let daemons: Vec<Arc<dyn DaemonAdapter>> = vec![
            Arc::new(RecordingDaemon { name: "ok-host".to_string(), fail: false }),
            Arc::new(RecordingDaemon { name: "bad-host".to_string(), fail: true }),
        ];

        let results = send_tar(dir.path(), &daemons).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, HostStatus::Ok));
        assert!(matches!(results[1].1, HostStatus::Failed { .. }));
    }
}
