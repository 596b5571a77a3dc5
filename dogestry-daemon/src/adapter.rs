//! Concrete `DaemonAdapter` over the local container daemon, via `bollard`

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

//! (grounded on the Docker client usage in fossas-circe's `docker.rs`).

use async_trait::async_trait;
use bollard::image::ImportImageOptions;
use bollard::Docker;
use dogestry_core::{ImageId, ImageRef};
use dogestry_sync::{DaemonAdapter, DaemonError, DaemonResult};
use futures::StreamExt;
use hyper::Body;
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};

pub struct BollardDaemonAdapter {
    docker: Docker,
}

impl BollardDaemonAdapter {
    pub fn connect_local() -> DaemonResult<BollardDaemonAdapter> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?;
        Ok(BollardDaemonAdapter { docker })
    }

    pub fn from_host_spec(spec: &dogestry_core::HostSpec) -> DaemonResult<BollardDaemonAdapter> {
        let addr = match spec.port {
            Some(port) => format!("{}://{}:{}", spec.scheme, spec.host, port),
            None => format!("{}://{}", spec.scheme, spec.host),
        };
        let docker = Docker::connect_with_http(&addr, 120, bollard::API_DEFAULT_VERSION)
            .map_err(|e| DaemonError::Unavailable(e.to_string()))?;
        Ok(BollardDaemonAdapter { docker })
    }
}

#[async_trait]
impl DaemonAdapter for BollardDaemonAdapter {
    async fn resolve_head(&self, image_ref: &ImageRef) -> DaemonResult<ImageId> {
        let inspect = self
            .docker
            .inspect_image(&image_ref.to_string())
            .await
            .map_err(not_found_or_unavailable)?;
        inspect
            .id
            .map(ImageId::new)
            .ok_or_else(|| DaemonError::NotFound(image_ref.to_string()))
    }

    async fn image_history(&self, id: &ImageId) -> DaemonResult<Vec<ImageId>> {
        let history = self
            .docker
            .image_history(id.stripped())
            .await
            .map_err(not_found_or_unavailable)?;
        Ok(history
            .into_iter()
            .filter(|item| item.id != "<missing>")
            .map(|item| ImageId::new(item.id))
            .collect())
    }

    async fn inspect_image(&self, id: &ImageId) -> DaemonResult<bool> {
        match self.docker.inspect_image(id.stripped()).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(DaemonError::Unavailable(e.to_string())),
        }
    }

    async fn export_image(&self, id: &ImageId) -> DaemonResult<Box<dyn AsyncRead + Send + Unpin>> {
        let stream = self
            .docker
            .export_image(id.stripped())
            .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn load_image(&self, reader: Box<dyn AsyncRead + Send + Unpin>) -> DaemonResult<()> {
        let body_stream = ReaderStream::new(reader);
        let mut import = self.docker.import_image(
            ImportImageOptions { quiet: true },
            Body::wrap_stream(body_stream),
            None,
        );
        while let Some(progress) = import.next().await {
            progress.map_err(|e| DaemonError::Unavailable(e.to_string()))?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "local container daemon".to_string()
    }
}

fn not_found_or_unavailable(e: bollard::errors::Error) -> DaemonError {
    match e {
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
            DaemonError::NotFound(e.to_string())
        }
        other => DaemonError::Unavailable(other.to_string()),
    }
}
