//! Helper HTTP service (server mode, spec §4.8): accepts a pull request,

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

//! decodes the forwarded credentials, runs the local pull pipeline, and
//! streams newline-delimited JSON status back to the caller.

use actix_web::web::Bytes;
use actix_web::{web, App, HttpResponse, HttpServer};
use base64::decode as base64_decode;
use dogestry_core::ImageRef;
use dogestry_store::ObjectStore;
use dogestry_sync::{DaemonAdapter, ProgressSink, SyncEvent};
use futures::stream;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-request dependencies the handler needs to run a pull; constructed
/// once at server start-up and shared via `web::Data` (spec §9: no mutable
/// global CLI handle, a request-scoped pipeline factory instead).
pub struct ServiceState {
    pub store: Arc<dyn ObjectStore>,
    pub daemons: Vec<Arc<dyn DaemonAdapter>>,
    pub scratch_root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CreateQuery {
    #[serde(rename = "fromImage")]
    from_image: String,
}

#[derive(Debug, Deserialize)]
struct RegistryAuth {
    #[allow(dead_code)]
    #[serde(rename = "Username", default)]
    username: String,
    #[allow(dead_code)]
    #[serde(rename = "Password", default)]
    password: String,
    #[allow(dead_code)]
    #[serde(rename = "Email", default)]
    email: String,
}

pub async fn status_check() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

pub async fn root() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "error": "use POST /{apiVer}/images/create?fromImage=<image>" }))
}

pub async fn images_create(
    state: web::Data<ServiceState>,
    query: web::Query<CreateQuery>,
    req: actix_web::HttpRequest,
) -> HttpResponse {
    if let Some(header) = req.headers().get("X-Registry-Auth") {
        if let Ok(raw) = header.to_str() {
            if let Ok(decoded) = base64_decode(raw) {
                let _: Result<RegistryAuth, _> = serde_json::from_slice(&decoded);
            }
        }
    }

    let image_ref: ImageRef = query.from_image.parse().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ProgressSink::new(tx);

    let store = Arc::clone(&state.store);
    let daemons = state.daemons.clone();
    let scratch_dir = state.scratch_root.join(uuid::Uuid::new_v4().to_string());
    let scratch_for_task = scratch_dir.clone();

    tokio::spawn(async move {
        let _ = tokio::fs::create_dir_all(&scratch_for_task).await;
        let result = dogestry_sync::pull(
            store.as_ref(),
            &daemons,
            &image_ref,
            &scratch_for_task,
            Some(&sink),
        )
        .await;

        match result {
            Ok(_) => {
                let loads = crate::orchestrator::send_tar(&scratch_for_task, &daemons).await;
                match loads.iter().find(|(_, status)| matches!(status, crate::orchestrator::HostStatus::Failed { .. })) {
                    Some((host, crate::orchestrator::HostStatus::Failed { error })) => {
                        sink.emit(SyncEvent::Error(format!("{host}: {error}")));
                    }
                    _ => sink.emit(SyncEvent::Progress("Done".to_string())),
                }
            }
            Err(e) => sink.emit(SyncEvent::Error(e.to_string())),
        }
        tokio::fs::remove_dir_all(&scratch_for_task).await.ok();
    });

    let body = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let line = match event {
            SyncEvent::Progress(msg) => serde_json::json!({ "status": msg }),
            SyncEvent::Error(msg) => serde_json::json!({ "error": msg }),
        };
        let mut bytes = serde_json::to_vec(&line).unwrap();
        bytes.push(b'\n');
        Some((Ok::<_, actix_web::Error>(Bytes::from(bytes)), rx))
    });

    HttpResponse::Ok()
        .content_type("application/json")
        .streaming(body)
}

pub async fn serve(address: &str, port: u16, state: ServiceState) -> std::io::Result<()> {
    let data = web::Data::new(state);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/status/check", web::get().to(status_check))
            .route("/", web::get().to(root))
            .route("/{api_ver}/images/create", web::post().to(images_create))
    })
    .bind((address, port))?
    .run()
    .await
}
