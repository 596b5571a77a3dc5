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

//! One function per CLI subcommand (spec §6).

use crate::args::Args;
use crate::config;
use dogestry_core::ImageRef;
use dogestry_daemon::fanout::{self, Credentials};
use dogestry_daemon::orchestrator::{self, HostStatus};
use dogestry_sync::{ProgressSink, SyncEvent};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;

fn print_progress(mut rx: mpsc::UnboundedReceiver<SyncEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                SyncEvent::Progress(msg) => eprintln!("{msg}"),
                SyncEvent::Error(msg) => eprintln!("error: {msg}"),
            }
        }
    })
}

/// Allocates a fresh scratch directory under `-tempdir` (or the system
/// default); ownership of cleanup belongs to `rundriver::guarded`, not
/// to the caller, so the directory survives a SIGINT/SIGTERM race.
pub fn new_scratch_dir(args: &Args, label: &str) -> anyhow::Result<PathBuf> {
    let root = args
        .tempdir
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let dir = root.join(format!("dogestry-{label}-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn print_host_statuses(results: &[(String, HostStatus)]) {
    println!("{}", orchestrator::to_json(results));
    for (host, status) in results {
        if let HostStatus::Failed { error } = status {
            eprintln!("{host}: {error}");
        }
    }
}

fn any_failed(results: &[(String, HostStatus)]) -> bool {
    results.iter().any(|(_, s)| matches!(s, HostStatus::Failed { .. }))
}

pub async fn push(store_url: &str, image: &str, args: &Args, scratch_dir: &Path) -> anyhow::Result<()> {
    let image_ref = ImageRef::from_str(image).expect("ImageRef parsing is infallible");
    let store = dogestry_store::open(store_url).await?;
    let daemons = crate::daemons::resolve(args)?;
    let daemon = daemons
        .first()
        .ok_or_else(|| anyhow::anyhow!("no local daemon configured"))?;

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ProgressSink::new(tx);
    let printer = print_progress(rx);

    let outcome = dogestry_sync::push(
        daemon.as_ref(),
        store.as_ref(),
        &image_ref,
        scratch_dir,
        Some(&sink),
    )
    .await;

    drop(sink);
    let _ = printer.await;

    let outcome = outcome?;
    if outcome.nothing_to_push {
        println!("nothing to push, tag updated");
    } else {
        println!("pushed {} blob(s)", outcome.uploaded);
    }
    Ok(())
}

pub async fn pull(store_url: &str, image: &str, args: &Args, scratch_dir: &Path) -> anyhow::Result<()> {
    let image_ref = ImageRef::from_str(image).expect("ImageRef parsing is infallible");
    let hosts = fanout::parse_hosts(&args.pullhosts);

    if !hosts.is_empty() && !args.force_local {
        let client = reqwest::Client::new();
        let probes = fanout::probe_all(&client, &hosts, args.port).await;
        if fanout::all_positive(&probes) {
            let creds = resolve_helper_credentials(store_url);
            let results = fanout::delegate(&client, &hosts, args.port, "v1", image, &creds).await;
            print_host_statuses(&results);
            if any_failed(&results) {
                anyhow::bail!("one or more hosts failed to pull");
            }
            return Ok(());
        }
        eprintln!("not all pull hosts have a helper service reachable, falling back to local pull");
    }

    local_pull(store_url, &image_ref, args, false, scratch_dir).await
}

pub async fn download(store_url: &str, image: &str, args: &Args, scratch_dir: &Path) -> anyhow::Result<()> {
    let image_ref = ImageRef::from_str(image).expect("ImageRef parsing is infallible");
    local_pull(store_url, &image_ref, args, true, scratch_dir).await
}

async fn local_pull(
    store_url: &str,
    image_ref: &ImageRef,
    args: &Args,
    stop_after_assembly: bool,
    scratch_dir: &Path,
) -> anyhow::Result<()> {
    let store = dogestry_store::open(store_url).await?;
    let daemons = crate::daemons::resolve(args)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ProgressSink::new(tx);
    let printer = print_progress(rx);

    let pull_result =
        dogestry_sync::pull(store.as_ref(), &daemons, image_ref, scratch_dir, Some(&sink)).await;

    drop(sink);
    let _ = printer.await;
    pull_result?;

    if stop_after_assembly {
        println!("{}", scratch_dir.display());
        return Ok(());
    }

    let results = orchestrator::send_tar(scratch_dir, &daemons).await;
    print_host_statuses(&results);
    if any_failed(&results) {
        anyhow::bail!("one or more daemons failed to load the image");
    }
    Ok(())
}

pub async fn upload(image_dir: &Path, args: &Args) -> anyhow::Result<()> {
    let daemons = crate::daemons::resolve(args)?;
    let results = orchestrator::send_tar(image_dir, &daemons).await;
    print_host_statuses(&results);
    if any_failed(&results) {
        anyhow::bail!("one or more daemons failed to load the image");
    }
    Ok(())
}

pub async fn list(store_url: &str) -> anyhow::Result<()> {
    let store = dogestry_store::open(store_url).await?;
    let entries = store.list("repositories/").await?;
    for entry in entries {
        println!("{}", entry.key);
    }
    Ok(())
}

pub async fn remote(store_url: &str) -> anyhow::Result<()> {
    let store = dogestry_store::open(store_url).await?;
    println!("{}", store.describe());
    Ok(())
}

pub fn login(registry: &str, username: &str, password: Option<String>, password_stdin: bool) -> anyhow::Result<()> {
    if password.is_none() && !password_stdin {
        anyhow::bail!("at least --password <password> or --password-stdin is required");
    }
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line.trim_end().to_string()
        }
    };
    crate::login::login(registry, username, &password)
}

fn resolve_helper_credentials(store_url: &str) -> Credentials {
    let creds = config::resolve_aws_credentials();
    Credentials {
        username: creds.access_key.unwrap_or_default(),
        password: creds.secret_key.unwrap_or_default(),
        email: store_url.to_string(),
    }
}
