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

mod args;
mod commands;
mod config;
mod daemons;
mod login;
mod rundriver;

use args::{Args, Command};
use clap::Parser;
use std::path::Path;

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let rt = tokio::runtime::Runtime::new().expect("failed to start the async runtime");
    if let Err(e) = rt.block_on(run(args)) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if let Command::Version = args.command {
        println!("dogestry {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if args.server {
        return serve(&args).await;
    }

    let lockfile = args.lockfile.clone();
    let _lock_guard = match &lockfile {
        Some(path) => Some(rundriver::acquire_lock(path).await?),
        None => None,
    };

    // Scratch dirs are allocated here, before `guarded` races the work
    // future against SIGINT/SIGTERM, so cancellation still cleans up the
    // real directory instead of a stale `None`.
    let (scratch_dir, keep_scratch) = match &args.command {
        Command::Push { .. } => (Some(commands::new_scratch_dir(&args, "push")?), false),
        Command::Pull { .. } => (Some(commands::new_scratch_dir(&args, "pull")?), false),
        Command::Download { .. } => (Some(commands::new_scratch_dir(&args, "pull")?), true),
        _ => (None, false),
    };

    rundriver::guarded(scratch_dir.as_deref(), keep_scratch, dispatch(&args, scratch_dir.as_deref())).await
}

async fn dispatch(args: &Args, scratch_dir: Option<&Path>) -> anyhow::Result<()> {
    match &args.command {
        Command::Push { store_url, image } => {
            let dir = scratch_dir.expect("push always allocates a scratch dir");
            commands::push(store_url, image, args, dir).await
        }
        Command::Pull { store_url, image } => {
            let dir = scratch_dir.expect("pull always allocates a scratch dir");
            commands::pull(store_url, image, args, dir).await
        }
        Command::Download { store_url, image } => {
            let dir = scratch_dir.expect("download always allocates a scratch dir");
            commands::download(store_url, image, args, dir).await
        }
        Command::Upload { image_dir } => commands::upload(image_dir, args).await,
        Command::List { store_url } => commands::list(store_url).await,
        Command::Remote { store_url } => commands::remote(store_url).await,
        Command::Login { registry, username, password, password_stdin } => {
            commands::login(registry, username, password.clone(), *password_stdin)
        }
        Command::Version => unreachable!("handled before dispatch"),
    }
}

async fn serve(args: &Args) -> anyhow::Result<()> {
    let store_url = match &args.command {
        Command::Pull { store_url, .. } | Command::Push { store_url, .. } => store_url.clone(),
        _ => anyhow::bail!("--server requires a store URL; pass it as the pull/push command's argument"),
    };

    let store = dogestry_store::open(&store_url).await?;
    let daemon_list = daemons::resolve(args)?;
    let scratch_root = args
        .tempdir
        .clone()
        .unwrap_or_else(std::env::temp_dir)
        .join("dogestry-service");
    tokio::fs::create_dir_all(&scratch_root).await?;

    let state = dogestry_daemon::ServiceState {
        store: store.into(),
        daemons: daemon_list,
        scratch_root,
    };

    dogestry_daemon::serve(&args.address, args.port, state).await?;
    Ok(())
}
