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

//! Wraps one CLI invocation: exclusive lock file, signal-driven
//! cancellation, and guaranteed scratch-directory cleanup (spec §4.9).

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct LockGuard {
    path: Option<PathBuf>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Busy-waits for exclusive ownership of `path`, retrying every second on
/// contention; any other I/O error is fatal immediately.
pub async fn acquire_lock(path: &Path) -> std::io::Result<LockGuard> {
    loop {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => return Ok(LockGuard { path: Some(path.to_path_buf()) }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Races `work` against SIGINT/SIGTERM; cancellation wins the race and
/// drops `work` in place, but `cleanup` still runs on every exit path
/// except when `keep_scratch` is set (the `download` command's contract).
pub async fn guarded<F, T>(
    scratch_dir: Option<&Path>,
    keep_scratch: bool,
    work: F,
) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = tokio::select! {
        result = work => result,
        _ = wait_for_shutdown_signal() => Err(anyhow::anyhow!("interrupted")),
    };

    if !keep_scratch {
        if let Some(dir) = scratch_dir {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }

    result
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("installing a SIGTERM handler should not fail");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_lock_creates_and_removes_file_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dogestry.lock");

        let guard = acquire_lock(&path).await.unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn acquire_lock_retries_until_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dogestry.lock");

        let holder = acquire_lock(&path).await.unwrap();
        let waiter_path = path.clone();
        let waiter = tokio::spawn(async move { acquire_lock(&waiter_path).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(holder);
        let guard = tokio::time::timeout(Duration::from_secs(3), waiter)
            .await
            .expect("waiter should acquire the lock once released")
            .unwrap()
            .unwrap();
        assert!(path.exists());
        drop(guard);
    }

    #[tokio::test]
    async fn guarded_cleans_up_scratch_dir_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();

        guarded(Some(&scratch), false, async { Ok(()) }).await.unwrap();
        assert!(!scratch.exists());

        std::fs::create_dir_all(&scratch).unwrap();
        guarded(Some(&scratch), true, async { Ok(()) }).await.unwrap();
        assert!(scratch.exists());
    }

    #[tokio::test]
    async fn guarded_propagates_work_errors() {
        let err = guarded::<_, ()>(None, false, async { anyhow::bail!("boom") })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
