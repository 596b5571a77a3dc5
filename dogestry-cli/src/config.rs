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

//! Environment and config-file resolution (spec §6 Environment, §4.9).

use dogestry_core::HostSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// AWS credentials resolved from the environment, long-form variable names
/// winning over the short-form ones when both are set.
#[derive(Debug, Clone, Default)]
pub struct AwsCredentials {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

pub fn resolve_aws_credentials() -> AwsCredentials {
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("AWS_ACCESS_KEY"))
        .ok();
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("AWS_SECRET_KEY"))
        .ok();
    AwsCredentials { access_key, secret_key }
}

/// The local container-daemon endpoint, overridden by `DOCKER_HOST` and
/// authenticated via `DOCKER_CERT_PATH` (falling back to `~/.docker`).
#[derive(Debug, Clone)]
pub struct DaemonEndpoint {
    pub host: Option<HostSpec>,
    pub cert_path: Option<PathBuf>,
}

pub fn resolve_daemon_endpoint() -> DaemonEndpoint {
    let host = std::env::var("DOCKER_HOST")
        .ok()
        .and_then(|raw| HostSpec::parse(&raw).ok());

    let cert_path = std::env::var_os("DOCKER_CERT_PATH")
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".docker")))
        .filter(|path| path.is_dir());

    DaemonEndpoint { host, cert_path }
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// The `-config` JSON file, currently only naming extra remote daemon
/// endpoints for `push`/`pull`'s orchestrator fan-out (spec §4.6: "given N
/// daemon endpoints"); the local daemon from `DOCKER_HOST` is always
/// included in addition to whatever this file names.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub daemons: Vec<String>,
}

pub fn load_config_file(path: &Path) -> anyhow::Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_defaults_to_no_daemons_when_field_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let config = load_config_file(&path).unwrap();
        assert!(config.daemons.is_empty());
    }

    #[test]
    fn config_file_parses_daemon_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"daemons":["tcp://10.0.0.5:2376","tcp://10.0.0.6:2376"]}"#)
            .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.daemons, vec!["tcp://10.0.0.5:2376", "tcp://10.0.0.6:2376"]);
    }

    #[test]
    fn load_config_file_propagates_missing_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(load_config_file(&path).is_err());
    }
}
