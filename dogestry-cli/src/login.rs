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

//! `login`: appends a credential to the standard container-daemon config
//! file, falling back to the legacy bare-auths-map `.dockercfg` (spec §6).

use crate::config::home_dir;
use serde_json::{Map, Value};
use std::path::PathBuf;

fn config_json_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".docker").join("config.json"))
}

fn legacy_dockercfg_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".dockercfg"))
}

pub fn login(registry: &str, username: &str, password: &str) -> anyhow::Result<()> {
    let auth = base64::encode(format!("{username}:{password}"));
    let entry = serde_json::json!({ "auth": auth });

    if let Some(path) = config_json_path() {
        if path.exists() {
            return write_modern(&path, registry, entry);
        }
    }

    let path = legacy_dockercfg_path()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory for credential file"))?;
    write_legacy(&path, registry, entry)
}

/// `~/.docker/config.json` preserves every top-level key it didn't
/// understand; only `auths[<registry>]` is touched.
fn write_modern(path: &std::path::Path, registry: &str, entry: Value) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let mut doc: Value = serde_json::from_str(&raw)?;

    let root = doc
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("{} is not a JSON object", path.display()))?;
    let auths = root
        .entry("auths")
        .or_insert_with(|| Value::Object(Map::new()));
    auths
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("\"auths\" in {} is not an object", path.display()))?
        .insert(registry.to_string(), entry);

    let encoded = serde_json::to_vec_pretty(&doc)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encoded)?;
    Ok(())
}

/// Legacy `.dockercfg` files are the bare `{registry: {auth: ...}}` map,
/// with no `auths` wrapper; re-serialised in that same legacy shape.
fn write_legacy(path: &std::path::Path, registry: &str, entry: Value) -> anyhow::Result<()> {
    let mut doc: Map<String, Value> = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).unwrap_or_default()
    } else {
        Map::new()
    };

    doc.insert(registry.to_string(), entry);

    let encoded = serde_json::to_vec_pretty(&Value::Object(doc))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_modern_preserves_unknown_keys_and_existing_auths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths":{"other.example":{"auth":"xxx"}},"credsStore":"osxkeychain"}"#,
        )
        .unwrap();

        let auth = base64::encode("alice:hunter2");
        write_modern(&path, "registry.example", serde_json::json!({ "auth": auth })).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["credsStore"], "osxkeychain");
        assert_eq!(doc["auths"]["other.example"]["auth"], "xxx");
        assert_eq!(doc["auths"]["registry.example"]["auth"], auth);
    }

    #[test]
    fn write_modern_rejects_non_object_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = write_modern(&path, "registry.example", serde_json::json!({ "auth": "x" }))
            .unwrap_err();
        assert!(err.to_string().contains("not a JSON object"));
    }

    #[test]
    fn write_legacy_creates_bare_map_with_no_auths_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dockercfg");

        let auth = base64::encode("bob:swordfish");
        write_legacy(&path, "legacy.example", serde_json::json!({ "auth": auth })).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(doc.get("auths").is_none());
        assert_eq!(doc["legacy.example"]["auth"], auth);
    }

    #[test]
    fn write_legacy_merges_with_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".dockercfg");
        std::fs::write(&path, r#"{"existing.example":{"auth":"yyy"}}"#).unwrap();

        write_legacy(&path, "new.example", serde_json::json!({ "auth": "zzz" })).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["existing.example"]["auth"], "yyy");
        assert_eq!(doc["new.example"]["auth"], "zzz");
    }
}
