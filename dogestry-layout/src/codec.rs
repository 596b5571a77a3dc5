//! Decode a daemon's image tar stream into the keyed scratch layout, and

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

//! encode a layout back into a tar stream suitable for `LoadImage`.

use crate::error::{LayoutError, LayoutResult};
use crate::header::{blocks_for, is_end_marker, write_end_markers, write_entry, write_stream_entry, RawTarHeader, BLOCK_SIZE};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

type Repositories = BTreeMap<String, BTreeMap<String, String>>;

/// Reads `reader` as a tar stream and materialises it under `dest` as
/// `images/<id>/<tail>` plus expanded `repositories/<repo>/<tag>` files.
/// When `retain_ids` is set, entries whose id isn't in the set are drained
/// from the stream but never written.
pub fn decode_image_tar<R: Read>(
    mut reader: R,
    dest: &Path,
    retain_ids: Option<&HashSet<String>>,
) -> LayoutResult<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    let mut consecutive_empty = 0u32;

    loop {
        if !try_read_block(&mut reader, &mut buf)? {
            break;
        }
        if is_end_marker(&buf) {
            consecutive_empty += 1;
            if consecutive_empty >= 2 {
                break;
            }
            continue;
        }
        consecutive_empty = 0;

        let header = RawTarHeader::from_bytes(buf);
        if !header.is_valid() {
            return Err(LayoutError::BadArchive(
                "invalid tar header checksum".to_string(),
            ));
        }

        let content_len = header.content_length()?;
        let blocks = blocks_for(content_len);

        if !header.is_regular_file() {
            skip_blocks(&mut reader, blocks)?;
            continue;
        }

        let raw_path = header.file_path()?;
        let path = raw_path.strip_prefix("./").unwrap_or(&raw_path);
        if path.starts_with('/') {
            return Err(LayoutError::BadArchive(format!(
                "absolute path in archive: {path}"
            )));
        }

        let basename = path.rsplit('/').next().unwrap_or(path);
        if basename == "repositories" {
            let mut content = vec![0u8; content_len as usize];
            reader.read_exact(&mut content)?;
            skip_padding(&mut reader, blocks, content_len)?;
            write_repositories(dest, &content)?;
            continue;
        }

        let mut parts = path.splitn(2, '/');
        let id = parts.next().unwrap_or(path).to_string();
        let tail = parts.next().unwrap_or("").to_string();

        if tail.is_empty() {
            // a bare file with no id prefix carries nothing this format
            // can place; drain and move on.
            skip_blocks(&mut reader, blocks)?;
            continue;
        }

        if let Some(retain) = retain_ids {
            if !retain.contains(&id) {
                skip_blocks(&mut reader, blocks)?;
                continue;
            }
        }

        let out_path = dest.join("images").join(&id).join(&tail);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut (&mut reader).take(content_len), &mut out)?;
        skip_padding(&mut reader, blocks, content_len)?;
    }

    Ok(())
}

fn write_repositories(dest: &Path, content: &[u8]) -> LayoutResult<()> {
    let repos: Repositories = serde_json::from_slice(content)?;
    for (repo, tags) in repos {
        for (tag, id) in tags {
            let path = dest.join("repositories").join(&repo).join(&tag);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, id.as_bytes())?;
        }
    }
    Ok(())
}

fn try_read_block<R: Read>(reader: &mut R, buf: &mut [u8; BLOCK_SIZE]) -> LayoutResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn skip_blocks<R: Read>(reader: &mut R, blocks: u64) -> LayoutResult<()> {
    std::io::copy(&mut reader.take(blocks * BLOCK_SIZE as u64), &mut std::io::sink())?;
    Ok(())
}

fn skip_padding<R: Read>(reader: &mut R, blocks: u64, content_len: u64) -> LayoutResult<()> {
    let padding = blocks * BLOCK_SIZE as u64 - content_len;
    std::io::copy(&mut reader.take(padding), &mut std::io::sink())?;
    Ok(())
}

/// Streams `layout_dir` back into a daemon-compatible tar: every file under
/// `images/` is rewritten at `<id>/<tail>`, and `repositories/<repo>/<tag>`
/// files are collapsed back into a single JSON `repositories` member.
pub fn encode_layout<W: Write>(layout_dir: &Path, writer: &mut W) -> LayoutResult<()> {
    let images_dir = layout_dir.join("images");
    if images_dir.is_dir() {
        write_dir_entries(&images_dir, &images_dir, writer)?;
    }

    let repos = collect_repositories(&layout_dir.join("repositories"))?;
    if !repos.is_empty() {
        let json = serde_json::to_vec(&repos)?;
        write_entry(writer, "repositories", &json)?;
    }

    write_end_markers(writer)?;
    Ok(())
}

fn write_dir_entries<W: Write>(root: &Path, dir: &Path, writer: &mut W) -> LayoutResult<()> {
    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            write_dir_entries(root, &path, writer)?;
            continue;
        }
        let rel = relative_slash_path(root, &path);
        let size = entry.metadata()?.len();
        let file = std::fs::File::open(&path)?;
        write_stream_entry(writer, &rel, size, file)?;
    }
    Ok(())
}

fn collect_repositories(dir: &Path) -> LayoutResult<Repositories> {
    let mut map = Repositories::new();
    if dir.is_dir() {
        collect_repositories_walk(dir, dir, &mut map)?;
    }
    Ok(map)
}

fn collect_repositories_walk(root: &Path, dir: &Path, map: &mut Repositories) -> LayoutResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_repositories_walk(root, &path, map)?;
            continue;
        }
        let id = std::fs::read_to_string(&path)?;
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let tag = rel
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let repo = rel
            .parent()
            .map(|p| relative_slash_path(Path::new(""), p))
            .unwrap_or_default();
        map.entry(repo).or_default().insert(tag, id.trim().to_string());
    }
    Ok(())
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::write_entry as write_raw_entry;
    use tempfile::tempdir;

    fn build_sample_tar() -> Vec<u8> {
        let mut out = Vec::new();
        write_raw_entry(&mut out, "deadbeef/json", b"{\"id\":\"deadbeef\"}").unwrap();
        write_raw_entry(&mut out, "deadbeef/layer.tar", b"layerbytes").unwrap();
        write_raw_entry(&mut out, "deadbeef/VERSION", b"1.0").unwrap();
        write_raw_entry(&mut out, "repositories", br#"{"lib/foo":{"latest":"deadbeef"}}"#).unwrap();
        write_end_markers(&mut out).unwrap();
        out
    }

    #[test]
    fn decode_expands_repositories_and_images() {
        let dir = tempdir().unwrap();
        decode_image_tar(build_sample_tar().as_slice(), dir.path(), None).unwrap();

        let json = std::fs::read_to_string(dir.path().join("images/deadbeef/json")).unwrap();
        assert_eq!(json, "{\"id\":\"deadbeef\"}");
        let tag = std::fs::read_to_string(dir.path().join("repositories/lib/foo/latest")).unwrap();
        assert_eq!(tag, "deadbeef");
    }

    #[test]
    fn decode_prunes_by_retain_ids() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        write_raw_entry(&mut out, "deadbeef/json", b"keep").unwrap();
        write_raw_entry(&mut out, "cafebabe/json", b"drop").unwrap();
        write_end_markers(&mut out).unwrap();

        let mut retain = HashSet::new();
        retain.insert("deadbeef".to_string());
        decode_image_tar(out.as_slice(), dir.path(), Some(&retain)).unwrap();

        assert!(dir.path().join("images/deadbeef/json").exists());
        assert!(!dir.path().join("images/cafebabe").exists());
    }

    #[test]
    fn decode_rejects_absolute_paths() {
        let dir = tempdir().unwrap();
        let mut out = Vec::new();
        write_raw_entry(&mut out, "/etc/passwd", b"x").unwrap();
        write_end_markers(&mut out).unwrap();

        let err = decode_image_tar(out.as_slice(), dir.path(), None).unwrap_err();
        assert!(matches!(err, LayoutError::BadArchive(_)));
    }

    #[test]
    fn round_trip_preserves_member_set() {
        let dir = tempdir().unwrap();
        decode_image_tar(build_sample_tar().as_slice(), dir.path(), None).unwrap();

        let mut encoded = Vec::new();
        encode_layout(dir.path(), &mut encoded).unwrap();

        let dir2 = tempdir().unwrap();
        decode_image_tar(encoded.as_slice(), dir2.path(), None).unwrap();

        assert_eq!(
            std::fs::read(dir.path().join("images/deadbeef/layer.tar")).unwrap(),
            std::fs::read(dir2.path().join("images/deadbeef/layer.tar")).unwrap(),
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("repositories/lib/foo/latest")).unwrap(),
            std::fs::read_to_string(dir2.path().join("repositories/lib/foo/latest")).unwrap(),
        );
    }
}
