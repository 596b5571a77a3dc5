//! Content hashing used by the synchronizer.

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

//!
//! Local files are hashed with SHA-1 to match the on-store `.sum` sidecar
//! format; this is a deliberate departure from `sha256`-keyed registries,
//! since dogestry predates content-addressed OCI digests.

use sha1::{Digest as _, Sha1};
use std::io::{Read, Write};

/// Lowercase hex encoding, the wire form of every digest this crate produces.
pub fn hex(bytes: impl AsRef<[u8]>) -> String {
    let slice = bytes.as_ref();
    let mut buf = String::with_capacity(slice.len() * 2);
    for byte in slice {
        const TBL: [char; 16] = [
            '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f',
        ];
        buf.push(TBL[(*byte >> 4) as usize]);
        buf.push(TBL[(*byte & 0x0f) as usize]);
    }
    buf
}

/// Incremental SHA-1, used both for local file hashing and for the tar
/// stream digests the layout codec computes while it decodes/encodes.
#[derive(Default)]
pub struct Hasher(Sha1);

impl Hasher {
    pub fn new() -> Hasher {
        Hasher(Sha1::new())
    }

    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.0.update(bytes);
    }

    pub fn finalize_hex(self) -> String {
        hex(self.0.finalize())
    }
}

/// SHA-1 of a file's bytes, read once and streamed through the hasher.
pub fn sha1_file(path: impl AsRef<std::path::Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// A `Read` adapter that accumulates a SHA-1 digest of everything read
/// through it, consumed once the caller is done with the stream.
pub struct DigestReader<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Read> DigestReader<R> {
    pub fn new(inner: R) -> DigestReader<R> {
        DigestReader {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub fn finalize_hex(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl<R: Read> Read for DigestReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n != 0 {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

/// A `Write` adapter that accumulates a SHA-1 digest of everything written
/// through it.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> DigestWriter<W> {
    pub fn new(inner: W) -> DigestWriter<W> {
        DigestWriter {
            inner,
            hasher: Hasher::new(),
        }
    }

    pub fn finalize_hex(self) -> String {
        self.hasher.finalize_hex()
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Adapts an in-memory buffer to `tokio::io::AsyncRead` for callers that
/// need to hand a small, already-materialised payload (a digest, a tag
/// file's id bytes) to an `ObjectStore::put_stream` without round-tripping
/// through a temp file.
pub struct MemoryReader(std::io::Cursor<Vec<u8>>);

impl MemoryReader {
    pub fn new(bytes: impl Into<Vec<u8>>) -> MemoryReader {
        MemoryReader(std::io::Cursor::new(bytes.into()))
    }
}

impl tokio::io::AsyncRead for MemoryReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let n = Read::read(&mut self.0, buf.initialize_unfilled())?;
        buf.advance(n);
        std::task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_bytes() {
        let input = [0x00, 0x01, 0x02, 0x33, 0xfe, 0x6f];
        assert_eq!(hex(input), "00010233fe6f");
    }

    #[test]
    fn test_sha1_file_matches_known_vector() {
        let dir = std::env::temp_dir().join(format!("dogestry-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        let digest = sha1_file(&path).unwrap();
        assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_digest_writer_matches_hasher() {
        let mut buf = Vec::new();
        {
            let mut w = DigestWriter::new(&mut buf);
            w.write_all(b"hello world").unwrap();
            assert_eq!(
                w.finalize_hex(),
                "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
            );
        }
        assert_eq!(buf, b"hello world");
    }
}
