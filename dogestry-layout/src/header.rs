//! ustar header handling, trimmed to what the layout codec needs: path,

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

//! size, and entry type. Grounded on the teacher's byte-packed
//! `RawTarHeader`; the whiteout/pax extension handling that header carried
//! has no counterpart here — this format has no overlay-filesystem
//! semantics to express.

use std::io::{Read, Write};

pub const BLOCK_SIZE: usize = 512;
const EMPTY_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct RawTarHeader {
    name: [u8; 100],
    mode: [u8; 8],
    uid: [u8; 8],
    gid: [u8; 8],
    size: [u8; 12],
    lastmod: [u8; 12],
    cksum: [u8; 8],
    tpe: [u8; 1],
    link: [u8; 100],
    ustar: [u8; 6],
    ver: [u8; 2],
    usr_name: [u8; 32],
    grp_name: [u8; 32],
    devmj_n: [u8; 8],
    devmi_n: [u8; 8],
    prefix: [u8; 155],
    pad: [u8; 12],
}

impl RawTarHeader {
    pub fn empty() -> RawTarHeader {
        unsafe { std::mem::zeroed::<RawTarHeader>() }
    }

    pub fn empty_ustar() -> RawTarHeader {
        let mut header = RawTarHeader::empty();
        header.ustar = *b"ustar\0";
        header.ver = *b"00";
        header.mode = *b"0000644 ";
        header.uid = *b"0000000 ";
        header.gid = *b"0000000 ";
        header.devmj_n = *b"0000000 ";
        header.devmi_n = *b"0000000 ";
        header
    }

    pub fn file_path(&self) -> std::io::Result<String> {
        let mut path = str_from_nul_bytes(&self.name)?.to_string();
        if self.is_ustar() && self.prefix != [0u8; 155] {
            let prefix = str_from_nul_bytes(&self.prefix)?;
            path = format!("{prefix}/{path}");
        }
        Ok(path)
    }

    pub fn is_regular_file(&self) -> bool {
        self.tpe[0] == 0 || self.tpe[0] == b'0'
    }

    pub fn is_directory(&self) -> bool {
        self.tpe[0] == b'5'
    }

    pub fn content_length(&self) -> std::io::Result<u64> {
        if self.size[0] == 0xff {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.size[4..12]);
            return Ok(u64::from_be_bytes(buf));
        }
        let mut value = 0u64;
        for &byte in &self.size {
            if byte == 0 || byte == b' ' {
                continue;
            }
            if !(b'0'..=b'7').contains(&byte) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "invalid octal digit in tar header size field",
                ));
            }
            value = (value << 3) | (byte - b'0') as u64;
        }
        Ok(value)
    }

    pub fn set_size(&mut self, size: u64) {
        self.size.copy_from_slice(format!("{size:0>11o} ").as_bytes());
    }

    pub fn set_path(&mut self, path: &str) {
        let bytes = path.as_bytes();
        if bytes.len() <= 100 {
            self.name[..bytes.len()].copy_from_slice(bytes);
            return;
        }
        let split = bytes.len() - 100;
        let split = path[..split].rfind('/').map(|i| i + 1).unwrap_or(split);
        let (prefix, name) = path.split_at(split);
        self.prefix[..prefix.len()].copy_from_slice(prefix.as_bytes());
        self.name[..name.len()].copy_from_slice(name.as_bytes());
    }

    pub fn set_checksum(&mut self) {
        self.cksum = self.checksum();
    }

    fn checksum(&self) -> [u8; 8] {
        macro_rules! add {
            ($sum:expr, $field:expr) => {
                for byte in $field {
                    $sum += *byte as u64;
                }
            };
        }
        let mut sum = 0u64;
        add!(sum, &self.name);
        add!(sum, &self.mode);
        add!(sum, &self.uid);
        add!(sum, &self.gid);
        add!(sum, &self.size);
        add!(sum, &self.lastmod);
        sum += 0x20 * 8;
        add!(sum, &self.tpe);
        add!(sum, &self.link);
        add!(sum, &self.ustar);
        add!(sum, &self.ver);
        add!(sum, &self.usr_name);
        add!(sum, &self.grp_name);
        add!(sum, &self.devmj_n);
        add!(sum, &self.devmi_n);
        add!(sum, &self.prefix);
        add!(sum, &self.pad);
        format!("{sum:0>6o}\0 ").into_bytes().try_into().unwrap()
    }

    pub fn is_valid(&self) -> bool {
        self.checksum() == self.cksum
    }

    pub fn is_ustar(&self) -> bool {
        self.is_valid() && self.ustar == *b"ustar\0"
    }

    pub fn to_bytes(self) -> [u8; BLOCK_SIZE] {
        unsafe { std::mem::transmute(self) }
    }

    pub fn from_bytes(buf: [u8; BLOCK_SIZE]) -> RawTarHeader {
        unsafe { std::mem::transmute(buf) }
    }
}

fn str_from_nul_bytes(buf: &[u8]) -> std::io::Result<&str> {
    std::str::from_utf8(buf)
        .map(|s| s.trim_end_matches('\0'))
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "non-utf8 tar header field"))
}

pub fn is_end_marker(buf: &[u8; BLOCK_SIZE]) -> bool {
    *buf == EMPTY_BLOCK
}

pub fn blocks_for(len: u64) -> u64 {
    (len + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64
}

pub fn write_entry<W: Write>(writer: &mut W, path: &str, content: &[u8]) -> std::io::Result<()> {
    let mut header = RawTarHeader::empty_ustar();
    header.set_path(path);
    header.set_size(content.len() as u64);
    header.set_checksum();
    writer.write_all(&header.to_bytes())?;
    writer.write_all(content)?;
    let padding = blocks_for(content.len() as u64) * BLOCK_SIZE as u64 - content.len() as u64;
    writer.write_all(&vec![0u8; padding as usize])
}

pub fn write_stream_entry<R: Read, W: Write>(
    writer: &mut W,
    path: &str,
    size: u64,
    mut content: R,
) -> std::io::Result<()> {
    let mut header = RawTarHeader::empty_ustar();
    header.set_path(path);
    header.set_size(size);
    header.set_checksum();
    writer.write_all(&header.to_bytes())?;
    let copied = std::io::copy(&mut content, writer)?;
    if copied != size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream entry shorter than declared size",
        ));
    }
    let padding = blocks_for(size) * BLOCK_SIZE as u64 - size;
    writer.write_all(&vec![0u8; padding as usize])
}

pub fn write_end_markers<W: Write>(writer: &mut W) -> std::io::Result<()> {
    writer.write_all(&EMPTY_BLOCK)?;
    writer.write_all(&EMPTY_BLOCK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_short_path_roundtrip() {
        let mut header = RawTarHeader::empty_ustar();
        header.set_path("images/abc/json");
        header.set_size(42);
        header.set_checksum();
        let bytes = header.to_bytes();
        let parsed = RawTarHeader::from_bytes(bytes);
        assert!(parsed.is_valid());
        assert_eq!(parsed.file_path().unwrap(), "images/abc/json");
        assert_eq!(parsed.content_length().unwrap(), 42);
    }

    #[test]
    fn header_long_path_uses_prefix() {
        let long_dir = "a".repeat(90);
        let path = format!("{long_dir}/images/deadbeef/layer.tar");
        let mut header = RawTarHeader::empty_ustar();
        header.set_path(&path);
        header.set_checksum();
        let parsed = RawTarHeader::from_bytes(header.to_bytes());
        assert_eq!(parsed.file_path().unwrap(), path);
    }
}
