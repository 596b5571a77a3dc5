//! Identity types: image ids, repo/tag references, and daemon host specs.

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


use std::fmt;
use std::str::FromStr;

/// An opaque content identifier for an image, e.g. as returned by the
/// daemon's `ExportImage`/`InspectImage` calls. May carry a hash-algorithm
/// prefix (`sha256:...`); equality and path-use are always over the
/// prefix-stripped form.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(raw: impl Into<String>) -> ImageId {
        ImageId(raw.into())
    }

    /// The id with any `<algorithm>:` prefix removed.
    pub fn stripped(&self) -> &str {
        match self.0.split_once(':') {
            Some((alg, rest)) if alg.chars().all(|c| c.is_ascii_alphanumeric()) => rest,
            _ => &self.0,
        }
    }

    /// First 12 significant characters after prefix stripping.
    pub fn short(&self) -> &str {
        let stripped = self.stripped();
        let len = stripped.len().min(12);
        &stripped[..len]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ImageId {
    fn eq(&self, other: &Self) -> bool {
        self.stripped() == other.stripped()
    }
}

impl Eq for ImageId {}

impl std::hash::Hash for ImageId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.stripped().hash(state)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ImageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> ImageId {
        ImageId(s)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> ImageId {
        ImageId(s.to_string())
    }
}

/// A `(repository, tag)` pair, used only as a lookup key for the
/// `repositories/<repo>/<tag>` tag file; never embedded in a blob path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub const DEFAULT_TAG: &'static str = "latest";

    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> ImageRef {
        ImageRef {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

impl FromStr for ImageRef {
    type Err = std::convert::Infallible;

    fn from_str(input: &str) -> Result<ImageRef, Self::Err> {
        match input.rsplit_once(':') {
            Some((repo, tag)) => Ok(ImageRef::new(repo, tag)),
            None => Ok(ImageRef::new(input, ImageRef::DEFAULT_TAG)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strips_algorithm_prefix() {
        let id = ImageId::new("sha256:abcdefabcdefabcdefabcdef00");
        assert_eq!(id.short(), "abcdefabcdef");
    }

    #[test]
    fn short_on_bare_hex_id() {
        let id = ImageId::new("1234abcd5678ef90");
        assert_eq!(id.short(), "1234abcd5678");
    }

    #[test]
    fn equality_ignores_prefix() {
        let a = ImageId::new("sha256:deadbeef");
        let b = ImageId::new("deadbeef");
        assert_eq!(a, b);
    }

    #[test]
    fn parse_ref_defaults_to_latest() {
        let r: ImageRef = "library/foo".parse().unwrap();
        assert_eq!(r, ImageRef::new("library/foo", "latest"));
    }

    #[test]
    fn parse_ref_with_explicit_tag() {
        let r: ImageRef = "library/foo:1.2.3".parse().unwrap();
        assert_eq!(r, ImageRef::new("library/foo", "1.2.3"));
    }
}
