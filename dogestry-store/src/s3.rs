//! The S3 backend, reachable through `s3://<bucket>/<prefix>[?region=<region>]`.

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
//! Grounded on the client-construction shape of an S3-compatible backend seen
//! across the retrieval pack (path-style addressing, explicit region,
//! `aws_sdk_s3::Config::builder()`), adapted to the narrow `ObjectStore`
//! capability set and to a bucket-rooted keyspace (spec §9: the path
//! component of the store URL is accepted but not applied as a key prefix,
//! since honouring it only for some operations would be worse than ignoring
//! it outright).

use crate::error::{StoreError, StoreResult};
use crate::object_store::{ListedKey, ObjectStore};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::ops::Range;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Store {
    client: Client,
    bucket: String,
    url: String,
}

impl S3Store {
    pub async fn connect(url: &str) -> StoreResult<S3Store> {
        let (bucket, region) = parse_s3_url(url)?;
        let region_provider = Region::new(region);
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(false)
            .build();
        let client = Client::from_conf(config);
        Ok(S3Store {
            client,
            bucket,
            url: url.to_string(),
        })
    }

    fn key_not_found(&self, key: &str) -> StoreError {
        StoreError::NotFound(format!("{}/{}", self.bucket, key))
    }
}

/// Parses `s3://<bucket>/<prefix>[?region=<region>]`. The prefix is parsed
/// (to reject malformed URLs early) but deliberately not returned — the
/// keyspace is bucket-rooted, see module docs.
fn parse_s3_url(url: &str) -> StoreResult<(String, String)> {
    let rest = url
        .strip_prefix("s3://")
        .ok_or_else(|| StoreError::InvalidRemote(format!("not an s3:// url: {url}")))?;

    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let bucket = path_part
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StoreError::InvalidRemote(format!("missing bucket in {url}")))?
        .to_string();

    let region = query_part
        .and_then(|q| {
            q.split('&').find_map(|pair| {
                pair.split_once('=')
                    .filter(|(k, _)| *k == "region")
                    .map(|(_, v)| v.to_string())
            })
        })
        .unwrap_or_else(|| DEFAULT_REGION.to_string());

    Ok((bucket, region))
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str) -> StoreResult<Vec<ListedKey>> {
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                req = req.continuation_token(token);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            for obj in resp.contents() {
                let key = match obj.key() {
                    Some(k) => k.to_string(),
                    None => continue,
                };
                out.push(ListedKey {
                    key,
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    etag: obj.e_tag().map(|s| s.trim_matches('"').to_string()),
                });
            }

            if resp.is_truncated().unwrap_or(false) {
                continuation = resp.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }
        Ok(out)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(e)) if matches!(e.err(), HeadObjectError::NotFound(_)) => {
                Ok(false)
            }
            Err(e) => Err(StoreError::Transport(e.to_string())),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        debug!(bucket = %self.bucket, %key, "GetObject");
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(s) if matches!(s.err(), GetObjectError::NoSuchKey(_)) => {
                    self.key_not_found(key)
                }
                SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
                    warn!(%key, error = %e, "GetObject failed transiently, caller may retry");
                    StoreError::TransportTransient(e.to_string())
                }
                _ => StoreError::Transport(e.to_string()),
            })?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
            .into_bytes();
        Ok(bytes)
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> StoreResult<Bytes> {
        let range_header = format!("bytes={}-{}", range.start, range.end.saturating_sub(1));
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(range_header)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(s) if matches!(s.err(), GetObjectError::NoSuchKey(_)) => {
                    self.key_not_found(key)
                }
                _ => StoreError::Transport(e.to_string()),
            })?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
            .into_bytes();
        Ok(bytes)
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Send + Unpin>,
        size: u64,
    ) -> StoreResult<()> {
        // Multipart is only worth the round trips past a few tens of MB; a
        // single PutObject covers image layers and metadata blobs below
        // that, buffered once since ByteStream needs an owned body.
        const MULTIPART_THRESHOLD: u64 = 32 * 1024 * 1024;

        debug!(bucket = %self.bucket, %key, size, "PutObject");

        if size < MULTIPART_THRESHOLD {
            let mut buf = Vec::with_capacity(size as usize);
            reader
                .read_to_end(&mut buf)
                .await
                .map_err(StoreError::Io)?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .acl(aws_sdk_s3::types::ObjectCannedAcl::Private)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            return Ok(());
        }

        put_multipart(&self.client, &self.bucket, key, reader).await
    }

    fn describe(&self) -> String {
        format!("s3 bucket={} ({})", self.bucket, self.url)
    }
}

const PART_SIZE: usize = 8 * 1024 * 1024;

async fn put_multipart(
    client: &Client,
    bucket: &str,
    key: &str,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
) -> StoreResult<()> {
    debug!(bucket, key, "CreateMultipartUpload");
    let create = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .acl(aws_sdk_s3::types::ObjectCannedAcl::Private)
        .send()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    let upload_id = create
        .upload_id()
        .ok_or_else(|| StoreError::Transport("missing upload id".into()))?
        .to_string();

    let mut parts = Vec::new();
    let mut part_number = 1i32;
    let mut buf = vec![0u8; PART_SIZE];

    let result: StoreResult<()> = async {
        loop {
            let n = read_full(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            let upload = client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf[..n].to_vec()))
                .send()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(upload.e_tag().map(|s| s.to_string()))
                    .build(),
            );
            part_number += 1;
            if n < PART_SIZE {
                break;
            }
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        let _ = client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .send()
            .await;
        return Err(e);
    }

    client
        .complete_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(&upload_id)
        .multipart_upload(
            aws_sdk_s3::types::CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build(),
        )
        .send()
        .await
        .map_err(|e| StoreError::Transport(e.to_string()))?;

    Ok(())
}

async fn read_full(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    buf: &mut [u8],
) -> StoreResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(StoreError::Io)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_default_region() {
        let (bucket, region) = parse_s3_url("s3://my-bucket").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(region, "us-east-1");
    }

    #[test]
    fn parses_explicit_region() {
        let (bucket, region) = parse_s3_url("s3://my-bucket/images?region=eu-west-1").unwrap();
        assert_eq!(bucket, "my-bucket");
        assert_eq!(region, "eu-west-1");
    }

    #[test]
    fn rejects_non_s3_scheme() {
        assert!(parse_s3_url("file:///tmp/x").is_err());
    }

    #[test]
    fn rejects_missing_bucket() {
        assert!(parse_s3_url("s3://").is_err());
    }
}
