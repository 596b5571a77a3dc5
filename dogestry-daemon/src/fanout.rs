//! Fan-out pull controller (client mode, spec §4.7): probes each candidate

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

//! daemon host for a helper service and either delegates the pull to every
//! host in parallel or falls back to the full local pull pipeline.

use crate::orchestrator::HostStatus;
use dogestry_core::HostSpec;
use futures::future::join_all;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Email")]
    pub email: String,
}

impl Credentials {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("credentials always serialise");
        base64::encode(json)
    }
}

#[derive(Debug, Deserialize)]
struct StatusMessage {
    status: Option<String>,
    error: Option<String>,
}

/// Parses the `-pullhosts` flag value, silently discarding entries that do
/// not parse as `tcp://host:port` (spec §4.7 step 1: scheme `tcp`, host,
/// port). `HostSpec::parse` itself is scheme-agnostic (it also accepts
/// `unix://...`), so the `tcp` scheme and a port are checked here.
pub fn parse_hosts(csv: &str) -> Vec<HostSpec> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HostSpec::parse(s).ok())
        .filter(|h| h.scheme == "tcp" && h.port.is_some())
        .collect()
}

/// Probes `/status/check` on every host with a 1-second timeout; a host
/// counts as having a helper only if it answers `200` with body `OK`.
pub async fn probe_all(client: &reqwest::Client, hosts: &[HostSpec], service_port: u16) -> Vec<bool> {
    let probes = hosts.iter().map(|host| probe_one(client, host, service_port));
    join_all(probes).await
}

async fn probe_one(client: &reqwest::Client, host: &HostSpec, service_port: u16) -> bool {
    let url = format!("http://{}:{}/status/check", host.host_only(), service_port);
    match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) => resp.text().await.map(|body| body == "OK").unwrap_or(false),
        Err(_) => false,
    }
}

/// Whether every host answered positively; per spec §4.7 step 3, delegation
/// only happens when *all* hosts have a helper and `force-local` is unset.
pub fn all_positive(probes: &[bool]) -> bool {
    !probes.is_empty() && probes.iter().all(|ok| *ok)
}

/// Delegates the pull to every host's helper service in parallel, streaming
/// each response as newline-delimited JSON until `"Done"` or an error
/// message (spec testable scenario e).
pub async fn delegate(
    client: &reqwest::Client,
    hosts: &[HostSpec],
    service_port: u16,
    api_version: &str,
    image: &str,
    credentials: &Credentials,
) -> Vec<(String, HostStatus)> {
    info!(hosts = hosts.len(), image, "delegating pull to helper services");
    let jobs = hosts
        .iter()
        .map(|host| delegate_one(client, host, service_port, api_version, image, credentials));
    join_all(jobs).await
}

async fn delegate_one(
    client: &reqwest::Client,
    host: &HostSpec,
    service_port: u16,
    api_version: &str,
    image: &str,
    credentials: &Credentials,
) -> (String, HostStatus) {
    let label = host.to_string();
    let url = format!(
        "http://{}:{}/{}/images/create?fromImage={}",
        host.host_only(),
        service_port,
        api_version,
        image
    );
    debug!(host = %label, %url, "delegating to helper service");

    let response = client
        .post(&url)
        .header("X-Registry-Auth", credentials.encode())
        .send()
        .await;

    let mut response = match response {
        Ok(r) => r,
        Err(e) => {
            warn!(host = %label, error = %e, "delegate request failed");
            return (label, HostStatus::Failed { error: e.to_string() });
        }
    };

    let mut buf = String::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => return (label, HostStatus::Failed { error: e.to_string() }),
        };
        buf.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buf.find('\n') {
            let line = buf[..pos].to_string();
            buf.drain(..=pos);
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StatusMessage>(&line) {
                Ok(msg) => {
                    if let Some(err) = msg.error {
                        return (label, HostStatus::Failed { error: err });
                    }
                    if msg.status.as_deref() == Some("Done") {
                        return (label, HostStatus::Ok);
                    }
                }
                Err(e) => return (label, HostStatus::Failed { error: e.to_string() }),
            }
        }
    }

    (label, HostStatus::Failed { error: "stream ended without a terminal status".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hosts_discards_unparseable_entries() {
        let hosts = parse_hosts("tcp://a:1, not-a-host, tcp://b:2");
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].host, "a");
        assert_eq!(hosts[1].host, "b");
    }

    #[test]
    fn parse_hosts_discards_non_tcp_and_portless_entries() {
        let hosts = parse_hosts("unix:///var/run/docker.sock, tcp://noport, tcp://a:1");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host, "a");
    }

    #[test]
    fn all_positive_requires_every_host_and_at_least_one() {
        assert!(!all_positive(&[]));
        assert!(!all_positive(&[true, false]));
        assert!(all_positive(&[true, true]));
    }

    #[test]
    fn credentials_encode_to_base64_json() {
        let creds = Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
            email: "s3://bucket".to_string(),
        };
        let decoded = base64::decode(creds.encode()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["Username"], "u");
        assert_eq!(value["Password"], "p");
        assert_eq!(value["Email"], "s3://bucket");
    }
}
