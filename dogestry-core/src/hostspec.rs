//! Daemon endpoint addressing for the fan-out pull controller and the

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

//! multi-daemon orchestrator.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostSpecError {
    #[error("host spec {0:?} has no scheme")]
    MissingScheme(String),
    #[error("host spec {0:?} has no host component")]
    MissingHost(String),
}

/// `scheme://host:port`, addressing one container-daemon endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostSpec {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl HostSpec {
    /// Parse a host spec, accepting only specs with a recognizable
    /// `scheme://host[:port]` shape; anything else is discarded by the
    /// caller rather than treated as fatal (§4.7 step 1).
    pub fn parse(input: &str) -> Result<HostSpec, HostSpecError> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| HostSpecError::MissingScheme(input.to_string()))?;

        if rest.is_empty() {
            return Err(HostSpecError::MissingHost(input.to_string()));
        }

        match rest.rsplit_once(':') {
            Some((host, port_str)) => match port_str.parse::<u16>() {
                Ok(port) if !host.is_empty() => Ok(HostSpec {
                    scheme: scheme.to_string(),
                    host: host.to_string(),
                    port: Some(port),
                }),
                _ => Ok(HostSpec {
                    scheme: scheme.to_string(),
                    host: rest.to_string(),
                    port: None,
                }),
            },
            None => Ok(HostSpec {
                scheme: scheme.to_string(),
                host: rest.to_string(),
                port: None,
            }),
        }
    }

    pub fn host_only(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.scheme, self.host, port),
            None => write!(f, "{}://{}", self.scheme, self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_host_and_port() {
        let spec = HostSpec::parse("tcp://10.0.0.5:2375").unwrap();
        assert_eq!(spec.scheme, "tcp");
        assert_eq!(spec.host, "10.0.0.5");
        assert_eq!(spec.port, Some(2375));
    }

    #[test]
    fn parses_host_without_port() {
        let spec = HostSpec::parse("tcp://daemon.local").unwrap();
        assert_eq!(spec.host, "daemon.local");
        assert_eq!(spec.port, None);
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(HostSpec::parse("10.0.0.5:2375").is_err());
    }

    #[test]
    fn non_numeric_trailing_segment_is_not_a_port() {
        let spec = HostSpec::parse("unix:///var/run/docker.sock").unwrap();
        assert_eq!(spec.host, "/var/run/docker.sock");
        assert_eq!(spec.port, None);
    }
}
