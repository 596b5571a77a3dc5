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

//! Resolves the set of local/remote container daemons a run should target
//! (spec §4.6: "given N daemon endpoints").

use crate::args::Args;
use crate::config::{self, ConfigFile};
use dogestry_core::HostSpec;
use dogestry_daemon::BollardDaemonAdapter;
use dogestry_sync::DaemonAdapter;
use std::sync::Arc;

pub fn resolve(args: &Args) -> anyhow::Result<Vec<Arc<dyn DaemonAdapter>>> {
    let mut daemons: Vec<Arc<dyn DaemonAdapter>> = Vec::new();

    let endpoint = config::resolve_daemon_endpoint();
    let local = match &endpoint.host {
        Some(host) => BollardDaemonAdapter::from_host_spec(host)?,
        None => BollardDaemonAdapter::connect_local()?,
    };
    daemons.push(Arc::new(local));

    let extra = match &args.config {
        Some(path) => config::load_config_file(path)?,
        None => ConfigFile::default(),
    };

    for raw in extra.daemons {
        let host = HostSpec::parse(&raw)
            .map_err(|e| anyhow::anyhow!("invalid daemon endpoint {raw:?} in config file: {e}"))?;
        daemons.push(Arc::new(BollardDaemonAdapter::from_host_spec(&host)?));
    }

    Ok(daemons)
}
