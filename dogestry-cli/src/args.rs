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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dogestry", author, version, about)]
pub struct Args {
    /// Path to a JSON config file listing daemon endpoints and defaults.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Comma-separated list of `tcp://host:port` helper-service hosts to
    /// try before falling back to the local pull pipeline.
    #[arg(long = "pullhosts", default_value = "")]
    pub pullhosts: String,

    /// Exclusive lock file guarding one run at a time.
    #[arg(long = "lockfile")]
    pub lockfile: Option<PathBuf>,

    /// Run as the helper HTTP service instead of a one-shot command.
    #[arg(long = "server", action)]
    pub server: bool,

    #[arg(long = "address", default_value = "0.0.0.0")]
    pub address: String,

    #[arg(long = "port", default_value_t = 2674)]
    pub port: u16,

    /// Skip the fan-out probe and always run the local pull pipeline.
    #[arg(long = "force-local", action)]
    pub force_local: bool,

    /// Reserved for parity with the distributed metadata-service deployment
    /// mode; dogestry always resolves tags against the object store itself.
    #[arg(long = "use-metaservice", action)]
    pub use_metaservice: bool,

    #[arg(long = "tempdir")]
    pub tempdir: Option<PathBuf>,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export and upload an image to the store.
    Push { store_url: String, image: String },

    /// Download and import an image into every configured daemon.
    Pull { store_url: String, image: String },

    /// Like `pull`, but stop after layout assembly and keep the scratch dir.
    Download { store_url: String, image: String },

    /// Import an already-assembled layout directory into the configured
    /// daemons, without talking to the store at all.
    Upload { image_dir: PathBuf },

    /// List every `repositories/<repo>/<tag>` entry on the store.
    List { store_url: String },

    /// Print a human description of the store.
    Remote { store_url: String },

    /// Record a registry credential in the container-daemon config file.
    Login {
        registry: String,
        #[arg(short = 'u', long = "username")]
        username: String,
        #[arg(short = 'p', long = "password")]
        password: Option<String>,
        #[arg(long = "password-stdin", action)]
        password_stdin: bool,
    },

    /// Print the version and exit.
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_push_with_defaults() {
        let args = Args::parse_from(["dogestry", "push", "s3://bucket", "repo:tag"]);
        assert!(!args.server);
        assert_eq!(args.port, 2674);
        assert_eq!(args.pullhosts, "");
        match args.command {
            Command::Push { store_url, image } => {
                assert_eq!(store_url, "s3://bucket");
                assert_eq!(image, "repo:tag");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_pull_with_hosts_and_server_flags() {
        let args = Args::parse_from([
            "dogestry",
            "--pullhosts",
            "tcp://a:2674,tcp://b:2674",
            "--force-local",
            "pull",
            "s3://bucket",
            "repo:tag",
        ]);
        assert_eq!(args.pullhosts, "tcp://a:2674,tcp://b:2674");
        assert!(args.force_local);
        assert!(matches!(args.command, Command::Pull { .. }));
    }

    #[test]
    fn login_requires_username_but_not_password() {
        let args = Args::parse_from(["dogestry", "login", "registry.example", "-u", "alice"]);
        match args.command {
            Command::Login { registry, username, password, password_stdin } => {
                assert_eq!(registry, "registry.example");
                assert_eq!(username, "alice");
                assert_eq!(password, None);
                assert!(!password_stdin);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let result = Args::try_parse_from(["dogestry", "login", "registry.example"]);
        assert!(result.is_err());
    }
}
