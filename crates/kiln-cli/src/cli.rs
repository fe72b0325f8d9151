use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    about = "Image-build orchestration: declare image builds and exports, let workers drive them",
    version
)]
pub struct Cli {
    /// Base URL of the kiln server for client commands.
    #[arg(long, env = "KILN_URL", global = true, default_value = "http://127.0.0.1:8080")]
    pub remote: String,

    /// Bearer token for API calls.
    #[arg(long, env = "KILN_TOKEN", global = true)]
    pub token: Option<String>,

    /// Organization id. Defaults to the nil org.
    #[arg(long, env = "KILN_ORG", global = true)]
    pub org: Option<Uuid>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the control plane: recovery, dispatcher, watchdog and REST API.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,

        /// Postgres connection string; uses the in-memory store when omitted.
        #[arg(long, env = "KILN_DATABASE_URL")]
        database_url: Option<String>,

        /// Seconds without a heartbeat before an active resource times out.
        #[arg(long, default_value_t = 600)]
        task_timeout: u64,

        /// Seconds between watchdog scans.
        #[arg(long, default_value_t = 30)]
        watchdog_interval: u64,

        /// Seconds between log-tail flushes and heartbeats.
        #[arg(long, default_value_t = 5)]
        flush_interval: u64,
    },

    /// List resources of a kind.
    List {
        kind: KindArg,

        #[arg(long)]
        limit: Option<usize>,

        /// Field selector, e.g. 'spec.source.imageBuildRef=base-os'.
        #[arg(long)]
        selector: Option<String>,
    },

    /// Show one resource as JSON.
    Get {
        kind: KindArg,
        name: String,

        /// Embed owned exports (image builds only).
        #[arg(long)]
        with_exports: bool,
    },

    /// Create a resource from a YAML or JSON file.
    Create {
        kind: KindArg,

        /// Path to the resource file.
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },

    /// Delete a resource. Deleting an image build cascades to its exports.
    Delete { kind: KindArg, name: String },

    /// Print a resource's logs; --follow streams until completion.
    Logs {
        kind: KindArg,
        name: String,

        #[arg(long)]
        follow: bool,
    },

    /// Summarize resource phases in the org.
    Status,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Imagebuild,
    Imageexport,
}

impl KindArg {
    /// REST collection path segment.
    pub fn collection(&self) -> &'static str {
        match self {
            KindArg::Imagebuild => "imagebuilds",
            KindArg::Imageexport => "imageexports",
        }
    }
}
