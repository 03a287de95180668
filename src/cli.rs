use clap::{Parser, Subcommand};

use crate::backends::{Protocol, RuleFormat};

#[derive(Parser, Debug)]
#[command(
    name = "fwmark-exporter",
    version,
    about = "Prometheus exporter for duplicate iptables MARK rules"
)]
pub struct Cli {
    /// Path to config file (default: XDG config fwmark-exporter/config.toml)
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Address on which to expose metrics
    #[arg(long = "web.listen-address", global = true)]
    pub listen_address: Option<String>,

    /// Override the rule listing format
    #[arg(long, value_enum, global = true)]
    pub format: Option<RuleFormat>,

    /// Override the iptables protocol
    #[arg(long, value_enum, global = true)]
    pub protocol: Option<Protocol>,

    /// Defaults to `serve`
    #[command(subcommand)]
    pub cmd: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the metrics HTTP server
    Serve,

    /// Run one detection pass and exit 0 (clean), 1 (duplicate) or 2 (listing failed)
    Check {
        #[arg(long)]
        json: bool,
        /// Print a short single-line status for bars
        #[arg(long, conflicts_with = "json")]
        one_line: bool,
    },

    /// Backend utilities
    Backend {
        #[command(subcommand)]
        cmd: BackendCmd,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCmd {
    /// List supported rule listing formats
    List,
    /// Check whether the configured iptables binary answers
    Detect,
}
