use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    cmd::run_timeout,
    config::RulesConfig,
    error::{BackendError, ParseError},
};

pub mod iptables;
pub mod rulespec;

/// Table the exporter watches unless configured otherwise.
pub const MANGLE_TABLE: &str = "mangle";
/// Chain the exporter watches unless configured otherwise.
pub const PREROUTING_CHAIN: &str = "PREROUTING";

/// One raw rule line as printed by the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule(String);

impl Rule {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Decoded view of a [`Rule`].
///
/// `target` and `options` are always present. Packet and byte counters only
/// exist in the verbose listing, so they are optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedStat {
    pub packets: Option<u64>,
    pub bytes: Option<u64>,
    pub target: String,
    pub protocol: String,
    pub opt: String,
    pub input: String,
    pub output: String,
    pub source: IpNetwork,
    pub destination: IpNetwork,
    pub options: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ipv4,
    Ipv6,
}

impl Protocol {
    pub fn binary(self) -> &'static str {
        match self {
            Protocol::Ipv4 => "iptables",
            Protocol::Ipv6 => "ip6tables",
        }
    }

    /// CIDR matching any host, printed when a rule has no address match.
    pub fn any_cidr(self) -> &'static str {
        match self {
            Protocol::Ipv4 => "0.0.0.0/0",
            Protocol::Ipv6 => "::/0",
        }
    }
}

/// Which listing the backend is asked for.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuleFormat {
    /// `-L -n -v -x` table with counters.
    #[default]
    Stats,
    /// `-S` rule specifications.
    Spec,
}

impl RuleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleFormat::Stats => "stats",
            RuleFormat::Spec => "spec",
        }
    }
}

#[async_trait::async_trait]
pub trait RuleSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lightweight detection: does the backend answer on this machine right now?
    async fn probe(&self) -> bool;

    /// Lists the current rules of `table`/`chain`, in backend order.
    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<Rule>, BackendError>;

    fn parse_rule(&self, rule: &Rule) -> Result<ParsedStat, ParseError>;
}

pub fn source_for(cfg: &RulesConfig) -> Box<dyn RuleSource> {
    match cfg.format {
        RuleFormat::Stats => Box::new(iptables::StatsSource::new(cfg)),
        RuleFormat::Spec => Box::new(rulespec::SpecSource::new(cfg)),
    }
}

/// Leading arguments shared by every listing invocation.
fn base_args<'a>(wait_for_lock: bool, table: &'a str) -> Vec<&'a str> {
    let mut args = Vec::with_capacity(8);
    if wait_for_lock {
        args.push("-w");
    }
    args.extend(["-t", table]);
    args
}

async fn probe_binary(protocol: Protocol, timeout_ms: u64) -> bool {
    match run_timeout(protocol.binary(), &["--version"], timeout_ms).await {
        Ok(out) => out.success(),
        Err(err) => {
            debug!(error = %err, binary = protocol.binary(), "probe failed");
            false
        }
    }
}

fn parse_cidr(line: &str, raw: &str) -> Result<IpNetwork, ParseError> {
    raw.parse()
        .map_err(|e| ParseError::new(line, format!("invalid address {raw:?}: {e}")))
}
