use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backends::{Protocol, RuleFormat, MANGLE_TABLE, PREROUTING_CHAIN};

pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:9200";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub schema: u32,
    pub listen_address: String,
    pub rules: RulesConfig,
}

/// Where and how rules are read.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RulesConfig {
    pub table: String,
    pub chain: String,
    pub protocol: Protocol,
    pub format: RuleFormat,
    /// Upper bound for one listing call.
    pub timeout_ms: u64,
    /// Pass `-w` so a concurrent `iptables` writer doesn't fail the listing.
    pub wait_for_lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema: 1,
            listen_address: DEFAULT_LISTEN_ADDRESS.into(),
            rules: RulesConfig::default(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            table: MANGLE_TABLE.into(),
            chain: PREROUTING_CHAIN.into(),
            protocol: Protocol::Ipv4,
            format: RuleFormat::Stats,
            timeout_ms: 5000,
            wait_for_lock: true,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "fwmark-exporter", "fwmark-exporter")
        .context("unable to determine XDG project dirs")?;
    Ok(proj.config_dir().join("config.toml"))
}

/// Loads the config at `path`. Only the default location may be absent.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        if path == default_config_path()? {
            tracing::warn!(
                path = %path.display(),
                "config file not found; using built-in defaults"
            );
            return Ok(Config::default());
        }
        anyhow::bail!("config file not found: {}", path.display());
    }

    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&s)
}

/// Expands the `:9200` shorthand to all interfaces.
pub fn normalize_listen_address(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

pub fn parse_config(s: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(s).context("failed to parse config TOML")?;
    anyhow::ensure!(cfg.schema == 1, "unsupported config schema: {}", cfg.schema);
    anyhow::ensure!(!cfg.rules.table.is_empty(), "rules.table must not be empty");
    anyhow::ensure!(!cfg.rules.chain.is_empty(), "rules.chain must not be empty");
    anyhow::ensure!(cfg.rules.timeout_ms > 0, "rules.timeout_ms must be positive");
    Ok(cfg)
}
