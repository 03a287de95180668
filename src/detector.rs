//! Duplicate firewall-mark detection.
//!
//! Every call lists the chain afresh and keeps its bookkeeping local, so one
//! [`RuleSource`] can serve any number of concurrent scrapes.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::backends::RuleSource;

/// Target whose option strings are compared.
pub const MARK_TARGET: &str = "MARK";

/// Outcome of one detection pass.
///
/// `has_duplicate_mark` is only meaningful when `list_succeeded`; a failed
/// listing reports `false` because nothing could be checked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub list_succeeded: bool,
    pub has_duplicate_mark: bool,
    /// Options string of the first MARK rule seen twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_options: Option<String>,
}

impl DetectionResult {
    pub fn list_failed() -> Self {
        Self::default()
    }

    pub fn clean() -> Self {
        Self {
            list_succeeded: true,
            ..Self::default()
        }
    }

    pub fn duplicate(options: impl Into<String>) -> Self {
        Self {
            list_succeeded: true,
            has_duplicate_mark: true,
            duplicate_options: Some(options.into()),
        }
    }
}

pub async fn detect(source: &dyn RuleSource, table: &str, chain: &str) -> DetectionResult {
    let rules = match source.list_rules(table, chain).await {
        Ok(rules) => rules,
        Err(err) => {
            error!(
                error = %err,
                program = err.program(),
                table,
                chain,
                "failed to list iptables rules"
            );
            return DetectionResult::list_failed();
        }
    };

    let mut seen: HashSet<String> = HashSet::with_capacity(rules.len());
    for rule in &rules {
        let stat = match source.parse_rule(rule) {
            Ok(stat) => stat,
            Err(err) => {
                debug!(error = %err, "skipping unparseable rule");
                continue;
            }
        };
        if stat.target != MARK_TARGET {
            continue;
        }
        if seen.contains(&stat.options) {
            warn!(table, chain, options = %stat.options, "duplicate fwmark rule");
            return DetectionResult::duplicate(stat.options);
        }
        seen.insert(stat.options);
    }

    DetectionResult::clean()
}
