use async_trait::async_trait;

use crate::{
    backends::{base_args, parse_cidr, probe_binary, ParsedStat, Protocol, Rule, RuleSource},
    cmd::run_checked,
    config::RulesConfig,
    error::{BackendError, ParseError},
};

/// Column count of a verbose listing row once trailing options are joined.
const STAT_FIELDS: usize = 10;

/// Reads rules from the verbose counter listing
/// (`iptables -t <table> -L <chain> -n -v -x`).
///
/// Rows look like
/// `  12  720 MARK  tcp  --  eth0  *  0.0.0.0/0  10.0.0.0/8  tcp dpt:80 MARK set 0x1`.
/// Everything after the destination column is kept as a single options string.
pub struct StatsSource {
    protocol: Protocol,
    timeout_ms: u64,
    wait_for_lock: bool,
}

impl StatsSource {
    pub fn new(cfg: &RulesConfig) -> Self {
        Self {
            protocol: cfg.protocol,
            timeout_ms: cfg.timeout_ms,
            wait_for_lock: cfg.wait_for_lock,
        }
    }
}

#[async_trait]
impl RuleSource for StatsSource {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn probe(&self) -> bool {
        probe_binary(self.protocol, self.timeout_ms).await
    }

    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<Rule>, BackendError> {
        let mut args = base_args(self.wait_for_lock, table);
        args.extend(["-L", chain, "-n", "-v", "-x"]);
        let out = run_checked(self.protocol.binary(), &args, self.timeout_ms).await?;
        Ok(stat_rows(&out))
    }

    fn parse_rule(&self, rule: &Rule) -> Result<ParsedStat, ParseError> {
        parse_stat(self.protocol, rule.as_str())
    }
}

/// Drops the chain-name and column-header lines and any blank trailer.
fn stat_rows(listing: &str) -> Vec<Rule> {
    listing
        .lines()
        .skip(2)
        .filter(|l| !l.trim().is_empty())
        .map(Rule::new)
        .collect()
}

fn parse_stat(protocol: Protocol, line: &str) -> Result<ParsedStat, ParseError> {
    let mut fields: Vec<&str> = line.split_whitespace().collect();

    // ip6tables prints the opt column as blanks, which whitespace splitting eats.
    if protocol == Protocol::Ipv6 && fields.len() > 4 && !is_opt_field(fields[4]) {
        fields.insert(4, "--");
    }

    if fields.len() < STAT_FIELDS {
        return Err(ParseError::new(
            line,
            format!("expected at least {STAT_FIELDS} fields, got {}", fields.len()),
        ));
    }

    let packets = parse_counter(line, fields[0], "packets")?;
    let bytes = parse_counter(line, fields[1], "bytes")?;
    let source = parse_cidr(line, &append_subnet(fields[7]))?;
    let destination = parse_cidr(line, &append_subnet(fields[8]))?;

    Ok(ParsedStat {
        packets: Some(packets),
        bytes: Some(bytes),
        target: fields[2].to_string(),
        protocol: fields[3].to_string(),
        opt: fields[4].to_string(),
        input: fields[5].to_string(),
        output: fields[6].to_string(),
        source,
        destination,
        options: fields[9..].join(" "),
    })
}

fn is_opt_field(s: &str) -> bool {
    matches!(s, "--" | "-f" | "!f")
}

fn parse_counter(line: &str, raw: &str, what: &str) -> Result<u64, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::new(line, format!("invalid {what} counter {raw:?}")))
}

/// The listing omits the prefix length for single hosts.
fn append_subnet(addr: &str) -> String {
    if addr.contains('/') {
        addr.to_string()
    } else if addr.contains('.') {
        format!("{addr}/32")
    } else {
        format!("{addr}/128")
    }
}
