use async_trait::async_trait;

use crate::{
    backends::{base_args, parse_cidr, probe_binary, ParsedStat, Protocol, Rule, RuleSource},
    cmd::run_checked,
    config::RulesConfig,
    error::{BackendError, ParseError},
};

/// Reads rules as specifications (`iptables -t <table> -S <chain>`).
///
/// Only `-A` lines are rules; the chain policy (`-P`) and declarations (`-N`)
/// are dropped at listing time. Address, protocol and interface matches are
/// lifted into their own fields, every other token stays in `options`.
pub struct SpecSource {
    protocol: Protocol,
    timeout_ms: u64,
    wait_for_lock: bool,
}

impl SpecSource {
    pub fn new(cfg: &RulesConfig) -> Self {
        Self {
            protocol: cfg.protocol,
            timeout_ms: cfg.timeout_ms,
            wait_for_lock: cfg.wait_for_lock,
        }
    }
}

#[async_trait]
impl RuleSource for SpecSource {
    fn name(&self) -> &'static str {
        "spec"
    }

    async fn probe(&self) -> bool {
        probe_binary(self.protocol, self.timeout_ms).await
    }

    async fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<Rule>, BackendError> {
        let mut args = base_args(self.wait_for_lock, table);
        args.extend(["-S", chain]);
        let out = run_checked(self.protocol.binary(), &args, self.timeout_ms).await?;
        Ok(spec_rules(&out))
    }

    fn parse_rule(&self, rule: &Rule) -> Result<ParsedStat, ParseError> {
        parse_spec(self.protocol, rule.as_str())
    }
}

fn spec_rules(listing: &str) -> Vec<Rule> {
    listing
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("-A ") || l.starts_with("--append "))
        .map(Rule::new)
        .collect()
}

fn parse_spec(protocol: Protocol, line: &str) -> Result<ParsedStat, ParseError> {
    let mut target = None;
    let mut proto = None;
    let mut opt = "--";
    let mut input = None;
    let mut output = None;
    let mut source = None;
    let mut destination = None;
    let mut options: Vec<&str> = Vec::new();

    let mut tokens = line.split_whitespace();
    let mut negated = false;
    while let Some(tok) = tokens.next() {
        // a negated match only keeps its meaning next to the "!", so it stays in options
        if negated {
            negated = false;
            options.push(tok);
            if is_lifted_flag(tok) {
                options.push(value(&mut tokens, line, tok)?);
            }
            continue;
        }
        match tok {
            "-A" | "--append" => {
                value(&mut tokens, line, tok)?;
            }
            "-j" | "--jump" | "-g" | "--goto" => target = Some(value(&mut tokens, line, tok)?),
            "-p" | "--protocol" => proto = Some(value(&mut tokens, line, tok)?),
            "-s" | "--source" => source = Some(value(&mut tokens, line, tok)?),
            "-d" | "--destination" => destination = Some(value(&mut tokens, line, tok)?),
            "-i" | "--in-interface" => input = Some(value(&mut tokens, line, tok)?),
            "-o" | "--out-interface" => output = Some(value(&mut tokens, line, tok)?),
            "-f" | "--fragment" => opt = "-f",
            "!" => {
                options.push(tok);
                negated = true;
            }
            _ => options.push(tok),
        }
    }

    let target = target.ok_or_else(|| ParseError::new(line, "rule has no jump target"))?;

    Ok(ParsedStat {
        packets: None,
        bytes: None,
        target: target.to_string(),
        protocol: proto.unwrap_or("all").to_string(),
        opt: opt.to_string(),
        input: input.unwrap_or("*").to_string(),
        output: output.unwrap_or("*").to_string(),
        source: parse_cidr(line, source.unwrap_or(protocol.any_cidr()))?,
        destination: parse_cidr(line, destination.unwrap_or(protocol.any_cidr()))?,
        options: options.join(" "),
    })
}

/// Matches pulled out of `options` into their own field, all of which take a value.
fn is_lifted_flag(tok: &str) -> bool {
    matches!(
        tok,
        "-p" | "--protocol"
            | "-s"
            | "--source"
            | "-d"
            | "--destination"
            | "-i"
            | "--in-interface"
            | "-o"
            | "--out-interface"
    )
}

fn value<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    line: &str,
    flag: &str,
) -> Result<&'a str, ParseError> {
    tokens
        .next()
        .ok_or_else(|| ParseError::new(line, format!("{flag} is missing its value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
-P PREROUTING ACCEPT
-N KUBE-MARK
-A PREROUTING -s 10.0.0.0/8 -p tcp -m tcp --dport 80 -j MARK --set-xmark 0x1/0xffffffff
-A PREROUTING -i eth1 -j CONNMARK --restore-mark --nfmask 0xffffffff --ctmask 0xffffffff
-A PREROUTING ! -d 192.168.0.0/16 -j MARK --set-xmark 0x2/0xffffffff
";

    #[test]
    fn keeps_only_appended_rules() {
        let rules = spec_rules(LISTING);
        assert_eq!(rules.len(), 3);
        assert!(rules.iter().all(|r| r.as_str().starts_with("-A ")));
    }

    #[test]
    fn policy_only_chain_is_empty() {
        assert!(spec_rules("-P PREROUTING ACCEPT\n").is_empty());
    }

    #[test]
    fn lifts_matches_and_keeps_options() {
        let rules = spec_rules(LISTING);
        let stat = parse_spec(Protocol::Ipv4, rules[0].as_str()).unwrap();
        assert_eq!(stat.target, "MARK");
        assert_eq!(stat.protocol, "tcp");
        assert_eq!(stat.source.to_string(), "10.0.0.0/8");
        assert_eq!(stat.destination.to_string(), "0.0.0.0/0");
        assert_eq!(stat.options, "-m tcp --dport 80 --set-xmark 0x1/0xffffffff");
        assert_eq!(stat.packets, None);
    }

    #[test]
    fn interface_and_target_options() {
        let rules = spec_rules(LISTING);
        let stat = parse_spec(Protocol::Ipv4, rules[1].as_str()).unwrap();
        assert_eq!(stat.target, "CONNMARK");
        assert_eq!(stat.input, "eth1");
        assert_eq!(stat.output, "*");
        assert!(stat.options.starts_with("--restore-mark"));
    }

    #[test]
    fn negated_match_stays_in_options() {
        let rules = spec_rules(LISTING);
        let stat = parse_spec(Protocol::Ipv4, rules[2].as_str()).unwrap();
        assert_eq!(stat.destination.to_string(), "0.0.0.0/0");
        assert_eq!(stat.options, "! -d 192.168.0.0/16 --set-xmark 0x2/0xffffffff");
    }

    #[test]
    fn negated_valueless_match_keeps_jump() {
        let line = "-A PREROUTING -m physdev ! --physdev-is-bridged -j MARK --set-xmark 0x1/0xffffffff";
        let stat = parse_spec(Protocol::Ipv4, line).unwrap();
        assert_eq!(stat.target, "MARK");
        assert_eq!(
            stat.options,
            "-m physdev ! --physdev-is-bridged --set-xmark 0x1/0xffffffff"
        );
    }

    #[test]
    fn negated_fragment_and_interface_stay_in_options() {
        let line = "-A PREROUTING ! -f ! -i eth0 -j MARK --set-mark 0x4";
        let stat = parse_spec(Protocol::Ipv4, line).unwrap();
        assert_eq!(stat.opt, "--");
        assert_eq!(stat.input, "*");
        assert_eq!(stat.options, "! -f ! -i eth0 --set-mark 0x4");
    }

    #[tokio::test]
    async fn repeated_negated_physdev_rules_are_duplicates() {
        struct Canned;

        #[async_trait]
        impl RuleSource for Canned {
            fn name(&self) -> &'static str {
                "canned"
            }

            async fn probe(&self) -> bool {
                true
            }

            async fn list_rules(&self, _: &str, _: &str) -> Result<Vec<Rule>, BackendError> {
                let rule = "-A PREROUTING -m physdev ! --physdev-is-bridged -j MARK --set-xmark 0x1/0xffffffff";
                Ok(spec_rules(&format!("-P PREROUTING ACCEPT\n{rule}\n{rule}\n")))
            }

            fn parse_rule(&self, rule: &Rule) -> Result<ParsedStat, ParseError> {
                parse_spec(Protocol::Ipv4, rule.as_str())
            }
        }

        let res = crate::detector::detect(&Canned, "mangle", "PREROUTING").await;
        assert!(res.list_succeeded);
        assert!(res.has_duplicate_mark);
    }

    #[test]
    fn ipv6_defaults_to_any_v6() {
        let stat = parse_spec(Protocol::Ipv6, "-A PREROUTING -j MARK --set-mark 0x3").unwrap();
        assert_eq!(stat.source.to_string(), "::/0");
    }

    #[test]
    fn rule_without_jump_is_rejected() {
        let err = parse_spec(Protocol::Ipv4, "-A PREROUTING -p udp").unwrap_err();
        assert!(err.reason.contains("no jump target"));
    }

    #[test]
    fn dangling_flag_is_rejected() {
        let err = parse_spec(Protocol::Ipv4, "-A PREROUTING -j").unwrap_err();
        assert!(err.reason.contains("-j is missing its value"));
    }
}
