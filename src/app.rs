use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    backends::{source_for, RuleFormat, RuleSource},
    cli::{BackendCmd, Cli, Command},
    config::{default_config_path, load_config, normalize_listen_address, Config},
    metrics::FwMarkCollector,
    server,
    status::{CheckReport, ExitStatus},
};

pub async fn run(cli: Cli) -> Result<ExitStatus> {
    let cfg = resolve_config(&cli)?;

    match cli.cmd.unwrap_or(Command::Serve) {
        Command::Serve => {
            let source: Arc<dyn RuleSource> = Arc::from(source_for(&cfg.rules));
            let collector = FwMarkCollector::new(source, &cfg.rules.table, &cfg.rules.chain)
                .context("failed to build metric descriptors")?;
            server::serve(&cfg.listen_address, Arc::new(collector)).await?;
            Ok(ExitStatus::Ok)
        }
        Command::Check { json, one_line } => {
            let source = source_for(&cfg.rules);
            let result =
                crate::detector::detect(source.as_ref(), &cfg.rules.table, &cfg.rules.chain).await;
            let report =
                CheckReport::new(source.name(), &cfg.rules.table, &cfg.rules.chain, result);
            output_report(&report, json, one_line)?;
            Ok(report.overall.into())
        }
        Command::Backend { cmd } => {
            match cmd {
                BackendCmd::List => {
                    for format in [RuleFormat::Stats, RuleFormat::Spec] {
                        println!("{}", format.as_str());
                    }
                }
                BackendCmd::Detect => {
                    let source = source_for(&cfg.rules);
                    let ok = source.probe().await;
                    println!(
                        "{} ({}): {}",
                        cfg.rules.protocol.binary(),
                        source.name(),
                        if ok { "yes" } else { "no" }
                    );
                    if !ok {
                        return Ok(ExitStatus::Error);
                    }
                }
            }
            Ok(ExitStatus::Ok)
        }
    }
}

/// Loads the config file and applies command-line overrides on top.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(p) => p.clone(),
        None => default_config_path()?,
    };
    let mut cfg = load_config(&path)?;

    if let Some(addr) = &cli.listen_address {
        cfg.listen_address = addr.clone();
    }
    cfg.listen_address = normalize_listen_address(&cfg.listen_address);
    if let Some(format) = cli.format {
        cfg.rules.format = format;
    }
    if let Some(protocol) = cli.protocol {
        cfg.rules.protocol = protocol;
    }
    Ok(cfg)
}

fn output_report(report: &CheckReport, json: bool, one_line: bool) -> Result<()> {
    if one_line {
        println!("{}", report.one_line());
    } else if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_human_readable(report);
    }
    Ok(())
}

fn print_human_readable(report: &CheckReport) {
    println!("backend: {}", report.backend);
    println!("table/chain: {}/{}", report.table, report.chain);
    println!("overall: {}", report.overall.as_str());
    println!("last_check: {}", report.last_check.to_rfc3339());
    println!("list_succeeded: {}", report.result.list_succeeded);
    println!("has_duplicate_mark: {}", report.result.has_duplicate_mark);
    if let Some(opts) = &report.result.duplicate_options {
        println!("duplicate: {opts}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::Protocol;
    use clap::Parser;

    #[test]
    fn cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "listen_address = \"127.0.0.1:9100\"\n[rules]\nformat = \"spec\"\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "fwmark-exporter",
            "--config",
            path.to_str().unwrap(),
            "--web.listen-address",
            ":9300",
            "--protocol",
            "ipv6",
        ]);
        let cfg = resolve_config(&cli).unwrap();
        assert_eq!(cfg.listen_address, "0.0.0.0:9300");
        assert_eq!(cfg.rules.format, RuleFormat::Spec);
        assert_eq!(cfg.rules.protocol, Protocol::Ipv6);
    }

    #[test]
    fn file_values_survive_without_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rules]\ntable = \"filter\"\nchain = \"FORWARD\"\n").unwrap();

        let cli = Cli::parse_from(["fwmark-exporter", "--config", path.to_str().unwrap()]);
        let cfg = resolve_config(&cli).unwrap();
        assert_eq!(cfg.rules.table, "filter");
        assert_eq!(cfg.rules.chain, "FORWARD");
        assert_eq!(cfg.listen_address, "0.0.0.0:9200");
    }
}
