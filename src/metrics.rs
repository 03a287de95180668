use std::sync::Arc;

use prometheus::{core::Collector, proto::MetricFamily, Encoder, Gauge, Opts, TextEncoder};

use crate::{
    backends::RuleSource,
    detector::{detect, DetectionResult},
};

pub const LIST_SUCCESS_METRIC: &str = "fwmark_rules_list_success";
pub const DUPLICATION_METRIC: &str = "fwmark_duplication";

const LIST_SUCCESS_HELP: &str =
    "Whether iptables rules list succeeded or not. 1 represents success and 0 represents failure.";
const DUPLICATION_HELP: &str =
    "Whether there is any duplicate fwmark or not. 1 represents duplication and 0 represents no duplication.";

/// Publishes one detection pass per scrape as two gauges.
///
/// The two gauge [`Opts`] are built once and only read afterwards; each
/// scrape builds its own gauges from them and a fresh [`DetectionResult`].
pub struct FwMarkCollector {
    source: Arc<dyn RuleSource>,
    table: String,
    chain: String,
    list_success: Opts,
    duplication: Opts,
}

impl FwMarkCollector {
    pub fn new(
        source: Arc<dyn RuleSource>,
        table: impl Into<String>,
        chain: impl Into<String>,
    ) -> prometheus::Result<Self> {
        let list_success = Opts::new(LIST_SUCCESS_METRIC, LIST_SUCCESS_HELP);
        let duplication = Opts::new(DUPLICATION_METRIC, DUPLICATION_HELP);
        // invalid names fail here, before any scrape
        Gauge::with_opts(list_success.clone())?;
        Gauge::with_opts(duplication.clone())?;
        Ok(Self {
            source,
            table: table.into(),
            chain: chain.into(),
            list_success,
            duplication,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub async fn detect(&self) -> DetectionResult {
        detect(self.source.as_ref(), &self.table, &self.chain).await
    }

    /// Runs detection and returns the list-success and duplication families, in that order.
    pub async fn collect(&self) -> prometheus::Result<Vec<MetricFamily>> {
        let result = self.detect().await;
        self.families(&result)
    }

    pub fn families(&self, result: &DetectionResult) -> prometheus::Result<Vec<MetricFamily>> {
        let mut out = Vec::with_capacity(2);
        for (opts, value) in [
            (&self.list_success, result.list_succeeded),
            (&self.duplication, result.has_duplicate_mark),
        ] {
            let gauge = Gauge::with_opts(opts.clone())?;
            gauge.set(gauge_value(value));
            out.extend(gauge.collect());
        }
        Ok(out)
    }

    /// Encodes a fresh scrape in the Prometheus text format.
    pub async fn render(&self) -> prometheus::Result<Vec<u8>> {
        let families = self.collect().await?;
        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        Ok(buf)
    }
}

fn gauge_value(flag: bool) -> f64 {
    if flag {
        1.0
    } else {
        0.0
    }
}
