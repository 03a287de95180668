use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

use fwmark_exporter::{
    backends::{ParsedStat, Rule, RuleSource},
    error::{BackendError, ParseError},
    metrics::FwMarkCollector,
    server::router,
};

/// Serves canned `TARGET options...` lines.
struct CannedSource {
    listing: Option<Vec<&'static str>>,
}

#[async_trait]
impl RuleSource for CannedSource {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn probe(&self) -> bool {
        true
    }

    async fn list_rules(&self, _table: &str, _chain: &str) -> Result<Vec<Rule>, BackendError> {
        match &self.listing {
            Some(lines) => Ok(lines.iter().copied().map(Rule::new).collect()),
            None => Err(BackendError::Exit {
                program: "iptables".into(),
                code: 4,
                stderr: "Permission denied (you must be root)".into(),
            }),
        }
    }

    fn parse_rule(&self, rule: &Rule) -> Result<ParsedStat, ParseError> {
        let (target, options) = rule
            .as_str()
            .split_once(' ')
            .ok_or_else(|| ParseError::new(rule.as_str(), "no options"))?;
        Ok(ParsedStat {
            packets: Some(0),
            bytes: Some(0),
            target: target.to_string(),
            protocol: "all".into(),
            opt: "--".into(),
            input: "*".into(),
            output: "*".into(),
            source: "0.0.0.0/0".parse().unwrap(),
            destination: "0.0.0.0/0".parse().unwrap(),
            options: options.to_string(),
        })
    }
}

async fn scrape(listing: Option<Vec<&'static str>>, uri: &str) -> (StatusCode, String, String) {
    let collector =
        FwMarkCollector::new(Arc::new(CannedSource { listing }), "mangle", "PREROUTING").unwrap();
    let app = router(Arc::new(collector));
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, content_type, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn duplicate_marks_are_exposed() {
    let (status, content_type, body) = scrape(
        Some(vec!["MARK set 0x1", "ACCEPT ctstate RELATED", "MARK set 0x1"]),
        "/metrics",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/plain"));
    assert!(body.contains("fwmark_rules_list_success 1"));
    assert!(body.contains("fwmark_duplication 1"));
}

#[tokio::test]
async fn distinct_marks_are_clean() {
    let (_, _, body) = scrape(Some(vec!["MARK set 0x1", "MARK set 0x2"]), "/metrics").await;
    assert!(body.contains("fwmark_rules_list_success 1"));
    assert!(body.contains("fwmark_duplication 0"));
}

#[tokio::test]
async fn listing_failure_reports_zero_zero() {
    let (status, _, body) = scrape(None, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("fwmark_rules_list_success 0"));
    assert!(body.contains("fwmark_duplication 0"));
}

#[tokio::test]
async fn root_path_serves_metrics_too() {
    let (status, _, body) = scrape(Some(vec![]), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("# HELP fwmark_duplication"));
}

#[tokio::test]
async fn concurrent_scrapes_share_one_collector() {
    let collector = Arc::new(
        FwMarkCollector::new(
            Arc::new(CannedSource {
                listing: Some(vec!["MARK set 0x9", "MARK set 0x9"]),
            }),
            "mangle",
            "PREROUTING",
        )
        .unwrap(),
    );
    let app = router(collector);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let resp = app
                .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let body = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            String::from_utf8(body.to_vec()).unwrap()
        }));
    }
    for h in handles {
        assert!(h.await.unwrap().contains("fwmark_duplication 1"));
    }
}
