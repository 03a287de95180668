use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detector::DetectionResult;

/// Output of `fwmark-exporter check`.
#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    pub schema: u32,
    pub overall: Overall,
    pub backend: String,
    pub table: String,
    pub chain: String,
    pub last_check: DateTime<Utc>,
    pub result: DetectionResult,
}

impl CheckReport {
    pub fn new(backend: &str, table: &str, chain: &str, result: DetectionResult) -> Self {
        Self {
            schema: 1,
            overall: Overall::from(&result),
            backend: backend.to_string(),
            table: table.to_string(),
            chain: chain.to_string(),
            last_check: Utc::now(),
            result,
        }
    }

    pub fn one_line(&self) -> String {
        format!(
            "fwmark:{}/{}:{}",
            self.table,
            self.chain,
            self.overall.as_str()
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Overall {
    Ok,
    Duplicate,
    ListFailed,
}

impl Overall {
    pub fn as_str(&self) -> &'static str {
        match self {
            Overall::Ok => "ok",
            Overall::Duplicate => "duplicate",
            Overall::ListFailed => "list_failed",
        }
    }
}

impl From<&DetectionResult> for Overall {
    fn from(r: &DetectionResult) -> Self {
        if !r.list_succeeded {
            Overall::ListFailed
        } else if r.has_duplicate_mark {
            Overall::Duplicate
        } else {
            Overall::Ok
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    Warn,
    Error,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Warn => 1,
            ExitStatus::Error => 2,
        }
    }
}

impl From<Overall> for ExitStatus {
    fn from(o: Overall) -> Self {
        match o {
            Overall::Ok => ExitStatus::Ok,
            Overall::Duplicate => ExitStatus::Warn,
            Overall::ListFailed => ExitStatus::Error,
        }
    }
}
