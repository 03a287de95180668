//! Error types for the rule source seam.
//!
//! Both kinds are recoverable: a [`BackendError`] turns into a failed
//! listing for one scrape, a [`ParseError`] drops a single rule.

/// The firewall backend could not produce a rule listing.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend binary could not be started (missing, not executable).
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend did not answer within the configured timeout.
    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    /// The backend ran but reported failure (permission denied, unknown chain).
    #[error("{program} exited with code {code}: {stderr}")]
    Exit {
        program: String,
        code: i32,
        stderr: String,
    },
}

impl BackendError {
    /// Name of the program that failed.
    pub fn program(&self) -> &str {
        match self {
            Self::Spawn { program, .. }
            | Self::Timeout { program, .. }
            | Self::Exit { program, .. } => program,
        }
    }
}

/// A single rule line could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed rule {line:?}: {reason}")]
pub struct ParseError {
    pub line: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
