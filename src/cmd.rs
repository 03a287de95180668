use std::process::Stdio;
use std::time::Duration;

use tokio::{process::Command, time};

use crate::error::BackendError;

/// Captured result of a finished backend command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs `program args...` and collects its output, killing it after `timeout_ms`.
///
/// A non-zero exit is returned as `Ok`; callers decide whether that is a failure.
pub async fn run_timeout(
    program: &str,
    args: &[&str],
    timeout_ms: u64,
) -> Result<CommandOutput, BackendError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BackendError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let out = match time::timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await
    {
        Ok(res) => res.map_err(|source| BackendError::Spawn {
            program: program.to_string(),
            source,
        })?,
        // dropping the future drops the child, which kills it
        Err(_) => {
            return Err(BackendError::Timeout {
                program: program.to_string(),
                timeout_ms,
            })
        }
    };

    Ok(CommandOutput {
        code: out.status.code().unwrap_or(2),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}

/// Like [`run_timeout`], but a non-zero exit becomes [`BackendError::Exit`].
pub async fn run_checked(
    program: &str,
    args: &[&str],
    timeout_ms: u64,
) -> Result<String, BackendError> {
    let out = run_timeout(program, args, timeout_ms).await?;
    if !out.success() {
        return Err(BackendError::Exit {
            program: program.to_string(),
            code: out.code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}
