//! Async shell command execution for the port-manager daemon.
//!
//! All host-side configuration goes through external tools (`ovs-vsctl`,
//! `ip`, `nmcli`, the module utilities), so command strings built from
//! request data must be quoted with [`shellquote`] before execution.

use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;

use crate::error::{PluginError, PluginResult};

/// Path to the `ip` command.
pub const IP_CMD: &str = "/sbin/ip";

/// Path to the `nmcli` NetworkManager CLI.
pub const NMCLI_CMD: &str = "/usr/bin/nmcli";

/// Path to `lsmod`.
pub const LSMOD_CMD: &str = "/sbin/lsmod";

/// Path to `rmmod`.
pub const RMMOD_CMD: &str = "/sbin/rmmod";

/// Path to `modprobe`.
pub const MODPROBE_CMD: &str = "/sbin/modprobe";

/// Path to `grep`.
pub const GREP_CMD: &str = "/bin/grep";

/// Characters with special meaning inside shell double-quotes.
static SHELL_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("Invalid regex pattern"));

/// Wraps a string in double quotes, escaping `$`, backtick, `"`, `\` and
/// newline so that request-supplied values cannot break out of a command.
pub fn shellquote(s: &str) -> String {
    let escaped = SHELL_ESCAPE_RE.replace_all(s, r"\$1");
    format!("\"{}\"", escaped)
}

/// Outcome of one shell command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code (0 = success, -1 when terminated by signal).
    pub exit_code: i32,
    /// Trimmed stdout.
    pub stdout: String,
    /// Trimmed stderr.
    pub stderr: String,
}

impl ExecResult {
    /// True when the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for error reporting.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (false, true) => self.stdout.clone(),
            _ => self.stderr.clone(),
        }
    }
}

/// Runs a command through `/bin/sh -c` and captures its output.
///
/// A non-zero exit code is not an error at this level; callers that need
/// to fail on it use [`exec_ok`].
pub async fn exec(cmd: &str) -> PluginResult<ExecResult> {
    tracing::debug!(command = %cmd, "executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PluginError::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }

    Ok(result)
}

/// Runs a command and returns its stdout, failing on non-zero exit.
pub async fn exec_ok(cmd: &str) -> PluginResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        Ok(result.stdout)
    } else {
        Err(PluginError::ShellCommandFailed {
            command: cmd.to_string(),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}
