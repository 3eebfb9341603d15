//! Command Executor (C3) — runs exactly one external command per call with
//! no shell interpretation, under an allow-list and a path sandbox.
//! Grounded 1:1 on `original_source/src/executor.py`'s `CommandExecutor`.

pub mod sandbox;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

use sentinel_config::ExecConfig;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("rejected_unsafe: {0}")]
    RejectedUnsafe(String),
    #[error("timeout after {0}s")]
    Timeout(u64),
    #[error("spawn_error: {0}")]
    SpawnError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuditRecord {
    ts: DateTime<Utc>,
    command: String,
    argv: Vec<String>,
    allowed: bool,
    returncode: Option<i32>,
    reason: Option<String>,
}

/// Characters that indicate shell interpretation was attempted; any of
/// these anywhere in the raw command string is an automatic reject,
/// independent of the allow-list checks below.
const SHELL_OPERATORS: &[&str] = &[";", "&&", "||", "|", "`", "$("];

const RM_FORBIDDEN_ARGS: &[&str] = &["/", "/*", "..", "../", "~", "~/", ".*"];

pub struct CommandExecutor {
    config: ExecConfig,
    audit_log_path: PathBuf,
}

impl CommandExecutor {
    pub fn new(config: ExecConfig, audit_log_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            audit_log_path: audit_log_path.into(),
        }
    }

    /// Parses `command` to argv and validates it against every allow-list,
    /// per spec.md §4.3 steps 1-4. Returns the parsed argv on success.
    pub fn is_safe_command(&self, command: &str) -> Result<Vec<String>, ExecError> {
        if command.trim().is_empty() {
            return Err(ExecError::RejectedUnsafe("empty command".to_string()));
        }

        if let Some(op) = SHELL_OPERATORS.iter().find(|op| command.contains(*op)) {
            return Err(ExecError::RejectedUnsafe(format!(
                "shell operator `{op}` is forbidden"
            )));
        }

        let argv = split_shell_words(command)
            .map_err(|e| ExecError::RejectedUnsafe(format!("failed to parse command: {e}")))?;
        if argv.is_empty() {
            return Err(ExecError::RejectedUnsafe("empty command".to_string()));
        }

        let base = basename(&argv[0]);

        if base == "sudo" {
            return Err(ExecError::RejectedUnsafe("sudo is forbidden".to_string()));
        }

        if !self.config.allowed_commands.iter().any(|c| c == base) {
            return Err(ExecError::RejectedUnsafe(format!(
                "command not in allow-list: {base}"
            )));
        }

        if base == "systemctl" {
            let action = argv.get(1).ok_or_else(|| {
                ExecError::RejectedUnsafe("systemctl requires a subcommand".to_string())
            })?;
            if !self.config.allowed_systemctl_actions.iter().any(|a| a == action) {
                return Err(ExecError::RejectedUnsafe(format!(
                    "systemctl action not allowed: {action}"
                )));
            }
        }

        if self.config.path_sensitive_commands.iter().any(|c| c == base) {
            for path_arg in extract_pathlike_args(&argv) {
                if !self.is_under_allowed_roots(&path_arg) {
                    return Err(ExecError::RejectedUnsafe(format!(
                        "path outside allow-listed roots: {}",
                        path_arg.display()
                    )));
                }
            }
        }

        if base == "rm" {
            for arg in &argv[1..] {
                if RM_FORBIDDEN_ARGS.contains(&arg.as_str()) {
                    return Err(ExecError::RejectedUnsafe(format!(
                        "dangerous rm target: {arg}"
                    )));
                }
            }
        }

        Ok(argv)
    }

    fn is_under_allowed_roots(&self, path: &Path) -> bool {
        let resolved = match resolve_pathlike(path) {
            Some(p) => p,
            None => return false,
        };
        self.config.allowed_roots.iter().any(|root| {
            match resolve_pathlike(Path::new(root)) {
                Some(root_resolved) => resolved.starts_with(&root_resolved),
                None => false,
            }
        })
    }

    /// Runs `command`, honoring the configured timeout and output-byte
    /// budget, and appends an audit record regardless of outcome. A
    /// rejected command is conveyed as an `Err(ExecError::RejectedUnsafe)`
    /// rather than a successful `ExecOutput`.
    pub async fn execute(&self, command: &str) -> Result<ExecOutput, ExecError> {
        let argv = match self.is_safe_command(command) {
            Ok(argv) => argv,
            Err(err) => {
                self.audit(command, &[], false, None, Some(err.to_string())).await;
                return Err(err);
            }
        };

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);

        let spawned = tokio::time::timeout(timeout, cmd.output()).await;

        match spawned {
            Ok(Ok(output)) => {
                let stdout =
                    truncate(&String::from_utf8_lossy(&output.stdout), self.config.max_output_bytes);
                let stderr =
                    truncate(&String::from_utf8_lossy(&output.stderr), self.config.max_output_bytes);
                let returncode = output.status.code().unwrap_or(-1);
                self.audit(command, &argv, true, Some(returncode), None).await;
                Ok(ExecOutput {
                    success: output.status.success(),
                    stdout,
                    stderr,
                    returncode,
                })
            }
            Ok(Err(spawn_err)) => {
                let err = ExecError::SpawnError(spawn_err.to_string());
                self.audit(command, &argv, true, None, Some(err.to_string())).await;
                Err(err)
            }
            Err(_) => {
                let err = ExecError::Timeout(self.config.timeout_secs);
                self.audit(command, &argv, true, None, Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    async fn audit(
        &self,
        command: &str,
        argv: &[String],
        allowed: bool,
        returncode: Option<i32>,
        reason: Option<String>,
    ) {
        let record = AuditRecord {
            ts: Utc::now(),
            command: command.to_string(),
            argv: argv.to_vec(),
            allowed,
            returncode,
            reason,
        };
        if let Err(err) = sentinel_state::append_jsonl(&self.audit_log_path, &record).await {
            tracing::error!(error = %err, "failed to write command audit record");
        }
    }
}

/// Resolves a possibly-nonexistent path to an absolute, `.`/`..`-free form
/// for allow-list comparison. `canonicalize` is tried first when the path
/// exists (it also resolves symlinks); otherwise the path is made absolute
/// against cwd and its components are collapsed lexically, mirroring
/// Python's `Path.resolve(strict=False)` from `original_source/src/executor.py`.
/// Relying on `canonicalize` alone would let a non-existent escape like
/// `<root>/../../etc` keep its `..` components and pass a lexical
/// `starts_with` check against the root.
fn resolve_pathlike(path: &Path) -> Option<PathBuf> {
    let expanded = expand_tilde(path);
    if let Ok(canon) = expanded.canonicalize() {
        return Some(canon);
    }
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir().ok()?.join(expanded)
    };
    Some(lexically_normalize(&absolute))
}

/// Collapses `.` and `..` components without touching the filesystem.
/// A `..` at the root is clamped (stays at root) rather than escaping it,
/// same as `Path.resolve(strict=False)`.
fn lexically_normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}

fn basename(arg: &str) -> &str {
    Path::new(arg)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(arg)
}

/// Arguments that look like paths, excluding flags, URLs, and bare
/// systemd-unit names — mirrors `_extract_pathlike_args` in
/// `original_source/src/executor.py`.
fn extract_pathlike_args(argv: &[String]) -> Vec<PathBuf> {
    argv[1..]
        .iter()
        .filter(|a| !a.is_empty())
        .filter(|a| !a.starts_with('-'))
        .filter(|a| !looks_like_url(a))
        .filter(|a| !(a.ends_with(".service") && !a.contains('/')))
        .filter(|a| a.contains('/') || a.starts_with('.') || a.starts_with('~'))
        .map(PathBuf::from)
        .collect()
}

fn looks_like_url(arg: &str) -> bool {
    if let Some(idx) = arg.find("://") {
        arg[..idx].chars().all(|c| c.is_ascii_alphabetic())
    } else {
        false
    }
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (truncated at {} bytes)", &s[..end], max_bytes)
}

/// Minimal POSIX-shell-style word splitter: single/double quotes and
/// backslash escapes, no globbing or variable expansion. Mirrors Python's
/// `shlex.split` closely enough for argv parsing of an already
/// operator-free command string.
fn split_shell_words(input: &str) -> Result<Vec<String>, &'static str> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars().peekable();

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match quote {
            Quote::None => match c {
                ' ' | '\t' | '\n' => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_word = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_word = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_word = true;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => {
                    if let Some(&next) = chars.peek() {
                        if next == '"' || next == '\\' {
                            current.push(chars.next().unwrap());
                        } else {
                            current.push(c);
                        }
                    } else {
                        current.push(c);
                    }
                }
                _ => current.push(c),
            },
        }
    }

    if quote != Quote::None {
        return Err("unterminated quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_config::ExecConfig;

    fn executor(dir: &Path) -> CommandExecutor {
        let mut config = ExecConfig::default();
        config.allowed_roots = vec![dir.to_string_lossy().to_string()];
        CommandExecutor::new(config, dir.join("command_audit.jsonl"))
    }

    #[test]
    fn splits_quoted_words() {
        let words = split_shell_words("echo 'hello world' \"a b\"").unwrap();
        assert_eq!(words, vec!["echo", "hello world", "a b"]);
    }

    #[test]
    fn rejects_shell_operators() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.is_safe_command("ls; rm -rf /home/pi").unwrap_err();
        assert!(matches!(err, ExecError::RejectedUnsafe(_)));
    }

    #[test]
    fn rejects_sudo() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.is_safe_command("sudo reboot").unwrap_err();
        assert!(err.to_string().contains("sudo"));
    }

    #[test]
    fn rejects_command_outside_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.is_safe_command("curl https://example.com").unwrap_err();
        assert!(err.to_string().contains("not in allow-list"));
    }

    #[test]
    fn rejects_path_outside_allowed_roots() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.is_safe_command("rm -rf /home/pi/sentinel/../../etc").unwrap_err();
        assert!(matches!(err, ExecError::RejectedUnsafe(_)));
    }

    #[test]
    fn rejects_nonexistent_escape_via_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        // `<root>/../etc` never exists on disk, so `canonicalize` fails and
        // the sandbox must fall back to lexical normalization rather than
        // letting the `..` slip through.
        let escape = dir.path().join("../etc");
        let err = exec
            .is_safe_command(&format!("cat {}", escape.display()))
            .unwrap_err();
        assert!(matches!(err, ExecError::RejectedUnsafe(_)));
    }

    #[test]
    fn rejects_rm_on_root() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let err = exec.is_safe_command("rm -rf /").unwrap_err();
        assert!(err.to_string().contains("dangerous rm target"));
    }

    #[test]
    fn allows_command_inside_allowed_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let exec = executor(dir.path());
        let argv = exec
            .is_safe_command(&format!("cat {}", dir.path().join("a.txt").display()))
            .unwrap();
        assert_eq!(argv[0], "cat");
    }

    #[test]
    fn systemctl_restricts_to_allowed_actions() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        assert!(exec.is_safe_command("systemctl enable ssh").is_err());
        assert!(exec.is_safe_command("systemctl status sentinel.service").is_ok());
    }

    #[tokio::test]
    async fn execute_runs_allowed_command_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let output = exec.execute("echo hello").await.unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("hello"));

        let audit: Vec<AuditRecord> =
            sentinel_state::read_jsonl(dir.path().join("command_audit.jsonl")).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(audit[0].allowed);
    }

    #[tokio::test]
    async fn execute_rejects_and_audits_unsafe_command() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        let result = exec.execute("rm -rf /").await;
        assert!(result.is_err());

        let audit: Vec<AuditRecord> =
            sentinel_state::read_jsonl(dir.path().join("command_audit.jsonl")).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].allowed);
    }

    #[tokio::test]
    async fn execute_enforces_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecConfig::default();
        config.allowed_roots = vec![dir.path().to_string_lossy().to_string()];
        config.allowed_commands.push("sleep".to_string());
        config.timeout_secs = 1;
        let exec = CommandExecutor::new(config, dir.path().join("command_audit.jsonl"));
        let result = exec.execute("sleep 5").await;
        assert!(matches!(result, Err(ExecError::Timeout(1))));
    }
}
