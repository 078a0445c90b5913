//! Remote command results, command building and failure mapping

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CommandError;

/// Result of a remote command execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// The command as the caller issued it (without state prefix)
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn new(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Classify a failed result, `None` on success
    pub fn error(&self) -> Option<CommandError> {
        map_error(self)
    }

    /// Pass a successful result through, turn a failed one into a typed error
    pub fn into_checked(self) -> Result<Self, CommandError> {
        check(&self).map(|_| self)
    }
}

/// Read-only view of session state handed to a transport per command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandContext {
    pub cwd: String,
    pub env: BTreeMap<String, String>,
}

impl CommandContext {
    pub fn new(cwd: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Prefix `command` with the context's environment exports and cwd
///
/// Produces `export K='v' && ... && cd <cwd> && <command>`.
pub fn build_command(command: &str, ctx: &CommandContext) -> String {
    let mut parts = Vec::with_capacity(ctx.env.len() + 2);

    for (key, value) in &ctx.env {
        parts.push(format!("export {}={}", key, shell_quote(value)));
    }

    if !ctx.cwd.is_empty() {
        parts.push(format!("cd {}", shell_quote(&ctx.cwd)));
    }

    parts.push(command.to_string());
    parts.join(" && ")
}

/// Map a failed command result to a typed error
///
/// Returns `None` when the command succeeded. Exit codes are checked
/// alongside case-insensitive stderr markers, first match wins.
pub fn map_error(result: &CommandResult) -> Option<CommandError> {
    if result.success() {
        return None;
    }

    let stderr = result.stderr.to_lowercase();
    let code = result.exit_code;
    let result = result.clone();

    let err = if code == 13 || stderr.contains("permission denied") {
        CommandError::PermissionDenied(result)
    } else if code == 127 || stderr.contains("not found") || stderr.contains("no such file") {
        CommandError::NotFound(result)
    } else if stderr.contains("already exists") || stderr.contains("file exists") {
        CommandError::AlreadyExists(result)
    } else if code == 2 || stderr.contains("invalid argument") {
        CommandError::InvalidArgument(result)
    } else if code == 124 || stderr.contains("timed out") {
        CommandError::Timeout(result)
    } else {
        CommandError::Failed(result)
    };

    Some(err)
}

/// Fail with the mapped error unless the command succeeded
pub fn check(result: &CommandResult) -> Result<(), CommandError> {
    match map_error(result) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str, exit_code: i32) -> CommandResult {
        CommandResult::new("cmd", "", stderr, exit_code)
    }

    #[test]
    fn test_build_command_plain() {
        let ctx = CommandContext::default();
        assert_eq!(build_command("uptime", &ctx), "uptime");
    }

    #[test]
    fn test_build_command_with_env_and_cwd() {
        let mut ctx = CommandContext::new("/var/log");
        ctx.env.insert("A".into(), "1".into());
        ctx.env.insert("B".into(), "two words".into());

        assert_eq!(
            build_command("ls", &ctx),
            "export A='1' && export B='two words' && cd '/var/log' && ls"
        );
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_success_maps_to_none() {
        let ok = CommandResult::new("ls -l", "file.txt", "", 0);
        assert!(ok.error().is_none());
        assert!(check(&ok).is_ok());
        assert_eq!(ok.into_checked().unwrap().stdout, "file.txt");
    }

    #[test]
    fn test_permission_denied() {
        let err = map_error(&failed("cat: /root/secret: Permission denied", 1));
        assert!(matches!(err, Some(CommandError::PermissionDenied(_))));
        assert!(matches!(
            map_error(&failed("", 13)),
            Some(CommandError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_not_found_beats_invalid_argument() {
        // exit 2 alone is InvalidArgument, but the stderr marker wins first
        let err = map_error(&failed("cat: /nonexistent: No such file or directory", 2));
        assert!(matches!(err, Some(CommandError::NotFound(_))));
        assert!(matches!(map_error(&failed("", 127)), Some(CommandError::NotFound(_))));
    }

    #[test]
    fn test_already_exists() {
        let err = map_error(&failed(
            "mkdir: cannot create directory '/tmp/test': File exists",
            1,
        ));
        assert!(matches!(err, Some(CommandError::AlreadyExists(_))));
    }

    #[test]
    fn test_invalid_argument_and_timeout() {
        assert!(matches!(
            map_error(&failed("", 2)),
            Some(CommandError::InvalidArgument(_))
        ));
        assert!(matches!(map_error(&failed("", 124)), Some(CommandError::Timeout(_))));
        assert!(matches!(
            map_error(&failed("operation TIMED OUT", 1)),
            Some(CommandError::Timeout(_))
        ));
    }

    #[test]
    fn test_generic_failure() {
        let err = map_error(&failed("boom", 1));
        assert!(matches!(err, Some(CommandError::Failed(_))));
    }
}
