//! External command execution for stages that shell out
//!
//! Commands are given as argument vectors and never pass through a shell.
//! [`ProcessCommandRunner`] can run them as another user through `sudo -u`,
//! forwarding selected variables from the current environment.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, error};

/// Captured result of a finished command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `argv` with additional environment variables `env` and capture its output
    ///
    /// A non-zero exit is not an error here; see [`run_checked`].
    async fn run(&self, argv: &[String], env: &[(String, String)]) -> Result<CommandOutput>;
}

/// Run a command and turn a non-zero exit into [`Error::ExternalTool`]
pub async fn run_checked(
    runner: &dyn CommandRunner,
    argv: &[String],
    env: &[(String, String)],
) -> Result<CommandOutput> {
    let output = runner.run(argv, env).await?;
    if output.success() {
        return Ok(output);
    }

    let command = argv.join(" ");
    error!(
        severity = "critical",
        %command,
        exit_code = ?output.exit_code,
        stdout = %output.stdout,
        stderr = %output.stderr,
        "command returned an error"
    );
    Err(Error::ExternalTool(format!(
        "command \"{}\" returned an error (exit code {:?})",
        command, output.exit_code
    )))
}

#[derive(Clone, Debug)]
struct RunAs {
    sudo: PathBuf,
    user: String,
}

/// Process invocation after user switching and environment forwarding are applied
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

/// [`CommandRunner`] backed by `tokio::process`
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    run_as: Option<RunAs>,
    passthrough_env: Vec<String>,
}

impl ProcessCommandRunner {
    /// Run commands as the current user
    pub fn new() -> Self {
        Self::default()
    }

    /// Run commands as `user` via `sudo -u`, locating `sudo` in PATH
    pub fn run_as(self, user: impl Into<String>) -> Result<Self> {
        let sudo = which::which("sudo")
            .map_err(|e| Error::ExternalTool(format!("sudo not found in PATH: {}", e)))?;
        Ok(self.run_as_with(sudo, user))
    }

    /// Run commands as `user` through the given `sudo` binary
    pub fn run_as_with(mut self, sudo: PathBuf, user: impl Into<String>) -> Self {
        self.run_as = Some(RunAs {
            sudo,
            user: user.into(),
        });
        self
    }

    /// Forward these variables from the current environment when set
    pub fn passthrough_env<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.passthrough_env = names.into_iter().map(Into::into).collect();
        self
    }

    fn invocation(&self, argv: &[String], env: &[(String, String)]) -> Result<Invocation> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::ExternalTool("empty command".to_string()))?;

        let mut envs: Vec<(String, String)> = self
            .passthrough_env
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|value| !value.is_empty())
                    .map(|value| (name.clone(), value))
            })
            .collect();
        envs.extend(env.iter().cloned());

        Ok(match &self.run_as {
            // sudo resets the environment; variables go on its command line instead
            Some(run_as) => {
                let mut sudo_args = vec!["-u".to_string(), run_as.user.clone()];
                sudo_args.extend(envs.iter().map(|(k, v)| format!("{}={}", k, v)));
                sudo_args.push(program.clone());
                sudo_args.extend(args.iter().cloned());
                Invocation {
                    program: run_as.sudo.clone(),
                    args: sudo_args,
                    envs: Vec::new(),
                }
            }
            None => Invocation {
                program: PathBuf::from(program),
                args: args.to_vec(),
                envs,
            },
        })
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, argv: &[String], env: &[(String, String)]) -> Result<CommandOutput> {
        let invocation = self.invocation(argv, env)?;
        debug!(program = ?invocation.program, args = ?invocation.args, "executing command");

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::ExternalTool(format!(
                    "failed to execute {}: {}",
                    invocation.program.display(),
                    e
                ))
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn invocation_runs_program_directly() {
        let runner = ProcessCommandRunner::new();
        let inv = runner
            .invocation(
                &argv(&["tar", "-xzf", "a.tar.gz"]),
                &[("LANG".to_string(), "C".to_string())],
            )
            .unwrap();

        assert_eq!(inv.program, PathBuf::from("tar"));
        assert_eq!(inv.args, argv(&["-xzf", "a.tar.gz"]));
        assert_eq!(inv.envs, vec![("LANG".to_string(), "C".to_string())]);
    }

    #[test]
    fn invocation_wraps_in_sudo_with_env_on_command_line() {
        let runner =
            ProcessCommandRunner::new().run_as_with(PathBuf::from("/usr/bin/sudo"), "analysis");
        let inv = runner
            .invocation(
                &argv(&["tar", "-xzf", "a.tar.gz"]),
                &[("LANG".to_string(), "C".to_string())],
            )
            .unwrap();

        assert_eq!(inv.program, PathBuf::from("/usr/bin/sudo"));
        assert_eq!(
            inv.args,
            argv(&["-u", "analysis", "LANG=C", "tar", "-xzf", "a.tar.gz"])
        );
        assert!(inv.envs.is_empty());
    }

    #[test]
    fn passthrough_forwards_only_set_variables() {
        let runner = ProcessCommandRunner::new()
            .passthrough_env(["PATH", "RELEASE_DL_SURELY_UNSET_VARIABLE"]);
        let inv = runner.invocation(&argv(&["true"]), &[]).unwrap();

        let names: Vec<&str> = inv.envs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["PATH"]);
    }

    #[test]
    fn empty_command_is_rejected() {
        let result = ProcessCommandRunner::new().invocation(&[], &[]);
        assert!(matches!(result, Err(Error::ExternalTool(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_captures_output_and_exit_code() {
        let runner = ProcessCommandRunner::new();
        let output = runner
            .run(&argv(&["sh", "-c", "printf out; printf err >&2; exit 3"]), &[])
            .await
            .unwrap();

        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_passes_environment() {
        let runner = ProcessCommandRunner::new();
        let output = runner
            .run(
                &argv(&["sh", "-c", "printf %s \"$RELEASE_DL_TEST\""]),
                &[("RELEASE_DL_TEST".to_string(), "hello".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(output.stdout, "hello");
        assert!(output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_checked_fails_on_non_zero_exit() {
        let runner = ProcessCommandRunner::new();

        let ok = run_checked(&runner, &argv(&["true"]), &[]).await.unwrap();
        assert!(ok.success());

        let err = run_checked(&runner, &argv(&["false"]), &[]).await.unwrap_err();
        match err {
            Error::ExternalTool(msg) => assert!(msg.contains("\"false\"")),
            other => panic!("expected ExternalTool, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_reports_missing_binary() {
        let runner = ProcessCommandRunner::new();
        let result = runner
            .run(&argv(&["release-dl-nonexistent-binary-xyz"]), &[])
            .await;

        assert!(matches!(result, Err(Error::ExternalTool(_))));
    }
}
