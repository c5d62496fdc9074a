//! Abstraction over external command execution.
//!
//! Every external program this crate runs (the dependency lister, version
//! control tools, build toolchains) goes through [`CommandRunner`], so tests
//! can substitute canned responses for real subprocesses.
//!
//! Callers have to tell two failure modes apart: a program that could not be
//! found at all is reported as [`CommandError::NotFound`], while a program that
//! ran and exited non-zero is returned as an ordinary exit status. What a
//! non-zero exit means is up to the caller; [`run_checked`] is the shorthand
//! for callers that treat it as fatal.

use crate::error::CommandError;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output};

pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its full output (stdout + stderr + exit status).
    fn run_output(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
    ) -> Result<Output, CommandError>;

    /// Run a command with inherited stdio and return only its exit status.
    ///
    /// Used for build tools whose output the user wants to see.
    fn run_status(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
    ) -> Result<ExitStatus, CommandError>;
}

/// Options for command execution.
#[derive(Debug, Default, Clone)]
pub struct CommandOptions {
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Additional environment variables.
    pub env: Vec<(String, String)>,
    /// Start from an empty environment instead of inheriting ours.
    pub clear_env: bool,
}

impl CommandOptions {
    /// Create options with a working directory.
    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Default::default()
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn clear_env(mut self) -> Self {
        self.clear_env = true;
        self
    }
}

/// Production implementation that delegates to [`std::process::Command`].
pub struct RealCommandRunner;

impl RealCommandRunner {
    fn command(program: &str, args: &[&str], options: &CommandOptions) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        if options.clear_env {
            cmd.env_clear();
        }
        for (k, v) in &options.env {
            cmd.env(k, v);
        }
        tracing::debug!(program, ?args, cwd = ?options.cwd, "running command");
        cmd
    }
}

fn spawn_error(program: &str, err: io::Error) -> CommandError {
    if err.kind() == io::ErrorKind::NotFound {
        CommandError::NotFound {
            program: program.to_string(),
        }
    } else {
        CommandError::Spawn {
            program: program.to_string(),
            source: err,
        }
    }
}

impl CommandRunner for RealCommandRunner {
    fn run_output(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
    ) -> Result<Output, CommandError> {
        Self::command(program, args, options)
            .output()
            .map_err(|err| spawn_error(program, err))
    }

    fn run_status(
        &self,
        program: &str,
        args: &[&str],
        options: &CommandOptions,
    ) -> Result<ExitStatus, CommandError> {
        Self::command(program, args, options)
            .status()
            .map_err(|err| spawn_error(program, err))
    }
}

/// Run a command with inherited stdio and fail on a non-zero exit.
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
    options: &CommandOptions,
) -> Result<(), CommandError> {
    let status = runner.run_status(program, args, options)?;
    if status.success() {
        Ok(())
    } else {
        Err(CommandError::Failed {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}
