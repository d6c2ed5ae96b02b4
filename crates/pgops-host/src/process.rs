//! Typed external-process invocation.
//!
//! Orchestrators never build shell strings; they describe a command as a
//! [`CommandSpec`] and hand it to a [`Runner`]. The production runner
//! spawns the process and captures a typed [`ExecOutput`]; tests substitute
//! a scripted runner (see [`crate::testing`]).

use std::path::PathBuf;
use std::process::Command;

use thiserror::Error;
use tracing::debug;

/// Description of one external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, passed verbatim (no shell interpretation).
    pub args: Vec<String>,
    /// Working directory for the invocation, scoped to this command only.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    /// Starts a spec for `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    /// Starts a spec that runs `program` as `user` via sudo.
    pub fn as_user(user: &str, program: impl Into<String>) -> Self {
        Self::new("sudo")
            .arg("-u")
            .arg(user)
            .arg(program.into())
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory for this invocation.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Renders the command line for diagnostics.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// A successful invocation producing `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed invocation producing `stderr`.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(1),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Error variants for external command invocation.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The process could not be launched at all.
    #[error("failed to launch [{command}]: {source}")]
    Spawn {
        /// The command line that failed to launch.
        command: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The process ran and exited with a non-zero status.
    #[error("command failed [{command}] (exit {code:?}): {stderr}")]
    Failed {
        /// The failing command line.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Executes [`CommandSpec`]s.
pub trait Runner {
    /// Runs the command, capturing output. A non-zero exit is not an error
    /// at this level; callers inspect [`ExecOutput::success`].
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError>;

    /// Runs the command and turns a non-zero exit into [`ExecError::Failed`].
    fn run_checked(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        let output = self.run(spec)?;
        if output.success {
            Ok(output)
        } else {
            Err(ExecError::Failed {
                command: spec.display(),
                code: output.code,
                stderr: output.stderr,
            })
        }
    }
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput, ExecError> {
        debug!(command = %spec.display(), "running external command");
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|source| ExecError::Spawn {
            command: spec.display(),
            source,
        })?;
        Ok(ExecOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
