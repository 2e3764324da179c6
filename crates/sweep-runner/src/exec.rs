use anyhow::{Context, Result};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub command: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub struct ReturnCode(pub Option<i32>);

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(c) => write!(f, "{}", c),
            None => f.write_str("signal"),
        }
    }
}

/// Runs one command line synchronously and captures its output.
pub trait CommandRunner: Send + Sync {
    fn execute(&self, command: &str, workdir: &Path) -> Result<ExecOutcome>;
}

/// Hands the command line to `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl CommandRunner for ShellRunner {
    fn execute(&self, command: &str, workdir: &Path) -> Result<ExecOutcome> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command).current_dir(workdir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let output = cmd
            .output()
            .with_context(|| format!("failed to spawn `{} -c {}`", self.shell, command))?;
        Ok(ExecOutcome {
            command: command.to_string(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
