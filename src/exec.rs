//! # External Commands
//!
//! Every external program keybank relies on (`git fsck`, `gpg`, `cryptsetup`,
//! `mount`) is executed through a [`CommandRunner`]. Stores and collaborators
//! receive the runner at construction, so tests substitute a recording fake
//! instead of touching the real system.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{KeybankError, Result};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: "exit status: 0".into(),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            status: format!("exit status: {code}"),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        text.push_str(&self.stderr);
        text
    }

    /// Turn a failed run into a [`KeybankError::Command`].
    pub fn check(self, program: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(KeybankError::Command {
                program: program.to_string(),
                status: self.status.clone(),
                output: self.combined().trim().to_string(),
            })
        }
    }
}

pub trait CommandRunner {
    /// Run `program` with `args`, optionally inside `cwd`, and capture its output.
    ///
    /// A non-zero exit is not an error here; callers decide via
    /// [`CommandOutput::check`] or by inspecting `success`.
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput>;

    fn run_checked(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        self.run(program, args, cwd)?.check(program)
    }

    /// Run `program` attached to the terminal, for tools that prompt for a
    /// passphrase. Fails unless the program exits zero.
    fn interactive(&self, program: &str, args: &[String]) -> Result<()>;
}

/// Runs commands as real child processes, never attached to the terminal's stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput> {
        debug!("executing: {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn interactive(&self, program: &str, args: &[String]) -> Result<()> {
        debug!("executing interactively: {} {}", program, args.join(" "));

        let status = Command::new(program).args(args).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(KeybankError::Command {
                program: program.to_string(),
                status: status.to_string(),
                output: String::new(),
            })
        }
    }
}

/// Convert path-like arguments into the `String` form [`CommandRunner`] takes.
pub fn arg(value: impl AsRef<Path>) -> String {
    value.as_ref().to_string_lossy().into_owned()
}
