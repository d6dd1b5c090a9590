//! External program execution
//!
//! The dumper and uploader never spawn processes directly; they go through
//! a [`CommandExecutor`] so tests can substitute a fake that records calls
//! and scripts exit statuses.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

/// Exit status and captured output of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Whether the program exited with status 0
    pub success: bool,

    /// Exit code, if the program exited normally
    pub code: Option<i32>,

    /// Captured stdout and stderr, both empty when stdout went to a file
    pub output: String,
}

impl ExecOutput {
    /// Successful result with no output
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
            output: String::new(),
        }
    }

    /// Failed result with the given exit code and message
    pub fn failed(code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            output: output.into(),
        }
    }

    /// Short description of how the program exited
    pub fn status_string(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external programs
pub trait CommandExecutor: Send + Sync {
    /// Run `program` with `args`, waiting for it to exit. When `stdout` is
    /// given, the program's standard output is written there.
    ///
    /// `Err` is returned only if the program could not be run at all.
    fn execute(
        &self,
        program: &Path,
        args: &[OsString],
        stdout: Option<&File>,
    ) -> io::Result<ExecOutput>;
}

/// Executor that spawns real processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        program: &Path,
        args: &[OsString],
        stdout: Option<&File>,
    ) -> io::Result<ExecOutput> {
        // Diagnostics of a program writing to a file are discarded
        let (stdout, stderr) = match stdout {
            Some(file) => (Stdio::from(file.try_clone()?), Stdio::null()),
            None => (Stdio::piped(), Stdio::piped()),
        };

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .output()?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecOutput {
            success: output.status.success(),
            code: output.status.code(),
            output: text.trim_end().to_string(),
        })
    }
}
