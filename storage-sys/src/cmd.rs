// SPDX-License-Identifier: GPL-3.0-only

//! External tool invocation.
//!
//! All tools (`parted`, `mkfs.*`, `mdadm`, `systemctl`) are synchronous and judged
//! by exit status alone. Callers go through [`CommandRunner`] so the engine can be
//! driven by a fake in tests.

use std::process::Command;

use tracing::{debug, warn};

use crate::{Result, SysError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Rendered command line, for logs.
    pub command: String,
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Runs tools as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let rendered = render(program, args);
        debug!(command = %rendered, "running");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|error| SysError::CommandFailed {
                command: rendered.clone(),
                status: None,
                stderr: error.to_string(),
            })?;

        Ok(CommandOutput {
            command: rendered,
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub fn render(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}

/// Run `program` and turn a non-zero exit into [`SysError::CommandFailed`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let output = runner.run(program, args)?;
    if !output.success() {
        warn!(
            command = %output.command,
            status = ?output.status,
            stderr = %output.stderr.trim(),
            "command failed"
        );
        return Err(SysError::CommandFailed {
            command: output.command,
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Tools from `tools` that are not on `PATH`.
pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|tool| which::which(**tool).is_err())
        .map(|tool| (*tool).to_string())
        .collect()
}

pub(crate) fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct ScriptedRunner {
        status: i32,
        calls: Mutex<Vec<String>>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            let command = render(program, args);
            self.calls.lock().unwrap().push(command.clone());
            Ok(CommandOutput {
                command,
                status: Some(self.status),
                stdout: String::new(),
                stderr: "device busy\n".to_string(),
            })
        }
    }

    #[test]
    fn formats_command_context() {
        let rendered = render("parted", &owned(&["-s", "/dev/sda", "mklabel", "gpt"]));
        assert_eq!(rendered, "parted -s /dev/sda mklabel gpt");
        assert_eq!(render("sync", &[]), "sync");
    }

    #[test]
    fn non_zero_exit_becomes_command_failed() {
        let runner = ScriptedRunner {
            status: 1,
            calls: Mutex::new(Vec::new()),
        };

        let err = run_checked(&runner, "mdadm", &owned(&["--stop", "/dev/md0"])).unwrap_err();
        match err {
            SysError::CommandFailed {
                command,
                status,
                stderr,
            } => {
                assert_eq!(command, "mdadm --stop /dev/md0");
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "device busy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_exit_passes_output_through() {
        let runner = ScriptedRunner {
            status: 0,
            calls: Mutex::new(Vec::new()),
        };
        let output = run_checked(&runner, "mdadm", &owned(&["--version"])).unwrap();
        assert!(output.success());
    }
}
