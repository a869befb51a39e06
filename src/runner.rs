//! Test-command execution.
//!
//! Pass/fail travels through `CommandOutcome`, never through `Err`: `Err` is
//! reserved for spawn-level failures (program missing, permission denied).
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

pub const SCENARIO_ENV_VAR: &str = "DEP_TRY_SCENARIO";

/// Exit code reported when a timed-out command is not treated as a success.
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Failed(i32),
}

impl CommandOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunTimeout {
    pub duration: Duration,
    pub treat_as_success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    /// Merged into the child's environment at spawn; scoped to this
    /// invocation only.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<RunTimeout>,
}

pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], options: &RunOptions)
        -> Result<CommandOutcome>;
}

/// Runs the command as a real child process.
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandOutcome> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let Some(timeout) = options.timeout else {
            let status = cmd
                .status()
                .with_context(|| format!("spawn {program}"))?;
            return Ok(outcome_from_code(status.code()));
        };

        let mut child = cmd.spawn().with_context(|| format!("spawn {program}"))?;
        let started = Instant::now();
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("wait for {program}"))?
            {
                return Ok(outcome_from_code(status.code()));
            }
            if started.elapsed() >= timeout.duration {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(if timeout.treat_as_success {
                    CommandOutcome::Success
                } else {
                    CommandOutcome::Failed(TIMEOUT_EXIT_CODE)
                });
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

fn outcome_from_code(code: Option<i32>) -> CommandOutcome {
    match code {
        Some(0) => CommandOutcome::Success,
        Some(code) => CommandOutcome::Failed(code),
        // Signal-terminated: no exit code to report.
        None => CommandOutcome::Failed(1),
    }
}
