//! Scenario execution engine.
//!
//! Sequences backup, per-scenario mutate/install/run/record, and restore
//! over one run. Scenarios execute strictly in order and never in parallel:
//! each mutates the shared on-disk manifests, and that exclusivity is the
//! engine's sole concurrency-control mechanism.
use crate::adapters::DependencyOutcome;
use crate::config::{Config, Scenario};
use crate::manager::ScenarioManager;
use crate::report::Reporter;
use crate::runner::{CommandRunner, RunOptions, RunTimeout, SCENARIO_ENV_VAR};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative cancellation flag, checked at defined points in the scenario
/// loop: before each scenario's mutation and again before its command. The
/// token's source (signal handler, caller, test) is irrelevant here.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub scenario: String,
    pub allowed_to_fail: bool,
    pub dependency_state: Vec<DependencyOutcome>,
    pub command: String,
    pub result: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Exit leaving mutated dependency state in place, intentionally.
    pub skip_cleanup: bool,
    /// Caller-supplied command argv; wins over every configured command.
    pub command_override: Option<Vec<String>>,
}

pub struct TryEachTask<'a> {
    config: &'a Config,
    cwd: &'a Path,
    manager: &'a mut ScenarioManager,
    runner: &'a dyn CommandRunner,
    reporter: &'a dyn Reporter,
    cancel: CancelToken,
}

impl<'a> TryEachTask<'a> {
    pub fn new(
        config: &'a Config,
        cwd: &'a Path,
        manager: &'a mut ScenarioManager,
        runner: &'a dyn CommandRunner,
        reporter: &'a dyn Reporter,
        cancel: CancelToken,
    ) -> Self {
        Self {
            config,
            cwd,
            manager,
            runner,
            reporter,
            cancel,
        }
    }

    /// Run the scenarios in order and return the aggregate exit code:
    /// 0 when every scenario passed or was allowed to fail, 1 otherwise and
    /// 1 on any unexpected exception. The caller owns process termination.
    pub fn run(mut self, scenarios: &[Scenario], options: &EngineOptions) -> Result<i32> {
        self.manager.setup().context("back up dependency manifests")?;

        let mut results: Vec<ScenarioResult> = Vec::new();
        let mut run_error: Option<anyhow::Error> = None;
        for scenario in scenarios {
            if self.cancel.is_canceled() {
                tracing::info!("run canceled; skipping remaining scenarios");
                println!("dep-try: canceled, skipping remaining scenarios");
                break;
            }
            match self.run_scenario(scenario, options) {
                Ok(Some(result)) => results.push(result),
                // Canceled between mutation and the command.
                Ok(None) => break,
                Err(err) => {
                    run_error = Some(err);
                    break;
                }
            }
        }

        if options.skip_cleanup {
            println!("dep-try: cleanup skipped; dependency state left in place");
        } else {
            let _ = self.manager.cleanup();
        }

        self.reporter.report(&results);

        if let Some(err) = run_error {
            eprintln!("dep-try: {err:#}");
            return Ok(1);
        }
        let failing = results
            .iter()
            .any(|result| !result.result && !result.allowed_to_fail);
        Ok(i32::from(failing))
    }

    fn run_scenario(
        &mut self,
        scenario: &Scenario,
        options: &EngineOptions,
    ) -> Result<Option<ScenarioResult>> {
        let dependency_state = self
            .manager
            .change_to(scenario)
            .with_context(|| format!("change dependencies for scenario {}", scenario.name))?;
        if self.cancel.is_canceled() {
            tracing::info!(scenario = %scenario.name, "canceled after dependency change");
            return Ok(None);
        }

        let (program, args, display) =
            effective_command(self.config, scenario, options.command_override.as_deref())?;
        println!("dep-try: scenario {}: {display}", scenario.name);

        let mut env = scenario.env.clone();
        env.insert(SCENARIO_ENV_VAR.to_string(), scenario.name.clone());
        let run_options = RunOptions {
            cwd: Some(self.cwd.to_path_buf()),
            env,
            timeout: self.command_timeout(),
        };
        let outcome = self.runner.run(&program, &args, &run_options)?;

        Ok(Some(ScenarioResult {
            scenario: scenario.name.clone(),
            allowed_to_fail: scenario.allowed_to_fail,
            dependency_state,
            command: display,
            result: outcome.passed(),
        }))
    }

    fn command_timeout(&self) -> Option<RunTimeout> {
        self.config.command_timeout.map(|timeout| RunTimeout {
            duration: Duration::from_secs_f64(timeout.seconds),
            treat_as_success: timeout.treat_as_success,
        })
    }
}

/// One total precedence order, applied on every path: caller-supplied args,
/// then the scenario's command, then the configured command, then
/// `<package manager> test`.
pub(crate) fn effective_command(
    config: &Config,
    scenario: &Scenario,
    override_args: Option<&[String]>,
) -> Result<(String, Vec<String>, String)> {
    let argv: Vec<String> = if let Some(args) = override_args.filter(|args| !args.is_empty()) {
        args.to_vec()
    } else if let Some(command) = &scenario.command {
        shell_words::split(command)
            .with_context(|| format!("parse command for scenario {}: {command}", scenario.name))?
    } else if let Some(command) = &config.command {
        shell_words::split(command).with_context(|| format!("parse configured command: {command}"))?
    } else {
        vec![
            config.effective_package_manager()?.executable().to_string(),
            "test".to_string(),
        ]
    };
    let program = argv
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("command for scenario {} is empty", scenario.name))?;
    let args = argv[1..].to_vec();
    let display = shell_words::join(argv.iter().map(String::as_str));
    Ok((program, args, display))
}
