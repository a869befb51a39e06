use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

mod adapters;
mod backup;
mod cli;
mod config;
mod engine;
mod manager;
mod report;
mod runner;
mod util;

use cli::{Command, ConfigArgs, EachArgs, OneArgs, ResetArgs, RootArgs};
use config::{load_config, Config, Scenario};
use engine::{CancelToken, EngineOptions, TryEachTask};
use manager::ScenarioManager;
use report::ConsoleReporter;
use runner::ProcessRunner;
use util::display_path;

fn main() {
    init_tracing();
    let args = RootArgs::parse();
    let result = match args.command {
        Command::Each(args) => cmd_each(args),
        Command::One(args) => cmd_one(args),
        Command::Reset(args) => cmd_reset(args),
        Command::Config(args) => cmd_config(args),
    };
    // The exit code is the single machine-readable success signal: 0 when
    // every scenario passed or was allowed to fail, 1 otherwise and on any
    // unexpected failure.
    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dep-try: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_each(args: EachArgs) -> Result<i32> {
    let cwd = resolve_cwd(args.cwd)?;
    let config = load_config(args.config_path.as_deref(), &cwd)?;
    let scenarios = config.scenarios.clone();
    run_scenarios(&config, &cwd, &scenarios, args.skip_cleanup, args.command)
}

fn cmd_one(args: OneArgs) -> Result<i32> {
    let cwd = resolve_cwd(args.cwd)?;
    let config = load_config(args.config_path.as_deref(), &cwd)?;
    let scenario = config
        .scenario_named(&args.scenario)
        .cloned()
        .ok_or_else(|| {
            let known: Vec<&str> = config
                .scenarios
                .iter()
                .map(|scenario| scenario.name.as_str())
                .collect();
            anyhow!(
                "unknown scenario \"{}\" (known scenarios: {})",
                args.scenario,
                known.join(", ")
            )
        })?;
    run_scenarios(
        &config,
        &cwd,
        std::slice::from_ref(&scenario),
        args.skip_cleanup,
        args.command,
    )
}

fn cmd_reset(args: ResetArgs) -> Result<i32> {
    let cwd = resolve_cwd(args.cwd)?;
    let config = load_config(args.config_path.as_deref(), &cwd)?;
    let mut manager = ScenarioManager::from_config(&config, &cwd)?;
    manager.cleanup()?;
    println!("dep-try: restored manifests in {}", display_path(&cwd, None));
    Ok(0)
}

fn cmd_config(args: ConfigArgs) -> Result<i32> {
    let cwd = resolve_cwd(args.cwd)?;
    let config = load_config(args.config_path.as_deref(), &cwd)?;
    let json = serde_json::to_string_pretty(&config).context("serialize config")?;
    println!("{json}");
    Ok(0)
}

fn run_scenarios(
    config: &Config,
    cwd: &Path,
    scenarios: &[Scenario],
    skip_cleanup: bool,
    command: Vec<String>,
) -> Result<i32> {
    let mut manager = ScenarioManager::from_config(config, cwd)?;
    tracing::debug!(adapters = ?manager.adapter_names(), "adapter set for this run");

    let cancel = CancelToken::new();
    install_interrupt_hook(&cancel);

    let runner = ProcessRunner;
    let reporter = ConsoleReporter;
    let options = EngineOptions {
        skip_cleanup,
        command_override: (!command.is_empty()).then_some(command),
    };
    let task = TryEachTask::new(config, cwd, &mut manager, &runner, &reporter, cancel);
    task.run(scenarios, &options)
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    let base = std::env::current_dir().context("resolve current dir")?;
    Ok(match cwd {
        Some(path) if path.is_absolute() => path,
        Some(path) => base.join(path),
        None => base,
    })
}

static INTERRUPT: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn handle_interrupt(_signal: libc::c_int) {
    if let Some(token) = INTERRUPT.get() {
        token.cancel();
    }
}

/// The first interrupt trips the engine's cancellation token; the scenario
/// loop stops at its next check point and cleanup still runs.
#[cfg(unix)]
fn install_interrupt_hook(cancel: &CancelToken) {
    let _ = INTERRUPT.set(cancel.clone());
    unsafe {
        libc::signal(libc::SIGINT, handle_interrupt as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_interrupt as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_interrupt_hook(_cancel: &CancelToken) {}
