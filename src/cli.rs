//! CLI argument parsing for the scenario workflow.
//!
//! The CLI is intentionally thin: it parses flags and routes to the engine
//! without embedding policy, so the same core logic can be reused elsewhere.
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
///
/// Keeping a single `RootArgs` type makes command routing obvious and avoids
/// hidden defaults in subcommand constructors.
#[derive(Parser, Debug)]
#[command(
    name = "dep-try",
    version,
    about = "Run a project's test command across dependency scenarios",
    after_help = "Commands:\n  each                 Run every configured scenario in order\n  one <scenario>       Run exactly one named scenario\n  reset                Restore manifests and reinstall from a prior run's backups\n  config               Print the resolved configuration\n\nExamples:\n  dep-try each\n  dep-try each --skip-cleanup -- yarn test\n  dep-try one ember-canary\n  dep-try reset\n  dep-try config --config-path configs/try.json",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level workflow commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Each(EachArgs),
    One(OneArgs),
    Reset(ResetArgs),
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
#[command(about = "Run every configured scenario in order")]
pub struct EachArgs {
    /// Project root containing the dependency manifests
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file (defaults to dep-try.json in the project root)
    #[arg(long, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Leave mutated dependency state in place after the run
    #[arg(long)]
    pub skip_cleanup: bool,

    /// Command to run per scenario, overriding configured commands
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Run exactly one named scenario")]
pub struct OneArgs {
    /// Name of the scenario to run
    pub scenario: String,

    /// Project root containing the dependency manifests
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file (defaults to dep-try.json in the project root)
    #[arg(long, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Leave mutated dependency state in place after the run
    #[arg(long)]
    pub skip_cleanup: bool,

    /// Command to run for the scenario, overriding configured commands
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Restore manifests and reinstall from a prior run's backups")]
pub struct ResetArgs {
    /// Project root containing the dependency manifests
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file (defaults to dep-try.json in the project root)
    #[arg(long, value_name = "PATH")]
    pub config_path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Print the resolved configuration as JSON")]
pub struct ConfigArgs {
    /// Project root containing the dependency manifests
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Configuration file (defaults to dep-try.json in the project root)
    #[arg(long, value_name = "PATH")]
    pub config_path: Option<PathBuf>,
}
