//! Scenario configuration: shapes, loading, and validation.
//!
//! The configuration is loaded once per run and treated as immutable. The
//! engine consumes the parsed shape only; file format concerns stop here.
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "dep-try.json";

/// Package managers the generic manifest adapter can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn executable(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable())
    }
}

/// Kill the test command after `seconds` and map the outcome per
/// `treat_as_success` instead of waiting indefinitely.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTimeoutConfig {
    pub seconds: f64,
    #[serde(default)]
    pub treat_as_success: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    /// Global test command; a scenario's own `command` takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Legacy alias for `packageManager: "yarn"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_yarn: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<PackageManager>,
    #[serde(default)]
    pub use_workspaces: bool,
    /// Extra arguments appended to every install invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manager_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout: Option<CommandTimeoutConfig>,
}

/// One named dependency variant. Which manager keys are present determines
/// which adapters act for this scenario.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub allowed_to_fail: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra environment for the test command, this scenario only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub npm: Option<DependencySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bower: Option<DependencySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pnpm: Option<PnpmSection>,
    /// Legacy top-level dependency maps, treated as the bower set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_dependencies: Option<BTreeMap<String, Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolutions: Option<BTreeMap<String, String>>,
}

/// Per-manager package name -> version mapping carried by a scenario.
///
/// A `null` version removes the package from the manifest section; a package
/// absent from the map is left untouched. The two must never be conflated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySet {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, Option<String>>,
    /// Explicit pinned-resolution overrides; these win over mirrored versions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resolutions: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
}

impl DependencySet {
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
            && self.dev_dependencies.is_empty()
            && self.peer_dependencies.is_empty()
            && self.resolutions.is_empty()
            && self.overrides.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PnpmSection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, String>,
}

impl Scenario {
    pub fn uses_npm(&self) -> bool {
        self.npm.is_some()
    }

    pub fn uses_bower(&self) -> bool {
        self.bower.is_some()
            || self.dependencies.is_some()
            || self.dev_dependencies.is_some()
            || self.resolutions.is_some()
    }

    /// The effective bower dependency set: the `bower` key when present,
    /// otherwise the legacy top-level maps.
    pub fn bower_set(&self) -> Option<DependencySet> {
        if let Some(set) = &self.bower {
            return Some(set.clone());
        }
        if !self.uses_bower() {
            return None;
        }
        Some(DependencySet {
            dependencies: self.dependencies.clone().unwrap_or_default(),
            dev_dependencies: self.dev_dependencies.clone().unwrap_or_default(),
            peer_dependencies: BTreeMap::new(),
            resolutions: self.resolutions.clone().unwrap_or_default(),
            overrides: BTreeMap::new(),
        })
    }
}

impl Config {
    /// Resolve the npm-family manager, honoring the legacy `useYarn` alias.
    pub fn effective_package_manager(&self) -> Result<PackageManager> {
        match (self.package_manager, self.use_yarn) {
            (Some(manager), Some(true)) if manager != PackageManager::Yarn => Err(anyhow!(
                "useYarn conflicts with packageManager \"{manager}\"; drop one of the two"
            )),
            (Some(manager), _) => Ok(manager),
            (None, Some(true)) => Ok(PackageManager::Yarn),
            (None, _) => Ok(PackageManager::Npm),
        }
    }

    pub fn scenario_named(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.name == name)
    }
}

pub fn load_config(config_path: Option<&Path>, cwd: &Path) -> Result<Config> {
    let path = resolve_config_path(config_path, cwd);
    let bytes = fs::read(&path).with_context(|| format!("read config {}", path.display()))?;
    let config: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn resolve_config_path(config_path: Option<&Path>, cwd: &Path) -> PathBuf {
    match config_path {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => cwd.join(path),
        None => cwd.join(DEFAULT_CONFIG_FILE),
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.scenarios.is_empty() {
        bail!("config must declare at least one scenario");
    }
    let mut seen = BTreeSet::new();
    for scenario in &config.scenarios {
        if scenario.name.trim().is_empty() {
            bail!("scenario names must be non-empty");
        }
        if !seen.insert(scenario.name.as_str()) {
            bail!("duplicate scenario name \"{}\"", scenario.name);
        }
    }
    // Surfaces the useYarn/packageManager conflict before any mutation.
    let _ = config.effective_package_manager()?;
    Ok(())
}
