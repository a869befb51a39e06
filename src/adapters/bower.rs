//! Bower adapter.
//!
//! Accepts the `bower` scenario key and the legacy top-level dependency
//! maps. Changed versions are mirrored into the manifest's `resolutions`
//! section so bower pins them without interactive prompts.
use crate::adapters::{
    apply_dependency_overrides, installed_version, read_manifest, write_manifest,
    DependencyAdapter, DependencyOutcome, MirrorSpec,
};
use crate::backup::Backup;
use crate::config::{DependencySet, Scenario};
use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;

pub(crate) const BOWER_JSON: &str = "bower.json";
const BOWER_COMPONENTS: &str = "bower_components";

pub struct BowerAdapter {
    cwd: PathBuf,
    manager_options: Vec<String>,
    backup: Backup,
}

impl BowerAdapter {
    pub fn new(cwd: &Path, manager_options: Vec<String>) -> Result<Self> {
        let backup = Backup::new(cwd)?;
        Ok(Self {
            cwd: cwd.to_path_buf(),
            manager_options,
            backup,
        })
    }

    pub(crate) fn apply_scenario(&self, scenario: &Scenario) -> Result<Option<DependencySet>> {
        let Some(set) = scenario.bower_set() else {
            return Ok(None);
        };
        let manifest_path = self.cwd.join(BOWER_JSON);
        let mut manifest = if manifest_path.is_file() {
            read_manifest(&manifest_path)?
        } else {
            // A scenario may introduce bower to a project that has none yet.
            json!({ "name": project_name(&self.cwd) })
        };
        let mirror = MirrorSpec {
            path: &["resolutions"],
            explicit: set.resolutions.clone(),
        };
        apply_dependency_overrides(&mut manifest, &set, Some(&mirror))?;
        write_manifest(&manifest_path, &manifest)?;
        Ok(Some(set))
    }

    fn run_install(&self) -> Result<()> {
        let exe = self.bower_executable()?;
        tracing::info!("installing bower dependencies");
        let status = Command::new(exe)
            .arg("install")
            .arg("--config.interactive=false")
            .args(&self.manager_options)
            .current_dir(&self.cwd)
            .status()
            .context("spawn bower")?;
        if !status.success() {
            tracing::warn!(status = ?status.code(), "bower install failed");
        }
        Ok(())
    }

    /// The project-local bower binary wins over a global one.
    fn bower_executable(&self) -> Result<PathBuf> {
        let local = self.cwd.join("node_modules/.bin/bower");
        if local.is_file() {
            return Ok(local);
        }
        which::which("bower").context("bower executable not found on PATH")
    }

    fn read_back(&self, set: &DependencySet) -> Vec<DependencyOutcome> {
        let mut outcomes = Vec::new();
        for (name, expected) in set.dependencies.iter().chain(set.dev_dependencies.iter()) {
            let component = self.cwd.join(BOWER_COMPONENTS).join(name);
            // bower records the resolved version in .bower.json; fall back to
            // the package's own bower.json.
            let seen = installed_version(&component.join(".bower.json"))
                .or_else(|| installed_version(&component.join(BOWER_JSON)));
            outcomes.push(DependencyOutcome {
                name: name.clone(),
                version_expected: expected.clone(),
                version_seen: seen,
                package_manager: "bower".to_string(),
            });
        }
        outcomes
    }
}

impl DependencyAdapter for BowerAdapter {
    fn name(&self) -> &'static str {
        "bower"
    }

    fn setup(&mut self) -> Result<()> {
        self.backup.add_file(BOWER_JSON)
    }

    fn change_to(&mut self, scenario: &Scenario) -> Result<Vec<DependencyOutcome>> {
        let Some(set) = self.apply_scenario(scenario)? else {
            return Ok(Vec::new());
        };
        self.run_install()?;
        Ok(self.read_back(&set))
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Err(err) = self.backup.restore_file(BOWER_JSON) {
            tracing::warn!(error = %format!("{err:#}"), "bower restore failed");
        }
        if self.cwd.join(BOWER_JSON).is_file() {
            if let Err(err) = self.run_install() {
                tracing::warn!(error = %format!("{err:#}"), "bower reinstall after restore failed");
            }
        }
        if let Err(err) = self.backup.clean_up() {
            tracing::warn!(error = %format!("{err:#}"), "bower backup cleanup failed");
        }
        Ok(())
    }
}

fn project_name(cwd: &Path) -> String {
    cwd.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string())
}
