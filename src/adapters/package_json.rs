//! Generic manifest adapter for the npm family (npm, yarn, pnpm).
//!
//! The three managers share the manifest dialect; they differ in install
//! argv, hygiene flags, lockfile names, and (for pnpm) a resolution-mode
//! precondition that must hold before anything is installed.
use crate::adapters::{
    apply_dependency_overrides, installed_version, read_manifest, write_manifest,
    DependencyAdapter, DependencyOutcome, MirrorSpec,
};
use crate::backup::Backup;
use crate::config::{DependencySet, PackageManager, Scenario};
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

pub(crate) const PACKAGE_JSON: &str = "package.json";

pub struct PackageJsonAdapter {
    cwd: PathBuf,
    manager: PackageManager,
    manager_options: Vec<String>,
    backup: Backup,
}

impl PackageJsonAdapter {
    pub fn new(
        cwd: &Path,
        manager: PackageManager,
        manager_options: Vec<String>,
    ) -> Result<Self> {
        let backup = Backup::new(cwd)?;
        Ok(Self {
            cwd: cwd.to_path_buf(),
            manager,
            manager_options,
            backup,
        })
    }

    fn tracked_files(&self) -> &'static [&'static str] {
        match self.manager {
            PackageManager::Npm => &[PACKAGE_JSON, "package-lock.json", "npm-shrinkwrap.json"],
            PackageManager::Yarn => &[PACKAGE_JSON, "yarn.lock"],
            PackageManager::Pnpm => &[PACKAGE_JSON, "pnpm-lock.yaml"],
        }
    }

    fn install_args(&self) -> Vec<String> {
        let base: &[&str] = match self.manager {
            PackageManager::Npm => &["install", "--no-package-lock", "--ignore-scripts"],
            PackageManager::Yarn => &["install", "--no-lockfile", "--ignore-engines"],
            PackageManager::Pnpm => &["install", "--no-lockfile"],
        };
        base.iter()
            .map(|arg| (*arg).to_string())
            .chain(self.manager_options.iter().cloned())
            .collect()
    }

    /// Mutate the live manifest for the scenario's npm set. Returns the set
    /// that was applied, or `None` when the scenario carries no npm key (in
    /// which case the manifest is left byte-identical).
    pub(crate) fn apply_scenario(&self, scenario: &Scenario) -> Result<Option<DependencySet>> {
        let Some(set) = &scenario.npm else {
            return Ok(None);
        };
        let manifest_path = self.cwd.join(PACKAGE_JSON);
        let mut manifest = read_manifest(&manifest_path)?;
        let mirror = self.mirror_spec(scenario, set);
        apply_dependency_overrides(&mut manifest, set, mirror.as_ref())?;
        write_manifest(&manifest_path, &manifest)?;
        Ok(Some(set.clone()))
    }

    fn mirror_spec(&self, scenario: &Scenario, set: &DependencySet) -> Option<MirrorSpec<'static>> {
        match self.manager {
            PackageManager::Npm => None,
            PackageManager::Yarn => Some(MirrorSpec {
                path: &["resolutions"],
                explicit: set.resolutions.clone(),
            }),
            PackageManager::Pnpm => {
                let mut explicit = set.overrides.clone();
                if let Some(pnpm) = &scenario.pnpm {
                    explicit.extend(pnpm.overrides.clone());
                }
                Some(MirrorSpec {
                    path: &["pnpm", "overrides"],
                    explicit,
                })
            }
        }
    }

    pub(crate) fn run_install(&self) -> Result<()> {
        let exe = which::which(self.manager.executable())
            .with_context(|| format!("{} executable not found on PATH", self.manager))?;
        if self.manager == PackageManager::Pnpm {
            assert_safe_resolution_mode(&exe, &self.cwd)?;
        }
        let args = self.install_args();
        tracing::info!(manager = %self.manager, "installing dependencies");
        let status = Command::new(exe)
            .args(args)
            .current_dir(&self.cwd)
            .status()
            .with_context(|| format!("spawn {}", self.manager))?;
        if !status.success() {
            // The scenario verdict stays with the test command; the failed
            // install shows up through the version read-back.
            tracing::warn!(
                manager = %self.manager,
                status = ?status.code(),
                "install command failed"
            );
        }
        Ok(())
    }

    pub(crate) fn read_back(&self, set: &DependencySet) -> Vec<DependencyOutcome> {
        let mut outcomes = Vec::new();
        for (name, expected) in set.dependencies.iter().chain(set.dev_dependencies.iter()) {
            let manifest = self
                .cwd
                .join("node_modules")
                .join(name)
                .join(PACKAGE_JSON);
            outcomes.push(DependencyOutcome {
                name: name.clone(),
                version_expected: expected.clone(),
                version_seen: installed_version(&manifest),
                package_manager: self.manager.executable().to_string(),
            });
        }
        outcomes
    }

    pub(crate) fn restore_tracked(&self) {
        if let Err(err) = self
            .backup
            .restore_files(self.tracked_files().iter().copied())
        {
            tracing::warn!(manager = %self.manager, error = %format!("{err:#}"), "restore failed");
        }
    }

    pub(crate) fn discard_backup(&self) {
        if let Err(err) = self.backup.clean_up() {
            tracing::warn!(manager = %self.manager, error = %format!("{err:#}"), "backup cleanup failed");
        }
    }
}

impl DependencyAdapter for PackageJsonAdapter {
    fn name(&self) -> &'static str {
        self.manager.executable()
    }

    fn setup(&mut self) -> Result<()> {
        if self.manager == PackageManager::Pnpm {
            let exe = which::which(self.manager.executable())
                .with_context(|| format!("{} executable not found on PATH", self.manager))?;
            assert_safe_resolution_mode(&exe, &self.cwd)?;
        }
        self.backup.add_files(self.tracked_files().iter().copied())
    }

    fn change_to(&mut self, scenario: &Scenario) -> Result<Vec<DependencyOutcome>> {
        let Some(set) = self.apply_scenario(scenario)? else {
            return Ok(Vec::new());
        };
        self.run_install()?;
        Ok(self.read_back(&set))
    }

    fn cleanup(&mut self) -> Result<()> {
        self.restore_tracked();
        if let Err(err) = self.run_install() {
            tracing::warn!(manager = %self.manager, error = %format!("{err:#}"), "reinstall after restore failed");
        }
        self.discard_backup();
        Ok(())
    }
}

/// pnpm 8.0 through 8.6 changed the default `resolution-mode` to
/// `lowest-direct`, which installs the lowest versions matching the mutated
/// ranges instead of the highest. Refuse to install under that default.
fn assert_safe_resolution_mode(exe: &Path, cwd: &Path) -> Result<()> {
    let version = pnpm_version(exe, cwd)?;
    if !resolution_mode_inverted(version) {
        return Ok(());
    }
    let mode = pnpm_resolution_mode(exe, cwd)?;
    if mode == "highest" {
        return Ok(());
    }
    bail!(
        "pnpm {}.{}.{} defaults resolution-mode to lowest-direct, which would install the wrong \
         versions for this run; run `pnpm config set resolution-mode highest` or upgrade pnpm to 8.7.0+",
        version.0,
        version.1,
        version.2
    )
}

fn resolution_mode_inverted(version: (u64, u64, u64)) -> bool {
    version.0 == 8 && version.1 < 7
}

fn pnpm_version(exe: &Path, cwd: &Path) -> Result<(u64, u64, u64)> {
    let output = Command::new(exe)
        .arg("--version")
        .current_dir(cwd)
        .output()
        .context("query pnpm version")?;
    if !output.status.success() {
        bail!("pnpm --version failed");
    }
    let text = String::from_utf8_lossy(&output.stdout);
    parse_version(text.trim())
}

fn pnpm_resolution_mode(exe: &Path, cwd: &Path) -> Result<String> {
    let output = Command::new(exe)
        .args(["config", "get", "resolution-mode"])
        .current_dir(cwd)
        .output()
        .context("query pnpm resolution-mode")?;
    if !output.status.success() {
        bail!("pnpm config get resolution-mode failed");
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("static version pattern"))
}

fn parse_version(text: &str) -> Result<(u64, u64, u64)> {
    let captures = version_pattern()
        .captures(text)
        .ok_or_else(|| anyhow!("unrecognized pnpm version {text:?}"))?;
    let part = |idx: usize| -> Result<u64> {
        captures[idx]
            .parse::<u64>()
            .with_context(|| format!("parse pnpm version {text:?}"))
    };
    Ok((part(1)?, part(2)?, part(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn scenario_with_npm(json: serde_json::Value) -> Scenario {
        serde_json::from_value(json).expect("scenario")
    }

    fn write_package_json(dir: &Path, value: &serde_json::Value) {
        let mut text = serde_json::to_string_pretty(value).unwrap();
        text.push('\n');
        fs::write(dir.join(PACKAGE_JSON), text).unwrap();
    }

    #[test]
    fn version_parsing_and_hazard_range() {
        assert_eq!(parse_version("8.6.12").unwrap(), (8, 6, 12));
        assert_eq!(parse_version("9.0.0\n").unwrap(), (9, 0, 0));
        assert!(parse_version("nope").is_err());

        assert!(resolution_mode_inverted((8, 0, 0)));
        assert!(resolution_mode_inverted((8, 6, 99)));
        assert!(!resolution_mode_inverted((8, 7, 0)));
        assert!(!resolution_mode_inverted((7, 33, 0)));
        assert!(!resolution_mode_inverted((9, 1, 1)));
    }

    #[test]
    fn scenario_without_npm_key_leaves_manifest_byte_identical() {
        let project = tempfile::tempdir().expect("tempdir");
        write_package_json(project.path(), &json!({"dependencies": {"a": "1.0.0"}}));
        let before = fs::read(project.path().join(PACKAGE_JSON)).unwrap();

        let adapter = PackageJsonAdapter::new(
            project.path(),
            PackageManager::Npm,
            Vec::new(),
        )
        .unwrap();
        let applied = adapter
            .apply_scenario(&scenario_with_npm(json!({"name": "plain"})))
            .unwrap();
        assert!(applied.is_none());
        assert_eq!(fs::read(project.path().join(PACKAGE_JSON)).unwrap(), before);
        adapter.discard_backup();
    }

    #[test]
    fn yarn_mirrors_into_resolutions_with_explicit_wins() {
        let project = tempfile::tempdir().expect("tempdir");
        write_package_json(
            project.path(),
            &json!({"dependencies": {"ember": "1.13.5", "lodash": "4.0.0"}}),
        );
        let adapter = PackageJsonAdapter::new(
            project.path(),
            PackageManager::Yarn,
            Vec::new(),
        )
        .unwrap();
        let scenario = scenario_with_npm(json!({
            "name": "canary",
            "npm": {
                "dependencies": {"ember": "components/ember#canary", "lodash": "4.17.21"},
                "resolutions": {"ember": "canary"}
            }
        }));
        adapter.apply_scenario(&scenario).unwrap();

        let manifest = read_manifest(&project.path().join(PACKAGE_JSON)).unwrap();
        assert_eq!(manifest["resolutions"]["ember"], json!("canary"));
        assert_eq!(manifest["resolutions"]["lodash"], json!("4.17.21"));
        assert_eq!(
            manifest["dependencies"]["ember"],
            json!("components/ember#canary")
        );
        adapter.discard_backup();
    }

    #[test]
    fn pnpm_mirrors_into_pnpm_overrides() {
        let project = tempfile::tempdir().expect("tempdir");
        write_package_json(project.path(), &json!({"dependencies": {"lodash": "4.0.0"}}));
        let adapter = PackageJsonAdapter::new(
            project.path(),
            PackageManager::Pnpm,
            Vec::new(),
        )
        .unwrap();
        let scenario = scenario_with_npm(json!({
            "name": "pinned",
            "npm": {"dependencies": {"lodash": "4.17.21"}},
            "pnpm": {"overrides": {"lodash": "npm:lodash@4.17.21"}}
        }));
        adapter.apply_scenario(&scenario).unwrap();

        let manifest = read_manifest(&project.path().join(PACKAGE_JSON)).unwrap();
        assert_eq!(
            manifest["pnpm"]["overrides"]["lodash"],
            json!("npm:lodash@4.17.21")
        );
        assert_eq!(manifest["dependencies"]["lodash"], json!("4.17.21"));
        adapter.discard_backup();
    }

    #[test]
    fn later_scenarios_observe_the_previous_mutation_not_the_backup() {
        let project = tempfile::tempdir().expect("tempdir");
        write_package_json(project.path(), &json!({"dependencies": {"a": "1.0.0"}}));
        let adapter = PackageJsonAdapter::new(
            project.path(),
            PackageManager::Npm,
            Vec::new(),
        )
        .unwrap();

        adapter
            .apply_scenario(&scenario_with_npm(json!({
                "name": "first",
                "npm": {"dependencies": {"a": "2.0.0"}}
            })))
            .unwrap();
        adapter
            .apply_scenario(&scenario_with_npm(json!({
                "name": "second",
                "npm": {"dependencies": {"b": "3.0.0"}}
            })))
            .unwrap();

        let manifest = read_manifest(&project.path().join(PACKAGE_JSON)).unwrap();
        // The second mutation layered on the first, not on the original.
        assert_eq!(manifest["dependencies"]["a"], json!("2.0.0"));
        assert_eq!(manifest["dependencies"]["b"], json!("3.0.0"));
        adapter.discard_backup();
    }

    #[test]
    fn read_back_reports_missing_packages_as_unseen() {
        let project = tempfile::tempdir().expect("tempdir");
        let installed = project.path().join("node_modules/lodash");
        fs::create_dir_all(&installed).unwrap();
        fs::write(
            installed.join(PACKAGE_JSON),
            r#"{"name":"lodash","version":"4.17.21"}"#,
        )
        .unwrap();

        let adapter = PackageJsonAdapter::new(
            project.path(),
            PackageManager::Npm,
            Vec::new(),
        )
        .unwrap();
        let set: DependencySet = serde_json::from_value(json!({
            "dependencies": {"lodash": "4.17.21", "left-pad": "1.3.0"}
        }))
        .unwrap();
        let outcomes = adapter.read_back(&set);
        assert_eq!(outcomes.len(), 2);
        let lodash = outcomes.iter().find(|o| o.name == "lodash").unwrap();
        assert_eq!(lodash.version_seen.as_deref(), Some("4.17.21"));
        let left_pad = outcomes.iter().find(|o| o.name == "left-pad").unwrap();
        assert_eq!(left_pad.version_seen, None);
        assert_eq!(left_pad.package_manager, "npm");
        adapter.discard_backup();
    }
}
