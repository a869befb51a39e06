//! Workspace-aggregate adapter.
//!
//! Fans one logical adapter operation out over every workspace member
//! package, mutating each member manifest, with a single install at the
//! workspace root. Only yarn drives workspaces here.
use crate::adapters::package_json::{PackageJsonAdapter, PACKAGE_JSON};
use crate::adapters::{
    installed_version, read_manifest, DependencyAdapter, DependencyOutcome,
};
use crate::config::{PackageManager, Scenario};
use anyhow::{anyhow, bail, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct WorkspaceAdapter {
    cwd: PathBuf,
    /// Backup and install happen at the workspace root.
    root: PackageJsonAdapter,
    /// Manifest mutation happens per member package.
    members: Vec<PackageJsonAdapter>,
}

impl WorkspaceAdapter {
    pub fn new(cwd: &Path, manager_options: Vec<String>) -> Result<Self> {
        let member_dirs = workspace_member_dirs(cwd)?;
        let root = PackageJsonAdapter::new(cwd, PackageManager::Yarn, manager_options)?;
        let members = member_dirs
            .iter()
            .map(|dir| PackageJsonAdapter::new(dir, PackageManager::Yarn, Vec::new()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            cwd: cwd.to_path_buf(),
            root,
            members,
        })
    }

    fn read_back_hoisted(
        &self,
        member: &PackageJsonAdapter,
        set: &crate::config::DependencySet,
    ) -> Vec<DependencyOutcome> {
        member
            .read_back(set)
            .into_iter()
            .map(|mut outcome| {
                // yarn hoists most packages to the root node_modules.
                if outcome.version_seen.is_none() {
                    outcome.version_seen = installed_version(
                        &self
                            .cwd
                            .join("node_modules")
                            .join(&outcome.name)
                            .join(PACKAGE_JSON),
                    );
                }
                outcome
            })
            .collect()
    }
}

impl DependencyAdapter for WorkspaceAdapter {
    fn name(&self) -> &'static str {
        "workspaces"
    }

    fn setup(&mut self) -> Result<()> {
        self.root.setup()?;
        for member in &mut self.members {
            member.setup()?;
        }
        Ok(())
    }

    fn change_to(&mut self, scenario: &Scenario) -> Result<Vec<DependencyOutcome>> {
        let mut applied = Vec::with_capacity(self.members.len());
        for member in &self.members {
            applied.push(member.apply_scenario(scenario)?);
        }
        if applied.iter().all(Option::is_none) {
            return Ok(Vec::new());
        }
        self.root.run_install()?;

        let mut outcomes = Vec::new();
        for (member, set) in self.members.iter().zip(applied.iter()) {
            if let Some(set) = set {
                outcomes.extend(self.read_back_hoisted(member, set));
            }
        }
        Ok(outcomes)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.root.restore_tracked();
        for member in &self.members {
            member.restore_tracked();
        }
        if let Err(err) = self.root.run_install() {
            tracing::warn!(error = %format!("{err:#}"), "workspace reinstall after restore failed");
        }
        self.root.discard_backup();
        for member in &self.members {
            member.discard_backup();
        }
        Ok(())
    }
}

/// Expand the root manifest's `workspaces` globs to member package dirs.
/// Supported forms are `<dir>/*` and literal paths; entries without their
/// own `package.json` are skipped.
pub(crate) fn workspace_member_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let manifest = read_manifest(&root.join(PACKAGE_JSON))?;
    let patterns = workspace_patterns(&manifest)
        .ok_or_else(|| anyhow!("useWorkspaces requires a \"workspaces\" field in package.json"))?;
    if patterns.is_empty() {
        bail!("\"workspaces\" in package.json is empty");
    }

    let mut dirs = Vec::new();
    for pattern in &patterns {
        if let Some(base) = pattern.strip_suffix("/*") {
            let base_dir = root.join(base);
            let entries = match fs::read_dir(&base_dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let candidate = entry.path();
                if candidate.join(PACKAGE_JSON).is_file() {
                    dirs.push(candidate);
                }
            }
        } else {
            let candidate = root.join(pattern);
            if candidate.join(PACKAGE_JSON).is_file() {
                dirs.push(candidate);
            }
        }
    }
    dirs.sort();
    dirs.dedup();
    if dirs.is_empty() {
        bail!(
            "no workspace packages matched {:?}; each member needs its own package.json",
            patterns
        );
    }
    Ok(dirs)
}

fn workspace_patterns(manifest: &serde_json::Value) -> Option<Vec<String>> {
    let value = manifest.get("workspaces")?;
    let array = value
        .as_array()
        .or_else(|| value.get("packages").and_then(serde_json::Value::as_array))?;
    Some(
        array
            .iter()
            .filter_map(serde_json::Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}
