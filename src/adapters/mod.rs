//! Dependency-manager adapters.
//!
//! One adapter per package manager in use for a run. Each knows how to back
//! up, mutate, install, and restore its manager's manifest(s) for a
//! scenario's dependency set. Shared manifest-patch logic lives here as a
//! pure helper; the variants stay free of inherited behavior.
use crate::config::{Config, DependencySet, PackageManager, Scenario};
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub mod bower;
pub mod package_json;
pub mod workspace;

pub use bower::BowerAdapter;
pub use package_json::PackageJsonAdapter;
pub use workspace::WorkspaceAdapter;

/// Post-install report for one package named by a scenario's dependency set.
///
/// `version_seen` is read back from the installed package's own manifest and
/// is diagnostic only; `version_expected` is `None` when the scenario removed
/// the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyOutcome {
    pub name: String,
    pub version_expected: Option<String>,
    pub version_seen: Option<String>,
    pub package_manager: String,
}

pub trait DependencyAdapter {
    fn name(&self) -> &'static str;

    /// Back up every file this adapter's manager tracks. Succeeds even when
    /// some tracked files don't exist yet.
    fn setup(&mut self) -> Result<()>;

    /// Mutate the live manifest per the scenario's dependency set and
    /// install. A scenario without this adapter's keys is a no-op returning
    /// an empty outcome list.
    fn change_to(&mut self, scenario: &Scenario) -> Result<Vec<DependencyOutcome>>;

    /// Restore backed-up files, reinstall, and drop the backup directory.
    /// Errors are logged and swallowed so one adapter cannot block another's
    /// cleanup or the run's termination.
    fn cleanup(&mut self) -> Result<()>;
}

/// Build the adapter set a configuration actually needs: one adapter per
/// distinct manager key referenced by any scenario (legacy top-level
/// dependency maps count as bower), npm-family before bower. With
/// `useWorkspaces`, a single workspace aggregate replaces the direct
/// npm-family adapter.
pub fn adapters_for_config(
    config: &Config,
    project_root: &Path,
) -> Result<Vec<Box<dyn DependencyAdapter>>> {
    let uses_npm = config.scenarios.iter().any(Scenario::uses_npm);
    let uses_bower = config.scenarios.iter().any(Scenario::uses_bower);
    let manager = config.effective_package_manager()?;

    let mut adapters: Vec<Box<dyn DependencyAdapter>> = Vec::new();
    if config.use_workspaces {
        if manager != PackageManager::Yarn {
            bail!(
                "workspaces are only supported with yarn; set useYarn or packageManager \"yarn\""
            );
        }
        if uses_npm {
            adapters.push(Box::new(WorkspaceAdapter::new(
                project_root,
                config.manager_options.clone(),
            )?));
        }
    } else if uses_npm {
        adapters.push(Box::new(PackageJsonAdapter::new(
            project_root,
            manager,
            config.manager_options.clone(),
        )?));
    }
    if uses_bower {
        adapters.push(Box::new(BowerAdapter::new(
            project_root,
            config.manager_options.clone(),
        )?));
    }
    Ok(adapters)
}

/// Where mirrored pinned-resolution overrides land in the manifest, and the
/// explicit scenario-supplied values that win over mirrored ones.
pub(crate) struct MirrorSpec<'a> {
    pub(crate) path: &'a [&'a str],
    pub(crate) explicit: BTreeMap<String, String>,
}

/// Patch the manifest's dependency sections per the set: a version sets the
/// key, `null` deletes it (and its mirror), an unlisted package is untouched.
/// The whole mutation happens in memory; callers write the manifest once.
pub(crate) fn apply_dependency_overrides(
    manifest: &mut serde_json::Value,
    set: &DependencySet,
    mirror: Option<&MirrorSpec<'_>>,
) -> Result<()> {
    if !manifest.is_object() {
        bail!("manifest root must be a JSON object");
    }

    let sections: [(&str, &BTreeMap<String, Option<String>>); 3] = [
        ("dependencies", &set.dependencies),
        ("devDependencies", &set.dev_dependencies),
        ("peerDependencies", &set.peer_dependencies),
    ];
    for (section, entries) in sections {
        for (name, version) in entries {
            match version {
                Some(version) => {
                    ensure_object_path(manifest, &[section])?
                        .insert(name.clone(), serde_json::Value::String(version.clone()));
                }
                None => {
                    // Removal never creates the section.
                    if let Some(map) = manifest
                        .get_mut(section)
                        .and_then(serde_json::Value::as_object_mut)
                    {
                        map.remove(name);
                    }
                }
            }
        }
    }

    let Some(mirror) = mirror else {
        return Ok(());
    };
    let mut changes: BTreeMap<String, Option<String>> = BTreeMap::new();
    for entries in [&set.dependencies, &set.dev_dependencies] {
        for (name, version) in entries {
            changes.insert(name.clone(), version.clone());
        }
    }
    for (name, version) in &mirror.explicit {
        changes.insert(name.clone(), Some(version.clone()));
    }
    if changes.is_empty() {
        return Ok(());
    }
    let target = ensure_object_path(manifest, mirror.path)?;
    for (name, version) in changes {
        match version {
            Some(version) => {
                target.insert(name, serde_json::Value::String(version));
            }
            None => {
                target.remove(&name);
            }
        }
    }
    Ok(())
}

fn ensure_object_path<'a>(
    value: &'a mut serde_json::Value,
    path: &[&str],
) -> Result<&'a mut serde_json::Map<String, serde_json::Value>> {
    let mut current = value;
    for key in path {
        let serde_json::Value::Object(object) = current else {
            bail!("manifest section \"{key}\" parent is not an object");
        };
        current = object
            .entry((*key).to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
    match current {
        serde_json::Value::Object(object) => Ok(object),
        _ => Err(anyhow!("manifest section {} is not an object", path.join("."))),
    }
}

pub(crate) fn read_manifest(path: &Path) -> Result<serde_json::Value> {
    let bytes = fs::read(path).with_context(|| format!("read manifest {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse manifest {}", path.display()))
}

/// One write of the fully-computed manifest; no partial states on disk.
pub(crate) fn write_manifest(path: &Path, manifest: &serde_json::Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(manifest).context("serialize manifest")?;
    text.push('\n');
    fs::write(path, text.as_bytes()).with_context(|| format!("write manifest {}", path.display()))
}

/// Version read-back from an installed package's own manifest. Missing or
/// unparseable files report `None`; this path never fails the scenario.
pub(crate) fn installed_version(manifest_path: &Path) -> Option<String> {
    let bytes = fs::read(manifest_path).ok()?;
    let manifest: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    manifest
        .get("version")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_with(dependencies: &[(&str, Option<&str>)]) -> DependencySet {
        DependencySet {
            dependencies: dependencies
                .iter()
                .map(|(name, version)| ((*name).to_string(), version.map(str::to_string)))
                .collect(),
            ..DependencySet::default()
        }
    }

    #[test]
    fn null_removes_and_absence_preserves() {
        let mut manifest = json!({
            "dependencies": {"a": "1.0.0", "b": "2.0.0"}
        });
        let set = set_with(&[("a", None)]);
        apply_dependency_overrides(&mut manifest, &set, None).unwrap();
        assert_eq!(manifest, json!({"dependencies": {"b": "2.0.0"}}));
    }

    #[test]
    fn versions_are_set_without_touching_unlisted_packages() {
        let mut manifest = json!({
            "dependencies": {"a": "1.0.0"},
            "devDependencies": {"c": "3.0.0"}
        });
        let mut set = set_with(&[("a", Some("1.2.0")), ("new", Some("0.1.0"))]);
        set.dev_dependencies
            .insert("d".to_string(), Some("4.0.0".to_string()));
        apply_dependency_overrides(&mut manifest, &set, None).unwrap();
        assert_eq!(
            manifest,
            json!({
                "dependencies": {"a": "1.2.0", "new": "0.1.0"},
                "devDependencies": {"c": "3.0.0", "d": "4.0.0"}
            })
        );
    }

    #[test]
    fn removal_does_not_create_missing_sections() {
        let mut manifest = json!({"name": "app"});
        let set = set_with(&[("gone", None)]);
        apply_dependency_overrides(&mut manifest, &set, None).unwrap();
        assert_eq!(manifest, json!({"name": "app"}));
    }

    #[test]
    fn mirrored_resolutions_follow_changed_versions() {
        let mut manifest = json!({
            "dependencies": {"ember": "1.13.5"},
            "resolutions": {}
        });
        let set = set_with(&[("ember", Some("components/ember#beta"))]);
        let mirror = MirrorSpec {
            path: &["resolutions"],
            explicit: BTreeMap::new(),
        };
        apply_dependency_overrides(&mut manifest, &set, Some(&mirror)).unwrap();
        assert_eq!(
            manifest["resolutions"]["ember"],
            json!("components/ember#beta")
        );
    }

    #[test]
    fn explicit_resolution_wins_over_mirrored_version() {
        let mut manifest = json!({
            "dependencies": {"ember": "1.13.5"},
            "resolutions": {}
        });
        let set = set_with(&[("ember", Some("components/ember#canary"))]);
        let mirror = MirrorSpec {
            path: &["resolutions"],
            explicit: [("ember".to_string(), "canary".to_string())].into(),
        };
        apply_dependency_overrides(&mut manifest, &set, Some(&mirror)).unwrap();
        assert_eq!(
            manifest["dependencies"]["ember"],
            json!("components/ember#canary")
        );
        assert_eq!(manifest["resolutions"]["ember"], json!("canary"));
    }

    #[test]
    fn removal_also_clears_the_mirror() {
        let mut manifest = json!({
            "dependencies": {"ember": "1.13.5"},
            "resolutions": {"ember": "1.13.5", "other": "2.0.0"}
        });
        let set = set_with(&[("ember", None)]);
        let mirror = MirrorSpec {
            path: &["resolutions"],
            explicit: BTreeMap::new(),
        };
        apply_dependency_overrides(&mut manifest, &set, Some(&mirror)).unwrap();
        assert_eq!(manifest["dependencies"], json!({}));
        assert_eq!(manifest["resolutions"], json!({"other": "2.0.0"}));
    }

    #[test]
    fn nested_mirror_path_is_created_on_demand() {
        let mut manifest = json!({"dependencies": {"lodash": "4.0.0"}});
        let set = set_with(&[("lodash", Some("4.17.21"))]);
        let mirror = MirrorSpec {
            path: &["pnpm", "overrides"],
            explicit: BTreeMap::new(),
        };
        apply_dependency_overrides(&mut manifest, &set, Some(&mirror)).unwrap();
        assert_eq!(manifest["pnpm"]["overrides"]["lodash"], json!("4.17.21"));
    }

    #[test]
    fn factory_selects_adapters_from_scenario_keys() {
        let project = tempfile::tempdir().expect("tempdir");
        let bower_only: Config = serde_json::from_str(
            r#"{"scenarios":[{"name":"a","bower":{"dependencies":{"ember":"1.13.0"}}}]}"#,
        )
        .unwrap();
        let adapters = adapters_for_config(&bower_only, project.path()).unwrap();
        assert_eq!(
            adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            vec!["bower"]
        );

        let both: Config = serde_json::from_str(
            r#"{"scenarios":[
                {"name":"a","npm":{"dependencies":{"lodash":"4.0.0"}}},
                {"name":"b","bower":{"dependencies":{"ember":"1.13.0"}}}
            ]}"#,
        )
        .unwrap();
        let adapters = adapters_for_config(&both, project.path()).unwrap();
        assert_eq!(
            adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            vec!["npm", "bower"]
        );
    }

    #[test]
    fn factory_rejects_workspaces_without_yarn() {
        let project = tempfile::tempdir().expect("tempdir");
        let config: Config = serde_json::from_str(
            r#"{"scenarios":[{"name":"a","npm":{}}],"useWorkspaces":true}"#,
        )
        .unwrap();
        let err = adapters_for_config(&config, project.path()).err().unwrap();
        assert!(err.to_string().contains("yarn"));
    }

    #[test]
    fn factory_builds_a_single_workspace_aggregate_for_yarn_workspaces() {
        let project = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            project.path().join("package.json"),
            r#"{"name":"root","workspaces":["packages/*"]}"#,
        )
        .unwrap();
        let member = project.path().join("packages/app");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::write(member.join("package.json"), r#"{"name":"app"}"#).unwrap();

        let config: Config = serde_json::from_str(
            r#"{"scenarios":[{"name":"a","npm":{}}],"useWorkspaces":true,"useYarn":true}"#,
        )
        .unwrap();
        let adapters = adapters_for_config(&config, project.path()).unwrap();
        assert_eq!(
            adapters.iter().map(|a| a.name()).collect::<Vec<_>>(),
            vec!["workspaces"]
        );
    }
}
