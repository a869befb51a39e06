//! Copy-aside backup store for tracked project files.
//!
//! Backups live in a directory keyed deterministically by the project path,
//! so repeated runs against the same project reuse (and clean) the same
//! location, and a crashed run's copies stay inspectable on disk.
use crate::util::sha256_hex;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Backup {
    cwd: PathBuf,
    dir: PathBuf,
}

impl Backup {
    pub fn new(cwd: &Path) -> Result<Self> {
        let absolute = if cwd.is_absolute() {
            cwd.to_path_buf()
        } else {
            env::current_dir().context("resolve current dir")?.join(cwd)
        };
        let dir = backup_dir_for(&absolute);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(Self { cwd: absolute, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `cwd/rel` aside, preserving the relative path. A missing source
    /// is a no-op: a scenario may introduce the file (e.g. a lockfile) later.
    pub fn add_file(&self, rel: &str) -> Result<()> {
        let source = self.cwd.join(rel);
        if !source.is_file() {
            return Ok(());
        }
        let dest = self.dir.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(&source, &dest).with_context(|| format!("back up {}", source.display()))?;
        Ok(())
    }

    /// Per-file `add_file` over a set; the copies are independent and carry
    /// no inter-file invariant.
    pub fn add_files<'a, I>(&self, rels: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for rel in rels {
            self.add_file(rel)?;
        }
        Ok(())
    }

    pub fn has_file(&self, rel: &str) -> bool {
        self.dir.join(rel).is_file()
    }

    pub fn path_for_file(&self, rel: &str) -> PathBuf {
        self.dir.join(rel)
    }

    /// Copy the backup copy back over the live file. A file that was never
    /// backed up (it did not exist pre-run) is a no-op: restoring "nothing"
    /// must not create a spurious empty file.
    pub fn restore_file(&self, rel: &str) -> Result<()> {
        let source = self.dir.join(rel);
        if !source.is_file() {
            return Ok(());
        }
        let dest = self.cwd.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::copy(&source, &dest).with_context(|| format!("restore {}", dest.display()))?;
        Ok(())
    }

    pub fn restore_files<'a, I>(&self, rels: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for rel in rels {
            self.restore_file(rel)?;
        }
        Ok(())
    }

    /// Remove the backup directory. Idempotent: a missing directory is fine.
    pub fn clean_up(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.dir).with_context(|| format!("remove {}", self.dir.display()))?;
        Ok(())
    }
}

/// Deterministic backup location for a project path, under the user cache
/// dir (or the system temp dir when no cache dir is available).
fn backup_dir_for(project: &Path) -> PathBuf {
    let key = sha256_hex(project.display().to_string().as_bytes());
    backup_root().join(format!("dep-try-{}", &key[..16]))
}

fn backup_root() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(env::temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_restores_bytes() {
        let project = tempfile::tempdir().expect("tempdir");
        let manifest = project.path().join("package.json");
        fs::write(&manifest, b"{\"name\":\"app\"}\n").unwrap();

        let backup = Backup::new(project.path()).unwrap();
        backup.add_file("package.json").unwrap();
        assert!(backup.has_file("package.json"));

        fs::write(&manifest, b"{\"name\":\"mutated\"}\n").unwrap();
        backup.restore_file("package.json").unwrap();
        assert_eq!(fs::read(&manifest).unwrap(), b"{\"name\":\"app\"}\n");

        backup.clean_up().unwrap();
        assert!(!backup.dir().exists());
    }

    #[test]
    fn missing_source_and_missing_backup_are_no_ops() {
        let project = tempfile::tempdir().expect("tempdir");
        let backup = Backup::new(project.path()).unwrap();

        backup.add_file("yarn.lock").unwrap();
        assert!(!backup.has_file("yarn.lock"));

        backup.restore_file("yarn.lock").unwrap();
        assert!(!project.path().join("yarn.lock").exists());

        backup.clean_up().unwrap();
    }

    #[test]
    fn clean_up_is_idempotent() {
        let project = tempfile::tempdir().expect("tempdir");
        let backup = Backup::new(project.path()).unwrap();
        backup.clean_up().unwrap();
        backup.clean_up().unwrap();
    }

    #[test]
    fn backup_location_is_deterministic_per_project() {
        let project = tempfile::tempdir().expect("tempdir");
        let first = Backup::new(project.path()).unwrap();
        let second = Backup::new(project.path()).unwrap();
        assert_eq!(first.dir(), second.dir());

        let other = tempfile::tempdir().expect("tempdir");
        let third = Backup::new(other.path()).unwrap();
        assert_ne!(first.dir(), third.dir());

        first.clean_up().unwrap();
        third.clean_up().unwrap();
    }

    #[test]
    fn nested_relative_paths_survive() {
        let project = tempfile::tempdir().expect("tempdir");
        let nested = project.path().join("packages/app");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("package.json"), b"{}").unwrap();

        let backup = Backup::new(project.path()).unwrap();
        backup.add_file("packages/app/package.json").unwrap();
        fs::remove_file(nested.join("package.json")).unwrap();

        backup.restore_file("packages/app/package.json").unwrap();
        assert_eq!(fs::read(nested.join("package.json")).unwrap(), b"{}");
        backup.clean_up().unwrap();
    }
}
