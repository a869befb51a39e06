//! Drives the adapter set for a run uniformly.
use crate::adapters::{adapters_for_config, DependencyAdapter, DependencyOutcome};
use crate::config::{Config, Scenario};
use anyhow::Result;
use std::path::Path;

pub struct ScenarioManager {
    adapters: Vec<Box<dyn DependencyAdapter>>,
}

impl ScenarioManager {
    pub fn new(adapters: Vec<Box<dyn DependencyAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn from_config(config: &Config, project_root: &Path) -> Result<Self> {
        Ok(Self::new(adapters_for_config(config, project_root)?))
    }

    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|adapter| adapter.name()).collect()
    }

    /// Back up every adapter's tracked files. Fails fast: nothing
    /// destructive has happened yet.
    pub fn setup(&mut self) -> Result<()> {
        for adapter in &mut self.adapters {
            adapter.setup()?;
        }
        Ok(())
    }

    /// Apply the scenario through every adapter; each decides for itself
    /// whether it has relevant keys. Outcomes concatenate in adapter order,
    /// preserving within-adapter order.
    pub fn change_to(&mut self, scenario: &Scenario) -> Result<Vec<DependencyOutcome>> {
        let mut outcomes = Vec::new();
        for adapter in &mut self.adapters {
            outcomes.extend(adapter.change_to(scenario)?);
        }
        Ok(outcomes)
    }

    /// Drive every adapter's cleanup to completion. Adapters swallow and log
    /// their own errors, so one failure never blocks the rest.
    pub fn cleanup(&mut self) -> Result<()> {
        for adapter in &mut self.adapters {
            if let Err(err) = adapter.cleanup() {
                tracing::warn!(
                    adapter = adapter.name(),
                    error = %format!("{err:#}"),
                    "adapter cleanup failed"
                );
            }
        }
        Ok(())
    }
}
