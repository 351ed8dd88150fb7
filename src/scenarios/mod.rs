//! Compiled-in scenario modules
//!
//! A procedural resource file names a scenario module by its file stem
//! (`deployment.ts` → `deployment`). The module's register function adds its
//! groups and leaves to the [`TreeBuilder`] being assembled.

use std::collections::BTreeMap;

use crate::scenario::TreeBuilder;
use crate::{Error, Result};

mod deployment;
mod deploymentconfig;
mod loadtest;

pub use loadtest::{load_deployment, LOAD_DEPLOYMENT_COUNT, LOAD_NAMESPACE};

/// Registers a module's nodes
pub type RegisterFn = fn(&mut TreeBuilder);

/// Scenario modules by name
#[derive(Clone, Default)]
pub struct ScenarioCatalog {
    modules: BTreeMap<String, RegisterFn>,
}

impl ScenarioCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every module shipped with the crate
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("deployment", deployment::register);
        catalog.register("deploymentconfig", deploymentconfig::register);
        catalog.register("loadtest-2", loadtest::register);
        catalog
    }

    /// Add or replace a module
    pub fn register(&mut self, name: impl Into<String>, register: RegisterFn) -> &mut Self {
        self.modules.insert(name.into(), register);
        self
    }

    /// Module names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Whether `name` is known
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Register the nodes of module `name`
    pub fn load(&self, name: &str, builder: &mut TreeBuilder) -> Result<()> {
        let register = self.modules.get(name).ok_or_else(|| Error::ScenarioNotFound {
            name: name.to_string(),
        })?;
        register(builder);
        Ok(())
    }
}

impl std::fmt::Debug for ScenarioCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}
