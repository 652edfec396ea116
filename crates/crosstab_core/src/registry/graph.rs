//! Built module graph and the construction context handed to factories.

use crate::lifecycle::SharedState;
use crate::registry::descriptor::{Module, ModuleHandle};
use crate::registry::error::{BuildError, BuildResult};
use log::debug;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) type ProviderValue = Arc<dyn Any + Send + Sync>;

/// Provider values resolved once per build.
#[derive(Default)]
pub(crate) struct ResolvedProviders {
    pub(crate) exported: BTreeMap<String, ProviderValue>,
    /// Declaring module -> provider name -> value.
    pub(crate) private: BTreeMap<String, BTreeMap<String, ProviderValue>>,
}

/// Construction-time view handed to one module factory.
pub struct BuildContext<'a> {
    pub(crate) module: &'a str,
    pub(crate) required: &'a [String],
    pub(crate) optional: &'a [String],
    pub(crate) instances: &'a BTreeMap<String, ModuleHandle>,
    pub(crate) providers: &'a ResolvedProviders,
    /// Modules whose private providers are visible, nearest first.
    pub(crate) scope: &'a [String],
    pub(crate) state: &'a SharedState,
}

impl BuildContext<'_> {
    /// Name of the module being constructed.
    pub fn module_name(&self) -> &str {
        self.module
    }

    /// Returns a required dependency instance.
    ///
    /// Required dependencies are always constructed before their dependents.
    pub fn required<T: Module>(&self, name: &str) -> BuildResult<Arc<T>> {
        if !self.required.iter().any(|dependency| dependency == name) {
            return Err(BuildError::UndeclaredDependency {
                module: self.module.to_string(),
                dependency: name.to_string(),
            });
        }
        let handle = self
            .instances
            .get(name)
            .ok_or_else(|| BuildError::MissingDependency {
                missing: name.to_string(),
                requester: self.module.to_string(),
            })?;
        downcast(handle.any.clone(), name)
    }

    /// Returns an optional dependency instance, or `None` when it is absent.
    pub fn optional<T: Module>(&self, name: &str) -> BuildResult<Option<Arc<T>>> {
        if !self.optional.iter().any(|dependency| dependency == name) {
            return Err(BuildError::UndeclaredDependency {
                module: self.module.to_string(),
                dependency: name.to_string(),
            });
        }
        match self.instances.get(name) {
            Some(handle) => downcast(handle.any.clone(), name).map(Some),
            None => Ok(None),
        }
    }

    /// Looks up a provider visible to this module.
    ///
    /// Private providers in scope shadow exported ones with the same name.
    pub fn provider<T: Any + Send + Sync>(&self, name: &str) -> BuildResult<Arc<T>> {
        let scoped = self.scope.iter().find_map(|owner| {
            self.providers
                .private
                .get(owner)
                .and_then(|values| values.get(name))
        });
        let value = scoped
            .or_else(|| self.providers.exported.get(name))
            .ok_or_else(|| BuildError::ProviderNotVisible {
                module: self.module.to_string(),
                name: name.to_string(),
            })?;
        downcast(value.clone(), name)
    }

    /// Read-only handle to the shared status container.
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }
}

fn downcast<T: Any + Send + Sync>(value: ProviderValue, name: &str) -> BuildResult<Arc<T>> {
    value.downcast::<T>().map_err(|_| BuildError::TypeMismatch {
        name: name.to_string(),
    })
}

pub(crate) struct GraphNode {
    pub(crate) required: Vec<String>,
    /// Optional dependencies that are registered in this graph.
    pub(crate) optional: Vec<String>,
    pub(crate) non_blocking: bool,
    pub(crate) handle: ModuleHandle,
}

/// Singleton module instances produced by one successful build.
pub struct ModuleGraph {
    order: Vec<String>,
    nodes: BTreeMap<String, GraphNode>,
    state: SharedState,
}

impl ModuleGraph {
    pub(crate) fn new(
        order: Vec<String>,
        nodes: BTreeMap<String, GraphNode>,
        state: SharedState,
    ) -> Self {
        Self {
            order,
            nodes,
            state,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Module names in the order their factories ran.
    pub fn construction_order(&self) -> &[String] {
        &self.order
    }

    /// Returns the typed instance registered under `name`.
    pub fn get<T: Module>(&self, name: &str) -> Option<Arc<T>> {
        let node = self.nodes.get(name)?;
        node.handle.any.clone().downcast::<T>().ok()
    }

    /// Returns the module contract for `name`.
    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.nodes.get(name).map(|node| node.handle.module.clone())
    }

    pub fn required_dependencies(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map_or(&[], |node| node.required.as_slice())
    }

    /// Registered optional dependencies of `name`; absent ones are omitted.
    pub fn optional_dependencies(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map_or(&[], |node| node.optional.as_slice())
    }

    pub fn is_non_blocking(&self, name: &str) -> bool {
        self.nodes.get(name).is_some_and(|node| node.non_blocking)
    }

    /// Modules that declare `name` as a required dependency, in construction order.
    pub fn required_dependents(&self, name: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|candidate| {
                self.nodes
                    .get(candidate.as_str())
                    .is_some_and(|node| node.required.iter().any(|dep| dep == name))
            })
            .cloned()
            .collect()
    }

    /// Shared status container for every module in the graph.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Tears modules down in reverse construction order.
    pub fn teardown(self) {
        for name in self.order.iter().rev() {
            if let Some(node) = self.nodes.get(name) {
                debug!("event=module_teardown module=registry status=ok name={name}");
                node.handle.module.teardown();
            }
        }
    }
}
