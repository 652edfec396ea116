//! Module and provider declarations.
//!
//! # Responsibility
//! - Describe one module: name, dependency lists and factory.
//! - Describe named providers and their visibility.
//!
//! # Invariants
//! - Descriptors and providers are immutable once registered.
//! - Names match `^[a-z][a-z0-9_.-]*$`.

use crate::lifecycle::InitHandle;
use crate::registry::error::{BuildError, BuildResult};
use crate::registry::graph::BuildContext;
use once_cell::sync::Lazy;
use regex::Regex;
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.-]*$").expect("valid module name regex"));

/// Runtime contract implemented by every module in the graph.
pub trait Module: Send + Sync + 'static {
    /// Starts one initialization attempt.
    ///
    /// `handle` must be consumed exactly once, either inline or from a task
    /// the module spawns. Dropping it leaves the module `initializing`.
    fn initialize(&self, handle: InitHandle);

    /// Clears transient state before the next initialization attempt.
    fn reset(&self) {}

    /// Releases resources when the graph is torn down.
    fn teardown(&self) {}
}

/// Type-erased module instance stored by the built graph.
#[derive(Clone)]
pub(crate) struct ModuleHandle {
    pub(crate) module: Arc<dyn Module>,
    pub(crate) any: Arc<dyn Any + Send + Sync>,
}

pub(crate) type ModuleFactory =
    Arc<dyn Fn(&BuildContext<'_>) -> BuildResult<ModuleHandle> + Send + Sync>;

/// Static declaration of one module.
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    required: Vec<String>,
    optional: Vec<String>,
    non_blocking: bool,
    factory: ModuleFactory,
}

impl ModuleDescriptor {
    /// Creates a descriptor whose factory builds `T` from a [`BuildContext`].
    pub fn new<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Module,
        F: Fn(&BuildContext<'_>) -> BuildResult<T> + Send + Sync + 'static,
    {
        let factory: ModuleFactory = Arc::new(move |ctx| {
            let instance = Arc::new(factory(ctx)?);
            let module: Arc<dyn Module> = instance.clone();
            Ok(ModuleHandle {
                module,
                any: instance,
            })
        });

        Self {
            name: name.into().trim().to_string(),
            required: Vec::new(),
            optional: Vec::new(),
            non_blocking: false,
            factory,
        }
    }

    /// Adds a required dependency.
    pub fn requires(mut self, dependency: impl Into<String>) -> Self {
        self.required.push(dependency.into().trim().to_string());
        self
    }

    /// Adds an optional dependency.
    pub fn optionally(mut self, dependency: impl Into<String>) -> Self {
        self.optional.push(dependency.into().trim().to_string());
        self
    }

    /// Declares that this module never gates its optional dependents.
    pub fn non_blocking(mut self) -> Self {
        self.non_blocking = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub(crate) fn factory(&self) -> &ModuleFactory {
        &self.factory
    }

    /// Validates declaration-level invariants.
    pub(crate) fn validate(&self) -> BuildResult<()> {
        if !is_valid_name(&self.name) {
            return Err(BuildError::InvalidName(self.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for dependency in self.required.iter().chain(self.optional.iter()) {
            if !is_valid_name(dependency) {
                return Err(BuildError::InvalidName(dependency.clone()));
            }
            if !seen.insert(dependency.as_str()) {
                return Err(BuildError::DuplicateDependency {
                    module: self.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("non_blocking", &self.non_blocking)
            .finish_non_exhaustive()
    }
}

/// Provider visibility scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible to the declaring module and modules that depend on it.
    Private,
    /// Visible to every module in the graph.
    Exported,
}

type ProviderValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
enum ProviderSource {
    Value(ProviderValue),
    Factory(Arc<dyn Fn() -> ProviderValue + Send + Sync>),
}

/// Named value or factory registered alongside a module.
#[derive(Clone)]
pub struct Provider {
    name: String,
    visibility: Visibility,
    source: ProviderSource,
}

impl Provider {
    /// Exported provider holding a ready value.
    pub fn value<T: Any + Send + Sync>(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into().trim().to_string(),
            visibility: Visibility::Exported,
            source: ProviderSource::Value(Arc::new(value)),
        }
    }

    /// Exported provider computed once when the graph is built.
    pub fn factory<T, F>(name: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            name: name.into().trim().to_string(),
            visibility: Visibility::Exported,
            source: ProviderSource::Factory(Arc::new(move || Arc::new(factory()))),
        }
    }

    /// Restricts the provider to the declaring module's scope.
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub(crate) fn resolve(&self) -> ProviderValue {
        match &self.source {
            ProviderSource::Value(value) => value.clone(),
            ProviderSource::Factory(factory) => factory(),
        }
    }
}

impl Debug for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

pub(crate) fn is_valid_name(value: &str) -> bool {
    NAME_RE.is_match(value)
}
