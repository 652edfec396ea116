//! Module registry and one-shot graph resolver.
//!
//! # Responsibility
//! - Accumulate module declarations and their providers.
//! - Validate the dependency graph and construct modules in dependency order.
//!
//! # Invariants
//! - Validation (missing dependencies, required cycles) completes before any
//!   factory runs, so a rejected graph constructs zero modules.
//! - Every module is constructed after all of its required dependencies.
//! - Each registered name yields exactly one instance.

use crate::lifecycle::SharedState;
use crate::registry::descriptor::{ModuleDescriptor, ModuleHandle, Provider, Visibility};
use crate::registry::error::{BuildError, BuildResult};
use crate::registry::graph::{BuildContext, GraphNode, ModuleGraph, ResolvedProviders};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Instant;

struct RegisteredModule {
    descriptor: ModuleDescriptor,
    providers: Vec<Provider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

/// Declaration-time module registry.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: BTreeMap<String, RegisteredModule>,
    exported_providers: BTreeSet<String>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one module together with the providers declared alongside it.
    pub fn register(
        &mut self,
        descriptor: ModuleDescriptor,
        providers: Vec<Provider>,
    ) -> BuildResult<()> {
        descriptor.validate()?;
        let name = descriptor.name().to_string();
        if self.entries.contains_key(name.as_str()) {
            return Err(BuildError::DuplicateModule(name));
        }

        let mut declared = BTreeSet::new();
        for provider in &providers {
            if !super::descriptor::is_valid_name(provider.name()) {
                return Err(BuildError::InvalidName(provider.name().to_string()));
            }
            if !declared.insert(provider.name()) {
                return Err(BuildError::DuplicateProvider(provider.name().to_string()));
            }
            if provider.visibility() == Visibility::Exported
                && self.exported_providers.contains(provider.name())
            {
                return Err(BuildError::DuplicateProvider(provider.name().to_string()));
            }
        }
        for provider in &providers {
            if provider.visibility() == Visibility::Exported {
                self.exported_providers.insert(provider.name().to_string());
            }
        }

        debug!(
            "event=module_register module=registry status=ok name={} required={} optional={} providers={}",
            name,
            descriptor.required().len(),
            descriptor.optional().len(),
            providers.len()
        );
        self.entries.insert(
            name,
            RegisteredModule {
                descriptor,
                providers,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Validates the graph and constructs every module once.
    ///
    /// # Errors
    /// - `MissingDependency` when a required dependency is not registered.
    /// - `GraphCycle` when required dependencies form a cycle.
    /// - Any error returned by a module factory.
    pub fn build(self) -> BuildResult<ModuleGraph> {
        let started_at = Instant::now();
        info!(
            "event=graph_build module=registry status=start modules={}",
            self.entries.len()
        );

        match self.build_graph() {
            Ok(graph) => {
                info!(
                    "event=graph_build module=registry status=ok modules={} duration_ms={}",
                    graph.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(graph)
            }
            Err(err) => {
                error!(
                    "event=graph_build module=registry status=error duration_ms={} error_code={} error={}",
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                Err(err)
            }
        }
    }

    fn build_graph(self) -> BuildResult<ModuleGraph> {
        self.check_required_present()?;
        if let Some(cycle) = self.find_required_cycle() {
            return Err(BuildError::GraphCycle { cycle });
        }

        let order = self.resolution_order();
        let providers = self.resolve_providers();
        let state = SharedState::with_modules(order.iter().cloned());
        let mut instances: BTreeMap<String, ModuleHandle> = BTreeMap::new();
        let mut constructed: Vec<String> = Vec::with_capacity(order.len());

        for name in &order {
            let Some(entry) = self.entries.get(name) else {
                continue;
            };
            let scope = self.private_scope(name);
            let ctx = BuildContext {
                module: name,
                required: entry.descriptor.required(),
                optional: entry.descriptor.optional(),
                instances: &instances,
                providers: &providers,
                scope: &scope,
                state: &state,
            };

            match (entry.descriptor.factory())(&ctx) {
                Ok(handle) => {
                    debug!("event=module_construct module=registry status=ok name={name}");
                    instances.insert(name.clone(), handle);
                    constructed.push(name.clone());
                }
                Err(err) => {
                    for built in constructed.iter().rev() {
                        if let Some(handle) = instances.get(built) {
                            handle.module.teardown();
                        }
                    }
                    warn!(
                        "event=module_construct module=registry status=error name={} error_code={}",
                        name,
                        err.code()
                    );
                    return Err(err);
                }
            }
        }

        let position: BTreeMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(index, name)| (name.as_str(), index))
            .collect();
        let mut nodes = BTreeMap::new();
        for (name, entry) in self.entries {
            let Some(handle) = instances.remove(&name) else {
                continue;
            };
            // Optional edges broken while ordering stay absent for this module.
            let own_position = position.get(name.as_str()).copied().unwrap_or(usize::MAX);
            let optional = entry
                .descriptor
                .optional()
                .iter()
                .filter(|dependency| {
                    position
                        .get(dependency.as_str())
                        .is_some_and(|index| *index < own_position)
                })
                .cloned()
                .collect();
            nodes.insert(
                name,
                GraphNode {
                    required: entry.descriptor.required().to_vec(),
                    optional,
                    non_blocking: entry.descriptor.is_non_blocking(),
                    handle,
                },
            );
        }

        Ok(ModuleGraph::new(order, nodes, state))
    }

    fn check_required_present(&self) -> BuildResult<()> {
        for (name, entry) in &self.entries {
            for dependency in entry.descriptor.required() {
                if !self.entries.contains_key(dependency.as_str()) {
                    return Err(BuildError::MissingDependency {
                        missing: dependency.clone(),
                        requester: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Depth-first search over required edges; returns the first cycle found
    /// as a closed path, e.g. `[a, b, a]`.
    fn find_required_cycle(&self) -> Option<Vec<String>> {
        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut path: Vec<&str> = Vec::new();
        for name in self.entries.keys() {
            if let Some(cycle) = self.visit_required(name, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn visit_required<'a>(
        &'a self,
        name: &'a str,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return None,
            Some(Mark::Active) => {
                let start = path.iter().position(|entry| *entry == name).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|entry| entry.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(name, Mark::Active);
        path.push(name);
        if let Some(entry) = self.entries.get(name) {
            for dependency in entry.descriptor.required() {
                if let Some(cycle) = self.visit_required(dependency, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(name, Mark::Done);
        None
    }

    /// Topological order over required edges plus registered optional edges.
    ///
    /// Ties resolve by name. When only optional edges block progress, the
    /// smallest module on a terminal cycle whose required dependencies are
    /// built goes next and sees its unbuilt optional dependencies as absent.
    /// Modules that merely wait on a cycle keep their optional edges.
    fn resolution_order(&self) -> Vec<String> {
        let mut remaining: BTreeSet<&str> = self.entries.keys().map(String::as_str).collect();
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let ready = remaining.iter().copied().find(|name| {
                self.ordering_edges(name)
                    .all(|dependency| !remaining.contains(dependency))
            });
            let next = match ready {
                Some(name) => name,
                None => {
                    let Some(name) = self.cycle_breaker(&remaining) else {
                        break;
                    };
                    warn!(
                        "event=graph_order module=registry status=optional_cycle_broken name={name}"
                    );
                    name
                }
            };
            remaining.remove(next);
            order.push(next.to_string());
        }

        order
    }

    /// Smallest module in a cycle no other remaining module is waited on from.
    ///
    /// Such a cycle exists whenever ordering is stuck, and its required edges
    /// stay inside it, so one member always has its required dependencies built.
    fn cycle_breaker<'a>(&'a self, remaining: &BTreeSet<&'a str>) -> Option<&'a str> {
        let reach: BTreeMap<&str, BTreeSet<&str>> = remaining
            .iter()
            .map(|name| (*name, self.reachable(name, remaining)))
            .collect();
        remaining.iter().copied().find(|name| {
            let Some(downstream) = reach.get(name) else {
                return false;
            };
            let terminal_cycle = downstream.contains(name)
                && downstream
                    .iter()
                    .all(|other| reach.get(other).is_some_and(|back| back.contains(name)));
            let required_built = self.entries.get(*name).is_some_and(|entry| {
                entry
                    .descriptor
                    .required()
                    .iter()
                    .all(|dependency| !remaining.contains(dependency.as_str()))
            });
            terminal_cycle && required_built
        })
    }

    /// Remaining modules reachable from `name` over ordering edges.
    fn reachable<'a>(&'a self, name: &str, remaining: &BTreeSet<&'a str>) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&'a str> = self
            .ordering_edges(name)
            .filter(|dependency| remaining.contains(dependency))
            .collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current) {
                stack.extend(
                    self.ordering_edges(current)
                        .filter(|dependency| remaining.contains(dependency)),
                );
            }
        }
        seen
    }

    fn ordering_edges<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let entry = self.entries.get(name);
        let required = entry
            .into_iter()
            .flat_map(|entry| entry.descriptor.required().iter());
        let optional = entry
            .into_iter()
            .flat_map(|entry| entry.descriptor.optional().iter())
            .filter(move |dependency| self.entries.contains_key(dependency.as_str()));
        required.chain(optional).map(String::as_str)
    }

    fn resolve_providers(&self) -> ResolvedProviders {
        let mut resolved = ResolvedProviders::default();
        for (name, entry) in &self.entries {
            for provider in &entry.providers {
                let value = provider.resolve();
                match provider.visibility() {
                    Visibility::Exported => {
                        resolved
                            .exported
                            .insert(provider.name().to_string(), value);
                    }
                    Visibility::Private => {
                        resolved
                            .private
                            .entry(name.clone())
                            .or_default()
                            .insert(provider.name().to_string(), value);
                    }
                }
            }
        }
        resolved
    }

    /// `name` followed by its transitive dependencies in breadth-first order.
    ///
    /// A private provider declared with module X is visible to X and to every
    /// module that transitively depends on X.
    fn private_scope(&self, name: &str) -> Vec<String> {
        let mut scope = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([name.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            for dependency in self.ordering_edges(&current) {
                queue.push_back(dependency.to_string());
            }
            scope.push(current);
        }
        scope
    }
}

#[cfg(test)]
mod tests {
    use super::ModuleRegistry;
    use crate::lifecycle::InitHandle;
    use crate::registry::descriptor::{Module, ModuleDescriptor, Provider};
    use crate::registry::error::BuildError;

    struct Noop;

    impl Module for Noop {
        fn initialize(&self, handle: InitHandle) {
            handle.succeed();
        }
    }

    fn noop(name: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(name, |_| Ok(Noop))
    }

    #[test]
    fn rejects_duplicate_module_name() {
        let mut registry = ModuleRegistry::new();
        registry.register(noop("auth"), vec![]).expect("first");
        let err = registry
            .register(noop("auth"), vec![])
            .expect_err("duplicate registration must fail");
        assert_eq!(err, BuildError::DuplicateModule("auth".to_string()));
    }

    #[test]
    fn rejects_duplicate_exported_provider_across_modules() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(noop("auth"), vec![Provider::value("brand", 1_u32)])
            .expect("first provider");
        let err = registry
            .register(noop("presence"), vec![Provider::value("brand", 2_u32)])
            .expect_err("duplicate exported provider");
        assert_eq!(err, BuildError::DuplicateProvider("brand".to_string()));
    }

    #[test]
    fn private_providers_may_share_names_across_modules() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(noop("auth"), vec![Provider::value("cfg", 1_u32).private()])
            .expect("auth");
        registry
            .register(noop("presence"), vec![Provider::value("cfg", 2_u32).private()])
            .expect("private names are scoped");
    }

    #[test]
    fn orders_ties_by_name() {
        let mut registry = ModuleRegistry::new();
        registry.register(noop("zeta"), vec![]).expect("zeta");
        registry.register(noop("alpha"), vec![]).expect("alpha");
        registry
            .register(noop("mid").requires("zeta"), vec![])
            .expect("mid");
        assert_eq!(registry.resolution_order(), ["alpha", "zeta", "mid"]);
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(noop("loop").requires("loop"), vec![])
            .expect("declaration is valid");
        let err = registry.build().err().expect("cycle");
        assert_eq!(
            err,
            BuildError::GraphCycle {
                cycle: vec!["loop".to_string(), "loop".to_string()]
            }
        );
    }

    #[test]
    fn private_scope_walks_dependencies_breadth_first() {
        let mut registry = ModuleRegistry::new();
        registry.register(noop("a"), vec![]).expect("a");
        registry.register(noop("b").requires("a"), vec![]).expect("b");
        registry
            .register(noop("c").requires("b").optionally("x"), vec![])
            .expect("c");
        assert_eq!(registry.private_scope("c"), ["c", "b", "a"]);
    }
}
