//! Module registry and dependency resolver.
//!
//! Modules are declared as explicit descriptors (name, dependency lists,
//! factory) and constructed once, in dependency order, by `build()`.

mod descriptor;
mod error;
mod graph;
mod resolver;

pub use descriptor::{Module, ModuleDescriptor, Provider, Visibility};
pub use error::{BuildError, BuildResult};
pub use graph::{BuildContext, ModuleGraph};
pub use resolver::ModuleRegistry;
