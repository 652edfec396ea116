//! Registration and build errors.

use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

/// Errors raised while declaring or building the module graph.
///
/// Every variant is fatal for `build()`: the graph never starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid module or dependency name: `{0}`")]
    InvalidName(String),
    #[error("module already registered: {0}")]
    DuplicateModule(String),
    #[error("exported provider already registered: {0}")]
    DuplicateProvider(String),
    #[error("module `{module}` declares dependency `{dependency}` more than once")]
    DuplicateDependency { module: String, dependency: String },
    #[error("dependency cycle detected: {}", cycle.join(" -> "))]
    GraphCycle { cycle: Vec<String> },
    #[error("module `{requester}` requires missing dependency `{missing}`")]
    MissingDependency { missing: String, requester: String },
    #[error("module `{module}` did not declare dependency `{dependency}`")]
    UndeclaredDependency { module: String, dependency: String },
    #[error("provider `{name}` is not visible to module `{module}`")]
    ProviderNotVisible { module: String, name: String },
    #[error("`{name}` does not have the requested type")]
    TypeMismatch { name: String },
    #[error("module `{module}` failed to construct: {reason}")]
    Construction { module: String, reason: String },
}

impl BuildError {
    /// Stable code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidName(_) => "invalid_name",
            Self::DuplicateModule(_) => "duplicate_module",
            Self::DuplicateProvider(_) => "duplicate_provider",
            Self::DuplicateDependency { .. } => "duplicate_dependency",
            Self::GraphCycle { .. } => "graph_cycle",
            Self::MissingDependency { .. } => "missing_dependency",
            Self::UndeclaredDependency { .. } => "undeclared_dependency",
            Self::ProviderNotVisible { .. } => "provider_not_visible",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::Construction { .. } => "construction_failed",
        }
    }
}
