//! Per-module lifecycle status.

use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Readiness state of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Pending,
    Initializing,
    Ready,
    Error,
}

impl LifecycleStatus {
    /// Stable string id used in logs and snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// Whether the kernel may move a module from `self` to `next`.
    ///
    /// There is no terminal state: `Ready` and `Error` both return to
    /// `Pending` through reset or cascading invalidation.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Initializing)
                | (Self::Initializing, Self::Ready)
                | (Self::Initializing, Self::Error)
                | (Self::Initializing, Self::Pending)
                | (Self::Ready, Self::Pending)
                | (Self::Error, Self::Pending)
        )
    }
}

impl Display for LifecycleStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
