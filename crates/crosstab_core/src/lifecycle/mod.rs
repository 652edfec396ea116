//! Module lifecycle kernel and shared status container.

mod kernel;
mod state;
mod status;

pub use kernel::{
    InitHandle, KernelError, LifecycleKernel, ModuleInitError, ReadinessSnapshot, StatusChange,
};
pub use state::SharedState;
pub use status::LifecycleStatus;
