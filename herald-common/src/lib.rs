pub mod logging;

pub use tracing;

/// Lifecycle signals broadcast to long-running tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
